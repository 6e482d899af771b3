//! Receive path
//!
//! Classifies each received frame, applies duplicate detection, power
//! save bookkeeping and protection policy, reorders QoS data through the
//! Block Ack buffers, and finally decapsulates data to Ethernet framing or
//! hands management and control frames to their handlers.

use alloc::collections::VecDeque;

use crate::ba::{BaOutcome, BaState, Released};
use crate::defrag::Defrag;
use crate::dprintln;
use crate::driver::{ActionTx, Driver, MgmtTx};
use crate::frame::{
    EtherHeader, Frame, LlcHeader, ReasonCode, RxFlags, RxInfo, ETHERTYPE_PAE, ETHER_HDR_LEN,
    LLC_SNAP_LEN,
};
use crate::ic::{Ieee80211Com, IcCaps, IcFlags, OpMode, State, AID_MASK};
use crate::mac::{
    Direction, FrameControl, FrameType, MacAddress, MacHeader, MgmtSubtype, CTL_SUBTYPE_BAR,
    CTL_SUBTYPE_PS_POLL, QOS_ACK_POLICY_BA, QOS_ACK_POLICY_MASK, QOS_ACK_POLICY_NORMAL, QOS_AMSDU,
    QOS_TID,
};
use crate::node::{Node, NodeFlags, NodeKey, NodeState, NodeTable, PowerSave};

/// What became of a frame.
enum Rx {
    /// Delivered, handed off, or freed after being counted.
    Consumed,
    /// Dropped without counting an interface error.
    Discard(Frame),
    /// Dropped and counted as an input error.
    Error(Frame),
}

impl Ieee80211Com {
    /// Process one received frame from `key`.
    ///
    /// Never fails: a rejected frame is counted and dropped. Frames the
    /// reorder buffer releases are fed back through the same path with
    /// `AMPDU_DONE` set, so they do not enter the buffer again.
    pub fn input<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        frame: Frame,
        rxi: RxInfo,
        drv: &mut D,
    ) {
        let mut work = VecDeque::new();
        work.push_back((frame, rxi));
        while let Some((frame, rxi)) = work.pop_front() {
            let mut released = Released::new();
            match self.input_one(nt, key, frame, rxi, drv, &mut released) {
                Rx::Consumed => {}
                Rx::Discard(f) => drv.raw_input(&f, &rxi),
                Rx::Error(f) => {
                    self.stats.ierrors += 1;
                    drv.raw_input(&f, &rxi);
                }
            }
            work.extend(released);
        }
    }

    fn input_one<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        frame: Frame,
        rxi: RxInfo,
        drv: &mut D,
        out: &mut Released,
    ) -> Rx {
        if self.opmode == OpMode::Monitor {
            drv.raw_input(&frame, &rxi);
            return Rx::Consumed;
        }
        // CTS and ACK carry no transmitter address
        if frame.len() < MacHeader::MIN_LEN {
            dprintln!("frame too short, len {}", frame.len());
            self.stats.rx_tooshort += 1;
            return Rx::Discard(frame);
        }
        let Some(fc) = frame.fc() else {
            return Rx::Discard(frame);
        };
        if fc.protocol_version() != FrameControl::VERSION_0 {
            dprintln!("frame with wrong version: {:#x}", fc.0 & 0xff);
            self.stats.rx_badversion += 1;
            return Rx::Error(frame);
        }
        let ftype = fc.frame_type();
        let wh = if ftype == FrameType::Control {
            None
        } else {
            match frame.header() {
                Some(wh) => Some(wh),
                None => {
                    dprintln!("frame too short, len {}", frame.len());
                    self.stats.rx_tooshort += 1;
                    return Rx::Error(frame);
                }
            }
        };
        let Some(ni) = nt.get_mut(key) else {
            dprintln!("no node for {:?}", key);
            return Rx::Error(frame);
        };

        if let Some(wh) = &wh {
            if let Some(qos) = wh.qos {
                if !rxi.flags.contains(RxFlags::AMPDU_DONE) {
                    let tid = (qos & QOS_TID) as usize;
                    let policy = qos & QOS_ACK_POLICY_MASK;
                    let agreed = ni.rx_ba[tid].state == BaState::Agreed;
                    if policy == QOS_ACK_POLICY_BA && !agreed {
                        dprintln!("no BA agreement for {}, tid {}", ni.macaddr, tid);
                        let tx = ActionTx::Delba {
                            tid: tid as u8,
                            reason: ReasonCode::SetupRequired,
                            initiator: false,
                        };
                        let _ = drv.send_action(ni, tx);
                        return Rx::Error(frame);
                    }
                    if agreed && (policy == QOS_ACK_POLICY_BA || policy == QOS_ACK_POLICY_NORMAL) {
                        let now = drv.uptime_us();
                        self.input_ba(ni, tid, frame, rxi, wh.seq(), now, out);
                        return Rx::Consumed;
                    }
                }
            }

            // duplicate detection (9.3.2.10)
            if self.state != State::Scan {
                let sn = wh.seq();
                let last = match wh.tid() {
                    Some(tid) => &mut ni.qos_rxseqs[tid as usize],
                    None => &mut ni.rxseq,
                };
                if fc.retry() && *last == Some(sn) {
                    self.stats.rx_dup += 1;
                    return Rx::Discard(frame);
                }
                *last = Some(sn);
            }
        }

        if self.state != State::Scan {
            ni.rssi = rxi.rssi;
            ni.rstamp = rxi.tstamp;
            ni.inact = 0;
        }
        self.update_pwrsave(ni, fc, drv);

        match (ftype, wh) {
            (FrameType::Data, Some(wh)) => self.input_data(nt, key, frame, rxi, &wh, drv),
            (FrameType::Management, Some(wh)) => self.input_mgmt(nt, key, frame, rxi, &wh, drv, out),
            (FrameType::Control, _) => {
                self.stats.rx_ctl += 1;
                match fc.subtype() {
                    CTL_SUBTYPE_PS_POLL => self.recv_pspoll(nt, key, &frame, drv),
                    CTL_SUBTYPE_BAR => self.recv_bar(nt, key, &frame, drv, out),
                    _ => {}
                }
                Rx::Discard(frame)
            }
            _ => {
                dprintln!("bad frame type {:?}", ftype);
                Rx::Error(frame)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn input_ba(
        &mut self,
        ni: &mut Node,
        tid: usize,
        frame: Frame,
        rxi: RxInfo,
        sn: u16,
        now: u64,
        out: &mut Released,
    ) {
        match ni.rx_ba[tid].input(frame, rxi, sn, now, &self.config.ba, out) {
            BaOutcome::Stored => {}
            BaOutcome::Duplicate | BaOutcome::SlotBusy => {
                dprintln!("reorder drop, tid {} sn {}", tid, sn);
                self.stats.rx_dup += 1;
            }
            BaOutcome::Jump => {
                dprintln!("sequence jump, tid {} sn {} winend {}", tid, sn, ni.rx_ba[tid].winend);
                self.stats.rx_ba_jump += 1;
                self.stats.ierrors += 1;
            }
        }
    }

    /// Track a station's power management bit (AP only).
    fn update_pwrsave<D: Driver + ?Sized>(&mut self, ni: &mut Node, fc: FrameControl, drv: &mut D) {
        if self.opmode != OpMode::HostAp
            || !self.caps.contains(IcCaps::APPMGT)
            || ni.state != NodeState::Assoc
        {
            return;
        }
        if fc.power_mgmt() {
            if ni.pwrsave == PowerSave::Awake {
                ni.pwrsave = PowerSave::Doze;
                self.pssta += 1;
                dprintln!("PS mode on for {}, count {}", ni.macaddr, self.pssta);
            }
        } else if ni.pwrsave == PowerSave::Doze {
            ni.pwrsave = PowerSave::Awake;
            self.pssta = self.pssta.saturating_sub(1);
            dprintln!("PS mode off for {}, count {}", ni.macaddr, self.pssta);
            drv.set_tim(ni.associd & AID_MASK, false);
            let saved = core::mem::take(&mut ni.savedq);
            for f in saved {
                drv.enqueue_pwrsave(ni, f);
            }
        }
    }

    fn input_data<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        frame: Frame,
        rxi: RxInfo,
        wh: &MacHeader,
        drv: &mut D,
    ) -> Rx {
        let dir = wh.fc.direction();
        let scanning = self.state == State::Scan;
        let bss_bssid = nt.bss().bssid;
        match self.opmode {
            OpMode::Sta => {
                if dir != Direction::FromDs {
                    self.stats.rx_wrongdir += 1;
                    return Rx::Discard(frame);
                }
                let Some(ni) = nt.get(key) else { return Rx::Error(frame) };
                if !scanning && wh.addr2 != ni.bssid {
                    dprintln!("discard frame from SA {}", wh.addr2);
                    self.stats.rx_wrongbss += 1;
                    return Rx::Discard(frame);
                }
                if self.flags.contains(IcFlags::SIMPLEX)
                    && wh.addr1.is_multicast()
                    && wh.addr3 == self.myaddr
                {
                    // our own multicast, relayed by the AP
                    self.stats.rx_mcastecho += 1;
                    return Rx::Discard(frame);
                }
            }
            OpMode::Ibss | OpMode::AhDemo => {
                if dir != Direction::NoDs {
                    self.stats.rx_wrongdir += 1;
                    return Rx::Discard(frame);
                }
                if !scanning && wh.addr3 != bss_bssid && wh.addr3 != MacAddress::BROADCAST {
                    dprintln!("discard data frame to DA {}", wh.addr3);
                    self.stats.rx_wrongbss += 1;
                    return Rx::Discard(frame);
                }
            }
            OpMode::HostAp => {
                if dir != Direction::ToDs {
                    self.stats.rx_wrongdir += 1;
                    return Rx::Discard(frame);
                }
                if !scanning && wh.addr1 != bss_bssid && wh.addr1 != MacAddress::BROADCAST {
                    dprintln!("discard data frame to BSS {}", wh.addr1);
                    self.stats.rx_wrongbss += 1;
                    return Rx::Discard(frame);
                }
                if key == NodeKey::Bss {
                    dprintln!("data from unknown src {}", wh.addr2);
                    if let Some(ni) = nt.find_or_dup(wh.addr2).and_then(|k| nt.get(k)) {
                        let _ = drv.send_mgmt(ni, MgmtTx::Deauth(ReasonCode::NotAuthed));
                    }
                    self.stats.rx_notassoc += 1;
                    return Rx::Error(frame);
                }
                let Some(ni) = nt.get(key) else { return Rx::Error(frame) };
                if ni.associd == 0 {
                    dprintln!("data from unassoc src {}", wh.addr2);
                    let _ = drv.send_mgmt(ni, MgmtTx::Disassoc(ReasonCode::NotAssoced));
                    self.stats.rx_notassoc += 1;
                    return Rx::Error(frame);
                }
            }
            OpMode::Monitor => return Rx::Discard(frame),
        }

        let Some(ni) = nt.get(key) else { return Rx::Error(frame) };
        let mut frame = frame;
        let rxprot = self.flags.contains(IcFlags::WEPON)
            || (self.flags.contains(IcFlags::RSNON) && ni.flags.contains(NodeFlags::RXPROT));
        if rxprot {
            if !rxi.flags.contains(RxFlags::HWDEC) {
                if !wh.fc.protected() {
                    self.stats.rx_unencrypted += 1;
                    return Rx::Error(frame);
                }
                frame = match drv.decrypt(ni, frame) {
                    Ok(f) => f,
                    Err(_) => {
                        self.stats.rx_wepfail += 1;
                        self.stats.ierrors += 1;
                        return Rx::Consumed;
                    }
                };
            }
        } else if wh.fc.protected() || rxi.flags.contains(RxFlags::HWDEC) {
            // protection is off for this peer
            self.stats.rx_nowep += 1;
            return Rx::Discard(frame);
        }
        drv.raw_input(&frame, &rxi);

        let hdrlen = wh.header_len();
        let Some(frame) = self.reassemble(frame, hdrlen, drv) else {
            return Rx::Consumed;
        };
        let amsdu = ni.flags.contains(NodeFlags::HT) && wh.qos.is_some_and(|q| q & QOS_AMSDU != 0);
        if amsdu {
            self.amsdu_decap(nt, key, frame, hdrlen, drv);
        } else {
            self.decap(nt, key, frame, hdrlen, drv);
        }
        Rx::Consumed
    }

    /// Run a frame through the defragmentation cache. `None` when the
    /// cache kept or rejected it.
    fn reassemble<D: Driver + ?Sized>(&mut self, frame: Frame, hdrlen: usize, drv: &mut D) -> Option<Frame> {
        let now = drv.uptime_us();
        match self.defrag.defrag(frame, hdrlen, now) {
            Defrag::Complete(f) => Some(f),
            Defrag::Pending => None,
            Defrag::Discard => {
                self.stats.rx_defrag += 1;
                self.stats.ierrors += 1;
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn input_mgmt<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        frame: Frame,
        rxi: RxInfo,
        wh: &MacHeader,
        drv: &mut D,
        out: &mut Released,
    ) -> Rx {
        if wh.fc.direction() != Direction::NoDs {
            self.stats.rx_wrongdir += 1;
            return Rx::Error(frame);
        }
        if self.opmode == OpMode::AhDemo {
            self.stats.rx_ahdemo_mgt += 1;
            return Rx::Discard(frame);
        }
        let subtype = MgmtSubtype::from_raw(wh.fc.subtype());
        if self.state == State::Scan
            && !matches!(subtype, MgmtSubtype::Beacon | MgmtSubtype::ProbeResp)
        {
            self.stats.rx_mgtdiscard += 1;
            return Rx::Discard(frame);
        }

        let Some(ni) = nt.get(key) else { return Rx::Error(frame) };
        let mut frame = frame;
        if ni.flags.contains(NodeFlags::RXMGMTPROT) {
            if matches!(subtype, MgmtSubtype::Disassoc | MgmtSubtype::Deauth | MgmtSubtype::Action) {
                if !wh.addr1.is_multicast() && !wh.fc.protected() {
                    dprintln!("unprotected {} from {}", subtype.name(), wh.addr2);
                    self.stats.rx_mgmt_unprotected += 1;
                    return Rx::Discard(frame);
                }
                frame = match drv.decrypt(ni, frame) {
                    Ok(f) => f,
                    Err(_) => {
                        self.stats.rx_mgmt_decrypt_fail += 1;
                        return Rx::Consumed;
                    }
                };
            }
        } else if self.flags.contains(IcFlags::RSNON) && wh.fc.protected() {
            dprintln!("protected {} from {} without MFP", subtype.name(), wh.addr2);
            return Rx::Discard(frame);
        }

        let Some(frame) = self.reassemble(frame, wh.header_len(), drv) else {
            return Rx::Consumed;
        };
        if self.flags.contains(IcFlags::DEBUG) {
            self.input_print(wh, subtype, &rxi);
        }
        drv.raw_input(&frame, &rxi);
        self.recv_mgmt(nt, key, &frame, &rxi, subtype, drv, out);
        Rx::Consumed
    }

    fn input_print(&self, wh: &MacHeader, subtype: MgmtSubtype, rxi: &RxInfo) {
        let doprint = match subtype {
            MgmtSubtype::Beacon => self.state == State::Scan,
            MgmtSubtype::ProbeReq => self.opmode == OpMode::Ibss,
            _ => true,
        };
        if doprint {
            ::log::info!(
                target: "net80211",
                "received {} from {} rssi {} mode {:?}",
                subtype.name(),
                wh.addr2,
                rxi.rssi,
                self.curmode
            );
        }
    }

    /// Rewrite an 802.11 data frame as Ethernet and deliver it.
    pub(crate) fn decap<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        frame: Frame,
        hdrlen: usize,
        drv: &mut D,
    ) {
        let wh = match frame.header() {
            Some(wh) if frame.len() >= hdrlen + LLC_SNAP_LEN => wh,
            _ => {
                self.stats.rx_decap += 1;
                return;
            }
        };
        let (dst, src) = match wh.fc.direction() {
            Direction::NoDs => (wh.addr1, wh.addr2),
            Direction::ToDs => (wh.addr3, wh.addr2),
            Direction::FromDs => (wh.addr1, wh.addr3),
            Direction::DsToDs => (wh.addr3, wh.addr4.unwrap_or(MacAddress::ZERO)),
        };
        let body = frame.body(hdrlen);
        let eh_frame = match LlcHeader::parse(body) {
            Some(llc) if llc.is_rfc1042() => {
                EtherHeader { dst, src, ether_type: llc.ether_type }.encap(&body[LLC_SNAP_LEN..])
            }
            _ => EtherHeader { dst, src, ether_type: body.len() as u16 }.encap(body),
        };
        self.deliver_data(nt, key, eh_frame, drv);
    }

    /// Split an A-MSDU into its subframes and deliver each one.
    ///
    /// Subframes are 802.3 framed and padded to four octets. A malformed
    /// subframe ends the walk; those already delivered stay delivered.
    pub(crate) fn amsdu_decap<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        mut frame: Frame,
        hdrlen: usize,
        drv: &mut D,
    ) {
        frame.trim_front(hdrlen);
        loop {
            let eh = match EtherHeader::parse(frame.as_slice()) {
                Some(eh) if frame.len() >= ETHER_HDR_LEN + LLC_SNAP_LEN => eh,
                _ => {
                    self.stats.rx_decap += 1;
                    break;
                }
            };
            // the type field is the 802.3 length
            let len = eh.ether_type as usize;
            if len < LLC_SNAP_LEN {
                dprintln!("A-MSDU subframe too short ({})", len);
                self.stats.rx_decap += 1;
                break;
            }
            let total = ETHER_HDR_LEN + len;
            if total > frame.len() {
                dprintln!("A-MSDU subframe too long ({})", total);
                self.stats.rx_decap += 1;
                break;
            }
            let rest = frame.split_off(total);
            let llc = LlcHeader::parse(&frame.as_slice()[ETHER_HDR_LEN..]);
            let sub = match llc {
                Some(llc) if llc.is_rfc1042() => {
                    let eh = EtherHeader { ether_type: llc.ether_type, ..eh };
                    eh.encap(&frame.as_slice()[ETHER_HDR_LEN + LLC_SNAP_LEN..])
                }
                _ => frame,
            };
            self.deliver_data(nt, key, sub, drv);

            if rest.is_empty() {
                break;
            }
            frame = rest;
            let pad = ((total + 3) & !3) - total;
            frame.trim_front(pad);
        }
    }

    /// Hand an Ethernet frame to the stack, bridging between stations
    /// when acting as an AP.
    pub(crate) fn deliver_data<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        frame: Frame,
        drv: &mut D,
    ) {
        let Some(eh) = EtherHeader::parse(frame.as_slice()) else {
            self.stats.rx_decap += 1;
            return;
        };
        let Some(ni) = nt.get(key) else { return };
        let pae = eh.ether_type == ETHERTYPE_PAE;
        let rsn = self.flags.contains(IcFlags::RSNON);
        if rsn && !ni.port_valid && !pae {
            dprintln!("port not valid: {}", eh.dst);
            self.stats.rx_unauth += 1;
            return;
        }

        // EAPOL frames are never bridged
        if self.opmode == OpMode::HostAp && !self.flags.contains(IcFlags::NOBRIDGE) && !pae {
            if eh.dst.is_multicast() {
                if drv.enqueue_tx(frame.clone()).is_err() {
                    self.stats.oerrors += 1;
                }
            } else {
                let to_station = nt
                    .find_node(&eh.dst)
                    .and_then(|k| nt.get(k))
                    .is_some_and(|n| n.state == NodeState::Assoc);
                if to_station {
                    if drv.enqueue_tx(frame).is_err() {
                        self.stats.oerrors += 1;
                    }
                    return;
                }
            }
        }

        if rsn && pae {
            self.stats.ipackets += 1;
            drv.eapol_input(ni, frame);
        } else {
            drv.deliver(ni, frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ba::{ADDBA_BA_POLICY, BA_MAX_WINSZ};
    use crate::config::Config;
    use crate::driver::fake::FakeDriver;
    use crate::mac::{FC1_MORE_FRAG, FC1_PROTECTED, FC1_PWR_MGT};
    use alloc::vec;
    use alloc::vec::Vec;

    const AP: MacAddress = MacAddress([2, 0, 0, 0, 0, 1]);
    const STA: MacAddress = MacAddress([2, 0, 0, 0, 0, 2]);
    const OTHER: MacAddress = MacAddress([2, 0, 0, 0, 0, 3]);

    /// Station associated to AP, receiving from it.
    fn sta() -> (Ieee80211Com, NodeTable, FakeDriver) {
        let mut ic = Ieee80211Com::new(OpMode::Sta, STA, Config::default());
        ic.state = State::Run;
        let mut bss = Node::new(AP);
        bss.bssid = AP;
        bss.flags |= NodeFlags::HT | NodeFlags::QOS;
        (ic, NodeTable::new(bss, 8), FakeDriver::default())
    }

    /// AP with one associated station.
    fn hostap() -> (Ieee80211Com, NodeTable, FakeDriver) {
        let mut ic = Ieee80211Com::new(OpMode::HostAp, AP, Config::default());
        ic.state = State::Run;
        ic.caps |= IcCaps::APPMGT;
        let mut bss = Node::new(AP);
        bss.bssid = AP;
        let mut nt = NodeTable::new(bss, 8);
        let key = nt.dup_bss(STA).unwrap();
        let ni = nt.get_mut(key).unwrap();
        ni.state = NodeState::Assoc;
        ni.associd = 0xc001;
        ni.port_valid = true;
        (ic, nt, FakeDriver::default())
    }

    fn data_hdr(fc1: u8, a1: MacAddress, a2: MacAddress, a3: MacAddress, seq: u16) -> Vec<u8> {
        let mut b = vec![0x08, fc1, 0, 0];
        b.extend_from_slice(a1.as_bytes());
        b.extend_from_slice(a2.as_bytes());
        b.extend_from_slice(a3.as_bytes());
        b.extend_from_slice(&(seq << 4).to_le_bytes());
        b
    }

    fn qos_hdr(fc1: u8, seq: u16, qos: u16) -> Vec<u8> {
        let mut b = data_hdr(fc1, STA, AP, OTHER, seq);
        b[0] = 0x88;
        b.extend_from_slice(&qos.to_le_bytes());
        b
    }

    fn snap(ether_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut b = vec![0xaa, 0xaa, 0x03, 0, 0, 0];
        b.extend_from_slice(&ether_type.to_be_bytes());
        b.extend_from_slice(payload);
        b
    }

    /// From-DS data frame with an IPv4 payload.
    fn from_ds(seq: u16, retry: bool) -> Frame {
        let fc1 = 0x02 | if retry { 0x08 } else { 0 };
        let mut b = data_hdr(fc1, STA, AP, OTHER, seq);
        b.extend_from_slice(&snap(0x0800, &[seq as u8; 4]));
        Frame::new(b)
    }

    fn types(drv: &FakeDriver) -> Vec<u16> {
        drv.delivered
            .iter()
            .map(|(_, f)| EtherHeader::parse(f.as_slice()).unwrap().ether_type)
            .collect()
    }

    #[test]
    fn test_decap_from_ds() {
        let (mut ic, mut nt, mut drv) = sta();
        ic.input(&mut nt, NodeKey::Bss, from_ds(1, false), RxInfo::default(), &mut drv);
        assert_eq!(drv.delivered.len(), 1);
        let f = &drv.delivered[0].1;
        let eh = EtherHeader::parse(f.as_slice()).unwrap();
        assert_eq!(eh.dst, STA);
        assert_eq!(eh.src, OTHER);
        assert_eq!(eh.ether_type, 0x0800);
        assert_eq!(&f.as_slice()[ETHER_HDR_LEN..], &[1, 1, 1, 1]);
    }

    #[test]
    fn test_decap_without_snap_uses_length() {
        let (mut ic, mut nt, mut drv) = sta();
        let mut b = data_hdr(0x02, STA, AP, OTHER, 1);
        b.extend_from_slice(&[0x42; 10]);
        ic.input(&mut nt, NodeKey::Bss, Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(types(&drv), [10]);
    }

    #[test]
    fn test_duplicate_retry_suppressed() {
        let (mut ic, mut nt, mut drv) = sta();
        for s in [0u16, 7, 4095] {
            drv.delivered.clear();
            ic.input(&mut nt, NodeKey::Bss, from_ds(s, true), RxInfo::default(), &mut drv);
            ic.input(&mut nt, NodeKey::Bss, from_ds(s, true), RxInfo::default(), &mut drv);
            assert_eq!(drv.delivered.len(), 1, "seq {}", s);
        }
        assert_eq!(ic.stats.rx_dup, 3);
    }

    #[test]
    fn test_first_retry_not_duplicate() {
        let (mut ic, mut nt, mut drv) = sta();
        ic.input(&mut nt, NodeKey::Bss, from_ds(0, true), RxInfo::default(), &mut drv);
        assert_eq!(drv.delivered.len(), 1);
    }

    #[test]
    fn test_too_short_and_bad_version() {
        let (mut ic, mut nt, mut drv) = sta();
        ic.input(&mut nt, NodeKey::Bss, Frame::from_slice(&[0x08, 0x02, 0, 0]), RxInfo::default(), &mut drv);
        assert_eq!(ic.stats.rx_tooshort, 1);
        assert_eq!(ic.stats.ierrors, 0);

        let mut f = from_ds(1, false);
        f.as_mut_slice()[0] |= 0x01;
        ic.input(&mut nt, NodeKey::Bss, f, RxInfo::default(), &mut drv);
        assert_eq!(ic.stats.rx_badversion, 1);
        assert_eq!(ic.stats.ierrors, 1);
        assert!(drv.delivered.is_empty());
    }

    #[test]
    fn test_sta_address_checks() {
        let (mut ic, mut nt, mut drv) = sta();
        // to-DS is the wrong direction for a station
        let mut b = data_hdr(0x01, AP, STA, OTHER, 1);
        b.extend_from_slice(&snap(0x0800, &[0]));
        ic.input(&mut nt, NodeKey::Bss, Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(ic.stats.rx_wrongdir, 1);

        let mut b = data_hdr(0x02, STA, OTHER, OTHER, 2);
        b.extend_from_slice(&snap(0x0800, &[0]));
        ic.input(&mut nt, NodeKey::Bss, Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(ic.stats.rx_wrongbss, 1);

        ic.flags |= IcFlags::SIMPLEX;
        let mut b = data_hdr(0x02, MacAddress::BROADCAST, AP, STA, 3);
        b.extend_from_slice(&snap(0x0800, &[0]));
        ic.input(&mut nt, NodeKey::Bss, Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(ic.stats.rx_mcastecho, 1);
        assert!(drv.delivered.is_empty());
    }

    #[test]
    fn test_protection_policy() {
        let (mut ic, mut nt, mut drv) = sta();
        ic.input(&mut nt, NodeKey::Bss, from_ds(1, false), RxInfo { flags: RxFlags::HWDEC, ..Default::default() }, &mut drv);
        assert_eq!(ic.stats.rx_nowep, 1);

        ic.flags |= IcFlags::WEPON;
        ic.input(&mut nt, NodeKey::Bss, from_ds(2, false), RxInfo::default(), &mut drv);
        assert_eq!(ic.stats.rx_unencrypted, 1);

        let mut f = from_ds(3, false);
        f.set_fc1(FC1_PROTECTED);
        ic.input(&mut nt, NodeKey::Bss, f, RxInfo::default(), &mut drv);
        assert_eq!(drv.delivered.len(), 1);

        drv.fail_decrypt = true;
        let mut f = from_ds(4, false);
        f.set_fc1(FC1_PROTECTED);
        ic.input(&mut nt, NodeKey::Bss, f, RxInfo::default(), &mut drv);
        assert_eq!(ic.stats.rx_wepfail, 1);
        assert_eq!(drv.delivered.len(), 1);
        assert_eq!(ic.stats.ierrors, 2);
    }

    #[test]
    fn test_amsdu_two_subframes() {
        let (mut ic, mut nt, mut drv) = sta();
        let mut b = qos_hdr(0x02, 1, QOS_AMSDU);
        // subframe 1: 8 SNAP + 3 payload, padded by 3 to 28
        let sub1 = snap(0x0800, &[1, 2, 3]);
        b.extend_from_slice(OTHER.as_bytes());
        b.extend_from_slice(AP.as_bytes());
        b.extend_from_slice(&(sub1.len() as u16).to_be_bytes());
        b.extend_from_slice(&sub1);
        b.extend_from_slice(&[0; 3]);
        // subframe 2, last, unpadded
        let sub2 = snap(0x86dd, &[4, 5, 6, 7, 8]);
        b.extend_from_slice(STA.as_bytes());
        b.extend_from_slice(AP.as_bytes());
        b.extend_from_slice(&(sub2.len() as u16).to_be_bytes());
        b.extend_from_slice(&sub2);

        ic.input(&mut nt, NodeKey::Bss, Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(types(&drv), [0x0800, 0x86dd]);
        assert_eq!(&drv.delivered[0].1.as_slice()[ETHER_HDR_LEN..], &[1, 2, 3]);
        assert_eq!(&drv.delivered[1].1.as_slice()[..6], STA.as_bytes());
        assert_eq!(&drv.delivered[1].1.as_slice()[ETHER_HDR_LEN..], &[4, 5, 6, 7, 8]);
        assert_eq!(ic.stats.rx_decap, 0);
    }

    #[test]
    fn test_amsdu_truncated_keeps_earlier() {
        let (mut ic, mut nt, mut drv) = sta();
        let mut b = qos_hdr(0x02, 1, QOS_AMSDU);
        let sub1 = snap(0x0800, &[1, 2, 3, 4]);
        b.extend_from_slice(OTHER.as_bytes());
        b.extend_from_slice(AP.as_bytes());
        b.extend_from_slice(&(sub1.len() as u16).to_be_bytes());
        b.extend_from_slice(&sub1);
        b.extend_from_slice(&[0; 2]);
        b.extend_from_slice(OTHER.as_bytes());
        b.extend_from_slice(AP.as_bytes());
        b.extend_from_slice(&200u16.to_be_bytes());
        b.extend_from_slice(&snap(0x0800, &[9; 4]));

        ic.input(&mut nt, NodeKey::Bss, Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(drv.delivered.len(), 1);
        assert_eq!(ic.stats.rx_decap, 1);
    }

    fn qos_data(sn: u16, policy: u16) -> Frame {
        let mut b = qos_hdr(0x02, sn, 5 | policy);
        b.extend_from_slice(&snap(0x0800, &sn.to_be_bytes()));
        Frame::new(b)
    }

    fn payload_sns(drv: &FakeDriver) -> Vec<u16> {
        drv.delivered
            .iter()
            .map(|(_, f)| u16::from_be_bytes([f.as_slice()[14], f.as_slice()[15]]))
            .collect()
    }

    #[test]
    fn test_block_ack_reorders_through_input() {
        let (mut ic, mut nt, mut drv) = sta();
        let ba = &mut nt.bss_mut().rx_ba[5];
        ba.setup(100, 4, ADDBA_BA_POLICY, 0).unwrap();
        ba.state = BaState::Agreed;

        for sn in [101, 100, 103, 102] {
            ic.input(&mut nt, NodeKey::Bss, qos_data(sn, QOS_ACK_POLICY_NORMAL), RxInfo::default(), &mut drv);
        }
        assert_eq!(payload_sns(&drv), [100, 101, 102, 103]);
        assert_eq!(nt.bss().rx_ba[5].winstart, 104);
    }

    #[test]
    fn test_block_ack_policy_without_agreement() {
        let (mut ic, mut nt, mut drv) = sta();
        ic.input(&mut nt, NodeKey::Bss, qos_data(1, QOS_ACK_POLICY_BA), RxInfo::default(), &mut drv);
        assert!(drv.delivered.is_empty());
        assert_eq!(ic.stats.ierrors, 1);
        assert_eq!(
            drv.actions,
            [(AP, ActionTx::Delba { tid: 5, reason: ReasonCode::SetupRequired, initiator: false })]
        );
    }

    #[test]
    fn test_block_ack_forced_advance_through_input() {
        let (mut ic, mut nt, mut drv) = sta();
        let ba = &mut nt.bss_mut().rx_ba[5];
        ba.setup(0, BA_MAX_WINSZ, ADDBA_BA_POLICY, 0).unwrap();
        ba.state = BaState::Agreed;

        let far = 2000;
        for _ in 0..19 {
            ic.input(&mut nt, NodeKey::Bss, qos_data(far, QOS_ACK_POLICY_BA), RxInfo::default(), &mut drv);
        }
        assert!(drv.delivered.is_empty());
        assert_eq!(ic.stats.rx_ba_jump, 19);
        assert_eq!(ic.stats.ierrors, 19);
        ic.input(&mut nt, NodeKey::Bss, qos_data(far, QOS_ACK_POLICY_BA), RxInfo::default(), &mut drv);

        drv.now = ic.config.ba.gap_timeout_us;
        ic.run_timers(&mut nt, &mut drv);
        assert_eq!(payload_sns(&drv), [far]);
    }

    #[test]
    fn test_fragments_reassembled() {
        let (mut ic, mut nt, mut drv) = sta();
        let msdu = snap(0x0800, &[7; 20]);
        let (a, b) = msdu.split_at(11);
        let mut f0 = data_hdr(0x02 | FC1_MORE_FRAG, STA, AP, OTHER, 9);
        f0.extend_from_slice(a);
        let mut f1 = data_hdr(0x02, STA, AP, OTHER, 9);
        f1[22] |= 1;
        f1.extend_from_slice(b);
        ic.input(&mut nt, NodeKey::Bss, Frame::new(f0), RxInfo::default(), &mut drv);
        assert!(drv.delivered.is_empty());
        ic.input(&mut nt, NodeKey::Bss, Frame::new(f1), RxInfo::default(), &mut drv);
        assert_eq!(types(&drv), [0x0800]);
        assert_eq!(drv.delivered[0].1.len(), ETHER_HDR_LEN + 20);
    }

    #[test]
    fn test_hostap_unknown_source_deauthed() {
        let (mut ic, mut nt, mut drv) = hostap();
        let mut b = data_hdr(0x01, AP, OTHER, OTHER, 1);
        b.extend_from_slice(&snap(0x0800, &[0]));
        ic.input(&mut nt, NodeKey::Bss, Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(drv.mgmt, [(OTHER, MgmtTx::Deauth(ReasonCode::NotAuthed))]);
        assert_eq!(ic.stats.rx_notassoc, 1);
    }

    #[test]
    fn test_hostap_bridges_between_stations() {
        let (mut ic, mut nt, mut drv) = hostap();
        let k = nt.dup_bss(OTHER).unwrap();
        nt.get_mut(k).unwrap().state = NodeState::Assoc;

        // unicast to another station is forwarded, not delivered
        let mut b = data_hdr(0x01, AP, STA, OTHER, 1);
        b.extend_from_slice(&snap(0x0800, &[0]));
        ic.input(&mut nt, NodeKey::Peer(STA), Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(drv.txq.len(), 1);
        assert!(drv.delivered.is_empty());

        // multicast goes both ways
        let mut b = data_hdr(0x01, AP, STA, MacAddress::BROADCAST, 2);
        b.extend_from_slice(&snap(0x0800, &[0]));
        ic.input(&mut nt, NodeKey::Peer(STA), Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(drv.txq.len(), 2);
        assert_eq!(drv.delivered.len(), 1);
    }

    #[test]
    fn test_rsn_port_gating() {
        let (mut ic, mut nt, mut drv) = hostap();
        ic.flags |= IcFlags::RSNON | IcFlags::NOBRIDGE;
        nt.get_mut(NodeKey::Peer(STA)).unwrap().port_valid = false;

        let mut b = data_hdr(0x01, AP, STA, OTHER, 1);
        b.extend_from_slice(&snap(0x0800, &[0]));
        ic.input(&mut nt, NodeKey::Peer(STA), Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(ic.stats.rx_unauth, 1);

        let mut b = data_hdr(0x01, AP, STA, AP, 2);
        b.extend_from_slice(&snap(ETHERTYPE_PAE, &[1, 3, 0, 0]));
        ic.input(&mut nt, NodeKey::Peer(STA), Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(drv.eapol.len(), 1);
        assert_eq!(ic.stats.ipackets, 1);
        assert!(drv.delivered.is_empty());
    }

    #[test]
    fn test_power_save_transitions() {
        let (mut ic, mut nt, mut drv) = hostap();
        nt.get_mut(NodeKey::Peer(STA)).unwrap().savedq.push_back(Frame::from_slice(&[1]));

        let mut b = data_hdr(0x01 | FC1_PWR_MGT, AP, STA, AP, 1);
        b.extend_from_slice(&snap(0x0800, &[0]));
        ic.input(&mut nt, NodeKey::Peer(STA), Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(ic.pssta, 1);
        assert_eq!(nt.get(NodeKey::Peer(STA)).unwrap().pwrsave, PowerSave::Doze);

        let mut b = data_hdr(0x01, AP, STA, AP, 2);
        b.extend_from_slice(&snap(0x0800, &[0]));
        ic.input(&mut nt, NodeKey::Peer(STA), Frame::new(b), RxInfo::default(), &mut drv);
        assert_eq!(ic.pssta, 0);
        assert_eq!(drv.tim, [(1, false)]);
        assert_eq!(drv.pwrsave.len(), 1);
    }

    #[test]
    fn test_monitor_mode_taps_only() {
        let (mut ic, mut nt, mut drv) = sta();
        ic.opmode = OpMode::Monitor;
        ic.input(&mut nt, NodeKey::Bss, from_ds(1, false), RxInfo::default(), &mut drv);
        assert_eq!(drv.raw, 1);
        assert!(drv.delivered.is_empty());
    }
}

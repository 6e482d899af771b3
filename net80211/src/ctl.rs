//! Control frame handlers: PS-Poll and Block Ack Request.

use crate::ba::{BaState, Released, BA_MULTI_TID};
use crate::dprintln;
use crate::driver::{ActionTx, Driver};
use crate::frame::{Frame, ReasonCode};
use crate::ic::{Ieee80211Com, IcCaps, OpMode, AID_MASK};
use crate::mac::{seq_lt, MacAddress, FC1_MORE_DATA};
use crate::node::{Node, NodeFlags, NodeKey, NodeState, NodeTable, NUM_TID};
use crate::util::le16;

/// fc, aid, bssid, ta
const PSPOLL_LEN: usize = 16;
/// fc, duration, ra, ta, control
const BAR_MIN_LEN: usize = 18;

impl Ieee80211Com {
    /// A dozing station polls for one saved frame.
    pub(crate) fn recv_pspoll<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        frame: &Frame,
        drv: &mut D,
    ) {
        if self.opmode != OpMode::HostAp || !self.caps.contains(IcCaps::APPMGT) {
            return;
        }
        let bss_bssid = nt.bss().bssid;
        let Some(ni) = nt.get_mut(key) else { return };
        if ni.state != NodeState::Assoc {
            return;
        }
        let b = frame.as_slice();
        if b.len() < PSPOLL_LEN {
            dprintln!("frame too short, len {}", b.len());
            self.stats.rx_tooshort += 1;
            return;
        }
        if MacAddress::from_slice(&b[4..10]) != Some(bss_bssid) {
            dprintln!("discard pspoll frame to BSS {:02x?}", &b[4..10]);
            self.stats.rx_wrongbss += 1;
            return;
        }
        // senders differ on setting the two top bits of the AID field
        let aid = le16(b, 2);
        if aid & AID_MASK != ni.associd & AID_MASK {
            dprintln!("invalid pspoll aid {:#x} from {}", aid, ni.macaddr);
            return;
        }

        let Some(mut m) = ni.savedq.pop_front() else { return };
        if ni.savedq.is_empty() {
            // last saved frame
            drv.set_tim(ni.associd & AID_MASK, false);
        } else {
            m.set_fc1(FC1_MORE_DATA);
        }
        drv.enqueue_pwrsave(ni, m);
    }

    /// Block Ack Request: move the reorder window forward to the
    /// starting sequence number of each named TID.
    pub(crate) fn recv_bar<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        frame: &Frame,
        drv: &mut D,
        out: &mut Released,
    ) {
        let now = drv.uptime_us();
        let Some(ni) = nt.get_mut(key) else { return };
        if !ni.flags.contains(NodeFlags::HT) {
            return;
        }
        let b = frame.as_slice();
        if b.len() < BAR_MIN_LEN + 2 {
            dprintln!("frame too short, len {}", b.len());
            self.stats.rx_tooshort += 1;
            return;
        }
        let ctl = le16(b, 16);
        let tid = (ctl >> 12) as usize;
        if ctl & BA_MULTI_TID == 0 {
            let ssn = le16(b, 18) >> 4;
            self.bar_tid(ni, tid, ssn, now, drv, out);
            return;
        }

        // one TID info and starting sequence control per TID
        let ntids = tid + 1;
        if b.len() < BAR_MIN_LEN + 4 * ntids {
            dprintln!("MTBAR frame too short, len {}", b.len());
            self.stats.rx_tooshort += 1;
            return;
        }
        for i in 0..ntids {
            let off = BAR_MIN_LEN + 4 * i;
            let tid = (le16(b, off) >> 12) as usize;
            let ssn = le16(b, off + 2) >> 4;
            self.bar_tid(ni, tid, ssn, now, drv, out);
        }
    }

    fn bar_tid<D: Driver + ?Sized>(
        &mut self,
        ni: &mut Node,
        tid: usize,
        ssn: u16,
        now: u64,
        drv: &mut D,
        out: &mut Released,
    ) {
        debug_assert!(tid < NUM_TID);
        let pbac = ni.pbac();
        let ba = &mut ni.rx_ba[tid];
        if ba.state != BaState::Agreed {
            let tx = ActionTx::Delba { tid: tid as u8, reason: ReasonCode::SetupRequired, initiator: false };
            let _ = drv.send_action(ni, tx);
            return;
        }
        if pbac {
            // the window only moves on ADDBA requests
            if seq_lt(ssn, ba.winstart) || seq_lt(ba.winend, ssn) {
                self.stats.pbac_errs += 1;
            }
            return;
        }
        ba.touch(now);
        if seq_lt(ba.winstart, ssn) {
            dprintln!("BAR moves window, tid {} ssn {} -> {}", tid, ba.winstart, ssn);
            ba.move_window(ssn, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ba::ADDBA_BA_POLICY;
    use crate::config::Config;
    use crate::driver::fake::FakeDriver;
    use crate::frame::{EtherHeader, RxInfo};
    use crate::ic::State;
    use crate::rsn::RsnCaps;
    use alloc::vec;
    use alloc::vec::Vec;

    const AP: MacAddress = MacAddress([2, 0, 0, 0, 0, 1]);
    const STA: MacAddress = MacAddress([2, 0, 0, 0, 0, 2]);

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
        ni.associd = 0xc003;
        ni.port_valid = true;
        ni.flags |= NodeFlags::HT;
        (ic, nt, FakeDriver::default())
    }

    fn pspoll(aid: u16, bssid: MacAddress) -> Frame {
        let mut b = vec![0xa4, 0x00];
        b.extend_from_slice(&aid.to_le_bytes());
        b.extend_from_slice(bssid.as_bytes());
        b.extend_from_slice(STA.as_bytes());
        Frame::new(b)
    }

    fn bar(ctl: u16, ssc: &[(u16, u16)]) -> Frame {
        let mut b = vec![0x84, 0x00, 0, 0];
        b.extend_from_slice(AP.as_bytes());
        b.extend_from_slice(STA.as_bytes());
        b.extend_from_slice(&ctl.to_le_bytes());
        if ctl & BA_MULTI_TID == 0 {
            b.extend_from_slice(&(ssc[0].1 << 4).to_le_bytes());
        } else {
            for &(tid, ssn) in ssc {
                b.extend_from_slice(&(tid << 12).to_le_bytes());
                b.extend_from_slice(&(ssn << 4).to_le_bytes());
            }
        }
        Frame::new(b)
    }

    fn qos_data(tid: u16, sn: u16) -> Frame {
        let mut b = vec![0x88, 0x01, 0, 0];
        b.extend_from_slice(AP.as_bytes());
        b.extend_from_slice(STA.as_bytes());
        b.extend_from_slice(AP.as_bytes());
        b.extend_from_slice(&(sn << 4).to_le_bytes());
        b.extend_from_slice(&tid.to_le_bytes());
        b.extend_from_slice(&[0xaa, 0xaa, 0x03, 0, 0, 0, 0x08, 0x00]);
        b.extend_from_slice(&sn.to_be_bytes());
        Frame::new(b)
    }

    fn agree(nt: &mut NodeTable, tid: usize, ssn: u16) {
        let ba = &mut nt.get_mut(NodeKey::Peer(STA)).unwrap().rx_ba[tid];
        ba.setup(ssn, 8, ADDBA_BA_POLICY, 0).unwrap();
        ba.state = BaState::Agreed;
    }

    fn input(ic: &mut Ieee80211Com, nt: &mut NodeTable, f: Frame, drv: &mut FakeDriver) {
        ic.input(nt, NodeKey::Peer(STA), f, RxInfo::default(), drv);
    }

    fn delivered_sns(drv: &FakeDriver) -> Vec<u16> {
        drv.delivered
            .iter()
            .map(|(_, f)| {
                let b = f.as_slice();
                assert!(EtherHeader::parse(b).is_some());
                u16::from_be_bytes([b[14], b[15]])
            })
            .collect()
    }

    #[test]
    fn test_pspoll_releases_saved_frames() {
        let (mut ic, mut nt, mut drv) = hostap();
        let ni = nt.get_mut(NodeKey::Peer(STA)).unwrap();
        ni.savedq.push_back(Frame::new(vec![0x08, 0x00, 0, 0]));
        ni.savedq.push_back(Frame::new(vec![0x08, 0x00, 0, 0]));

        input(&mut ic, &mut nt, pspoll(0xc003, AP), &mut drv);
        assert_eq!(drv.pwrsave.len(), 1);
        assert_ne!(drv.pwrsave[0].1.as_slice()[1] & FC1_MORE_DATA, 0);
        assert!(drv.tim.is_empty());

        input(&mut ic, &mut nt, pspoll(0x0003, AP), &mut drv);
        assert_eq!(drv.pwrsave.len(), 2);
        assert_eq!(drv.pwrsave[1].1.as_slice()[1] & FC1_MORE_DATA, 0);
        assert_eq!(drv.tim, [(3, false)]);

        // nothing left
        input(&mut ic, &mut nt, pspoll(0xc003, AP), &mut drv);
        assert_eq!(drv.pwrsave.len(), 2);
        assert_eq!(ic.stats.rx_ctl, 3);
    }

    #[test]
    fn test_pspoll_checks() {
        let (mut ic, mut nt, mut drv) = hostap();
        nt.get_mut(NodeKey::Peer(STA)).unwrap().savedq.push_back(Frame::new(vec![0x08, 0x00]));

        input(&mut ic, &mut nt, pspoll(0xc003, STA), &mut drv);
        assert_eq!(ic.stats.rx_wrongbss, 1);
        input(&mut ic, &mut nt, pspoll(0xc004, AP), &mut drv);
        assert!(drv.pwrsave.is_empty());

        let mut f = pspoll(0xc003, AP);
        f.truncate(14);
        input(&mut ic, &mut nt, f, &mut drv);
        assert_eq!(ic.stats.rx_tooshort, 1);
        assert!(drv.pwrsave.is_empty());
    }

    #[test]
    fn test_pspoll_aid_top_bits_ignored() {
        let (mut ic, mut nt, mut drv) = hostap();
        let ni = nt.get_mut(NodeKey::Peer(STA)).unwrap();
        for _ in 0..3 {
            ni.savedq.push_back(Frame::new(vec![0x08, 0x00, 0, 0]));
        }

        input(&mut ic, &mut nt, pspoll(0x0003, AP), &mut drv);
        input(&mut ic, &mut nt, pspoll(0x4003, AP), &mut drv);
        assert_eq!(drv.pwrsave.len(), 2);

        // a different AID under the same top bits is refused
        input(&mut ic, &mut nt, pspoll(0x0103, AP), &mut drv);
        input(&mut ic, &mut nt, pspoll(0xc083, AP), &mut drv);
        assert_eq!(drv.pwrsave.len(), 2);
        assert_eq!(nt.get(NodeKey::Peer(STA)).unwrap().savedq.len(), 1);
    }

    #[test]
    fn test_bar_moves_window() {
        let (mut ic, mut nt, mut drv) = hostap();
        agree(&mut nt, 2, 10);
        input(&mut ic, &mut nt, qos_data(2, 11), &mut drv);
        input(&mut ic, &mut nt, qos_data(2, 13), &mut drv);
        assert!(drv.delivered.is_empty());

        // sn 10 and 12 are given up on
        input(&mut ic, &mut nt, bar(2 << 12, &[(2, 12)]), &mut drv);
        assert_eq!(delivered_sns(&drv), [11]);
        input(&mut ic, &mut nt, bar(2 << 12, &[(2, 14)]), &mut drv);
        assert_eq!(delivered_sns(&drv), [11, 13]);
        assert_eq!(nt.get(NodeKey::Peer(STA)).unwrap().rx_ba[2].winstart, 14);

        // an old SSN does not move the window back
        input(&mut ic, &mut nt, bar(2 << 12, &[(2, 3)]), &mut drv);
        assert_eq!(nt.get(NodeKey::Peer(STA)).unwrap().rx_ba[2].winstart, 14);
    }

    #[test]
    fn test_bar_without_agreement() {
        let (mut ic, mut nt, mut drv) = hostap();
        input(&mut ic, &mut nt, bar(6 << 12, &[(6, 0)]), &mut drv);
        assert_eq!(
            drv.actions,
            [(STA, ActionTx::Delba { tid: 6, reason: ReasonCode::SetupRequired, initiator: false })]
        );
    }

    #[test]
    fn test_multi_tid_bar() {
        let (mut ic, mut nt, mut drv) = hostap();
        agree(&mut nt, 0, 0);
        agree(&mut nt, 5, 100);
        // TID_INFO of a multi-TID BAR holds the TID count minus one
        input(&mut ic, &mut nt, bar((1 << 12) | BA_MULTI_TID, &[(0, 20), (5, 150)]), &mut drv);
        let ni = nt.get(NodeKey::Peer(STA)).unwrap();
        assert_eq!(ni.rx_ba[0].winstart, 20);
        assert_eq!(ni.rx_ba[5].winstart, 150);

        let mut f = bar((3 << 12) | BA_MULTI_TID, &[(0, 30)]);
        f.truncate(f.len() - 1);
        input(&mut ic, &mut nt, f, &mut drv);
        assert_eq!(ic.stats.rx_tooshort, 1);
        assert_eq!(nt.get(NodeKey::Peer(STA)).unwrap().rx_ba[0].winstart, 20);
    }

    #[test]
    fn test_bar_under_pbac() {
        let (mut ic, mut nt, mut drv) = hostap();
        let ni = nt.get_mut(NodeKey::Peer(STA)).unwrap();
        ni.flags |= NodeFlags::MFP;
        ni.rsncaps = RsnCaps::PBAC;
        agree(&mut nt, 1, 50);

        input(&mut ic, &mut nt, bar(1 << 12, &[(1, 54)]), &mut drv);
        assert_eq!(ic.stats.pbac_errs, 0);
        input(&mut ic, &mut nt, bar(1 << 12, &[(1, 90)]), &mut drv);
        assert_eq!(ic.stats.pbac_errs, 1);
        assert_eq!(nt.get(NodeKey::Peer(STA)).unwrap().rx_ba[1].winstart, 50);
    }
}

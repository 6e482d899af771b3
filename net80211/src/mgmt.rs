//! Management frame handlers
//!
//! A received management body is decoded once into [`MgmtBody`], then a
//! single match hands it to the handler for its subtype. Decoding only
//! checks the fixed fields; element contents are validated by the
//! handlers, which know what they need.

use alloc::vec::Vec;

use crate::ba::{
    BaState, Released, ADDBA_AMSDU, ADDBA_BA_POLICY, ADDBA_BUFSZ_MASK, ADDBA_BUFSZ_SHIFT,
    ADDBA_TID_MASK, ADDBA_TID_SHIFT, DELBA_INITIATOR,
};
use crate::dprintln;
use crate::driver::{
    ActionTx, Driver, MgmtTx, ACTION_ADDBA_REQ, ACTION_ADDBA_RESP, ACTION_DELBA,
    ACTION_SA_QUERY_REQ, ACTION_SA_QUERY_RESP, CATEG_BA, CATEG_SA_QUERY,
};
use crate::frame::{Frame, ReasonCode, RxInfo, StatusCode};
use crate::ic::{
    Ieee80211Com, IcCaps, IcFlags, OpMode, PhyMode, State, CAPINFO_ESS, CAPINFO_SHORT_PREAMBLE,
    CAPINFO_SHORT_SLOTTIME, DUR_TU, ERP_USE_PROTECTION, HTCAP_DELAYEDBA,
};
use crate::ie::{EdcaParams, Element, Elements, HtCaps, HtOp, RateFlags, RateSet};
use crate::mac::{seq_lt, MacHeader, MgmtSubtype};
use crate::node::{Node, NodeFlags, NodeKey, NodeState, NodeTable};
use crate::rsn::{parse_rsn, parse_wpa, Cipher, RSN_MIN_LEN, WPA_MIN_LEN, RsnCaps, RsnParams, RsnProtos};
use crate::util::le16;

/// Open System authentication
pub const AUTH_ALG_OPEN: u16 = 0;

/// Fixed fields of a beacon or probe response.
#[derive(Debug, Clone)]
pub struct BeaconBody<'a> {
    pub tstamp: [u8; 8],
    pub intval: u16,
    pub capinfo: u16,
    pub elems: Elements<'a>,
}

/// Decoded action frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    AddbaReq { token: u8, params: u16, timeout: u16, ssn: u16 },
    AddbaResp { token: u8, status: StatusCode, params: u16, timeout: u16 },
    Delba { params: u16, reason: ReasonCode },
    SaQueryReq { trid: u16 },
    SaQueryResp { trid: u16 },
    Unknown { category: u8, action: u8 },
}

impl Action {
    /// `None` when the body is shorter than its action requires.
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < 2 {
            return None;
        }
        let need = |n: usize| (body.len() >= n).then_some(());
        let action = match (body[0], body[1]) {
            (CATEG_BA, ACTION_ADDBA_REQ) => {
                need(9)?;
                Action::AddbaReq {
                    token: body[2],
                    params: le16(body, 3),
                    timeout: le16(body, 5),
                    ssn: le16(body, 7) >> 4,
                }
            }
            (CATEG_BA, ACTION_ADDBA_RESP) => {
                need(9)?;
                Action::AddbaResp {
                    token: body[2],
                    status: StatusCode::from_raw(le16(body, 3)),
                    params: le16(body, 5),
                    timeout: le16(body, 7),
                }
            }
            (CATEG_BA, ACTION_DELBA) => {
                need(6)?;
                Action::Delba { params: le16(body, 2), reason: ReasonCode::from_raw(le16(body, 4)) }
            }
            (CATEG_SA_QUERY, ACTION_SA_QUERY_REQ) => {
                need(4)?;
                Action::SaQueryReq { trid: le16(body, 2) }
            }
            (CATEG_SA_QUERY, ACTION_SA_QUERY_RESP) => {
                need(4)?;
                Action::SaQueryResp { trid: le16(body, 2) }
            }
            (category, action) => Action::Unknown { category, action },
        };
        Some(action)
    }
}

/// Management frame body, one variant per handled subtype.
#[derive(Debug, Clone)]
pub enum MgmtBody<'a> {
    Beacon(BeaconBody<'a>),
    ProbeResp(BeaconBody<'a>),
    ProbeReq(Elements<'a>),
    Auth { algo: u16, seq: u16, status: StatusCode },
    AssocReq { reassoc: bool, capinfo: u16, intval: u16, elems: Elements<'a> },
    AssocResp { reassoc: bool, capinfo: u16, status: StatusCode, associd: u16, elems: Elements<'a> },
    Deauth(ReasonCode),
    Disassoc(ReasonCode),
    Action(Action),
    /// Subtypes nobody handles on receive.
    Unhandled(MgmtSubtype),
}

impl<'a> MgmtBody<'a> {
    /// Decode the fixed fields of `body`. `None` when they are truncated.
    pub fn parse(subtype: MgmtSubtype, body: &'a [u8]) -> Option<Self> {
        let need = |n: usize| (body.len() >= n).then_some(());
        let beacon = move || -> Option<BeaconBody<'a>> {
            need(12)?;
            let mut tstamp = [0u8; 8];
            tstamp.copy_from_slice(&body[..8]);
            Some(BeaconBody {
                tstamp,
                intval: le16(body, 8),
                capinfo: le16(body, 10),
                elems: Elements::parse(&body[12..]),
            })
        };
        let mb = match subtype {
            MgmtSubtype::Beacon => MgmtBody::Beacon(beacon()?),
            MgmtSubtype::ProbeResp => MgmtBody::ProbeResp(beacon()?),
            MgmtSubtype::ProbeReq => MgmtBody::ProbeReq(Elements::parse(body)),
            MgmtSubtype::Auth => {
                need(6)?;
                MgmtBody::Auth {
                    algo: le16(body, 0),
                    seq: le16(body, 2),
                    status: StatusCode::from_raw(le16(body, 4)),
                }
            }
            MgmtSubtype::AssocReq | MgmtSubtype::ReassocReq => {
                let reassoc = subtype == MgmtSubtype::ReassocReq;
                // reassociation carries the current AP address
                let fixed = if reassoc { 10 } else { 4 };
                need(fixed)?;
                MgmtBody::AssocReq {
                    reassoc,
                    capinfo: le16(body, 0),
                    intval: le16(body, 2),
                    elems: Elements::parse(&body[fixed..]),
                }
            }
            MgmtSubtype::AssocResp | MgmtSubtype::ReassocResp => {
                need(6)?;
                MgmtBody::AssocResp {
                    reassoc: subtype == MgmtSubtype::ReassocResp,
                    capinfo: le16(body, 0),
                    status: StatusCode::from_raw(le16(body, 2)),
                    associd: le16(body, 4),
                    elems: Elements::parse(&body[6..]),
                }
            }
            MgmtSubtype::Deauth => {
                need(2)?;
                MgmtBody::Deauth(ReasonCode::from_raw(le16(body, 0)))
            }
            MgmtSubtype::Disassoc => {
                need(2)?;
                MgmtBody::Disassoc(ReasonCode::from_raw(le16(body, 0)))
            }
            MgmtSubtype::Action => MgmtBody::Action(Action::parse(body)?),
            other => MgmtBody::Unhandled(other),
        };
        Some(mb)
    }
}

/// Copy of an element including its id and length octets.
fn save_ie(ie: &Element<'_>) -> Vec<u8> {
    let mut v = Vec::with_capacity(2 + ie.data.len());
    v.push(ie.id);
    v.push(ie.data.len() as u8);
    v.extend_from_slice(ie.data);
    v
}

/// Pick the RSN or WPA element of an association request and check it
/// against the BSS policy.
fn select_rsn<'a>(
    ic: &mut Ieee80211Com,
    bss: &Node,
    e: &Elements<'a>,
) -> Result<(RsnProtos, Element<'a>, RsnParams), StatusCode> {
    let (protos, ie, p) = match (e.rsn, e.wpa) {
        (Some(ie), _) if ic.rsnprotos.contains(RsnProtos::RSN) => {
            (RsnProtos::RSN, ie, ic.rsn_params(RsnProtos::RSN, &ie)?)
        }
        (_, Some(ie)) if ic.rsnprotos.contains(RsnProtos::WPA) => {
            (RsnProtos::WPA, ie, ic.rsn_params(RsnProtos::WPA, &ie)?)
        }
        _ => return Err(StatusCode::IeInvalid),
    };
    if p.nakms != 1 || !p.akms.intersects(bss.rsnakms) {
        return Err(StatusCode::BadAkmp);
    }
    if p.nciphers != 1 || !p.ciphers.intersects(bss.rsnciphers) {
        return Err(StatusCode::BadPairwiseCipher);
    }
    if p.group_cipher != bss.rsngroupcipher {
        return Err(StatusCode::BadGroupCipher);
    }
    if bss.rsncaps.contains(RsnCaps::MFPR) && !p.caps.contains(RsnCaps::MFPC) {
        return Err(StatusCode::MfpPolicy);
    }
    // MFPR without MFPC is an invalid combination
    if bss.rsncaps.contains(RsnCaps::MFPC)
        && p.caps & (RsnCaps::MFPC | RsnCaps::MFPR) == RsnCaps::MFPR
    {
        return Err(StatusCode::MfpPolicy);
    }
    if p.caps.contains(RsnCaps::MFPC)
        && (p.ciphers != Cipher::CCMP || p.group_mgmt_cipher != bss.rsngroupmgmtcipher)
    {
        return Err(StatusCode::MfpPolicy);
    }
    if ic.flags.contains(IcFlags::COUNTERM)
        && (p.ciphers == Cipher::TKIP || p.group_cipher == Cipher::TKIP)
    {
        return Err(StatusCode::CipherRejPolicy);
    }
    Ok((protos, ie, p))
}

impl Ieee80211Com {
    /// Dispatch a management frame that passed the input checks.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn recv_mgmt<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        frame: &Frame,
        rxi: &RxInfo,
        subtype: MgmtSubtype,
        drv: &mut D,
        out: &mut Released,
    ) {
        let Some(wh) = frame.header() else { return };
        let Some(body) = MgmtBody::parse(subtype, frame.body(wh.header_len())) else {
            dprintln!("{} frame too short", subtype.name());
            return;
        };
        match body {
            MgmtBody::Beacon(b) => self.recv_beacon(nt, &wh, &b, rxi, false, drv),
            MgmtBody::ProbeResp(b) => self.recv_beacon(nt, &wh, &b, rxi, true, drv),
            MgmtBody::ProbeReq(e) => self.recv_probe_req(nt, key, &wh, &e, rxi, drv),
            MgmtBody::Auth { algo, seq, status } => self.recv_auth(nt, key, &wh, algo, seq, status, drv),
            MgmtBody::AssocReq { reassoc, capinfo, intval, elems } => {
                self.recv_assoc_req(nt, key, &wh, reassoc, capinfo, intval, &elems, rxi, drv)
            }
            MgmtBody::AssocResp { reassoc, capinfo, status, associd, elems } => {
                self.recv_assoc_resp(nt, key, &wh, reassoc, capinfo, status, associd, &elems, drv)
            }
            MgmtBody::Deauth(reason) => self.recv_deauth(nt, key, reason, drv),
            MgmtBody::Disassoc(reason) => self.recv_disassoc(nt, key, reason, drv),
            MgmtBody::Action(action) => self.recv_action(nt, key, action, drv, out),
            MgmtBody::Unhandled(st) => {
                dprintln!("mgmt frame with subtype {} not handled", st.name());
                self.stats.rx_badsubtype += 1;
            }
        }
    }

    fn count_toosmall(&mut self, e: &Elements<'_>) {
        self.stats.rx_elem_toosmall += u64::from(e.toosmall);
    }

    /// EDCA parameters from the EDCA element, else from the WMM one.
    fn edca_params(&mut self, e: &Elements<'_>) -> Option<EdcaParams> {
        if let Some(ie) = &e.edca {
            match EdcaParams::from_edca(ie) {
                Some(p) => return Some(p),
                None => self.stats.rx_elem_toosmall += 1,
            }
        }
        let ie = e.wmm.as_ref()?;
        let p = EdcaParams::from_wmm(ie);
        if p.is_none() {
            self.stats.rx_elem_toosmall += 1;
        }
        p
    }

    fn rsn_params(&mut self, protos: RsnProtos, ie: &Element<'_>) -> Result<RsnParams, StatusCode> {
        let (min, parse): (usize, fn(&Element<'_>) -> Result<RsnParams, StatusCode>) =
            if protos == RsnProtos::WPA { (WPA_MIN_LEN, parse_wpa) } else { (RSN_MIN_LEN, parse_rsn) };
        if ie.data.len() < min {
            self.stats.rx_elem_toosmall += 1;
        }
        parse(ie)
    }

    /// Beacons and probe responses: scan results, neighbor discovery and
    /// BSS parameter tracking while associated.
    fn recv_beacon<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        wh: &MacHeader,
        b: &BeaconBody<'_>,
        rxi: &RxInfo,
        isprobe: bool,
        drv: &mut D,
    ) {
        let e = &b.elems;
        let what = if isprobe { "probe response" } else { "beacon" };
        self.count_toosmall(e);
        let (Some(rates), Some(ssid)) = (e.rates, e.ssid) else {
            dprintln!("{} without rates or SSID", what);
            return;
        };
        if !e.rates_ok() || !e.ssid_ok() {
            dprintln!("invalid rates or SSID element in {}", what);
            return;
        }

        let bchan = nt.bss().chan;
        let chan = e.chan.unwrap_or(bchan);
        if !self.chan_active.contains(chan) {
            dprintln!("ignore {} with invalid channel {}", what, chan);
            self.stats.rx_badchan += 1;
            return;
        }
        if (self.state != State::Scan || !self.caps.contains(IcCaps::SCANALL)) && chan != bchan {
            // signal leaking from a neighboring channel
            dprintln!("ignore {} on channel {} marked for channel {}", what, bchan, chan);
            self.stats.rx_chanmismatch += 1;
            return;
        }
        if nt.find_node_for_beacon(&wh.addr2, chan, rxi.rssi) {
            return;
        }

        let (key, is_new) = match nt.find_node(&wh.addr2) {
            Some(k) => (k, false),
            None => match nt.alloc_node(wh.addr2) {
                Some(k) => (k, true),
                None => return,
            },
        };
        let Some(ni) = nt.get_mut(key) else { return };

        let prev_htprot = ni.htop.map_or(0, |h| h.protection());
        if let Some(h) = e.htcaps.and_then(HtCaps::parse) {
            ni.htcaps = Some(h);
        }
        let htop = e.htop.and_then(HtOp::parse);
        if let Some(h) = htop {
            ni.htop = Some(h);
        }

        let erp = e.erp.unwrap_or(0);
        if self.opmode == OpMode::Sta && self.state == State::Run && ni.state == NodeState::Bss {
            if ni.erp != erp {
                dprintln!("[{}] erp change: was {:#x}, now {:#x}", wh.addr2, ni.erp, erp);
                let prot = self.curmode == PhyMode::Mode11g && erp & ERP_USE_PROTECTION != 0;
                self.flags.set(IcFlags::USEPROT, prot);
                ni.erp = erp;
            }
            if let Some(h) = htop {
                if ni.flags.contains(NodeFlags::HT) && prev_htprot != h.protection() {
                    dprintln!("[{}] htprot change: was {}, now {}", wh.addr2, prev_htprot, h.protection());
                    drv.update_htprot(ni);
                }
            }
            if (ni.capinfo ^ b.capinfo) & CAPINFO_SHORT_SLOTTIME != 0 {
                let short = self.curmode == PhyMode::Mode11a || b.capinfo & CAPINFO_SHORT_SLOTTIME != 0;
                self.set_shortslottime(short, drv);
            }
        }

        // EDCA parameters only matter if QoS was negotiated at association
        if ni.flags.contains(NodeFlags::QOS) {
            let params = self.edca_params(e);
            match params {
                Some(p) => self.apply_edca(&p, drv),
                None => ni.flags.remove(NodeFlags::QOS),
            }
        }

        if self.state == State::Scan && self.opmode != OpMode::HostAp {
            // with both RSN and WPA advertised, keep the newest we support
            let parsed = match (e.rsn, e.wpa) {
                (Some(ie), _) if self.rsnprotos.contains(RsnProtos::RSN) => {
                    self.rsn_params(RsnProtos::RSN, &ie).ok().map(|p| (RsnProtos::RSN, ie, p))
                }
                (_, Some(ie)) if self.rsnprotos.contains(RsnProtos::WPA) => {
                    self.rsn_params(RsnProtos::WPA, &ie).ok().map(|p| (RsnProtos::WPA, ie, p))
                }
                _ => None,
            };
            match parsed {
                Some((protos, ie, p)) => {
                    ni.rsnprotos = protos;
                    ni.rsnie = save_ie(&ie);
                    ni.rsnakms = p.akms;
                    ni.rsnciphers = p.ciphers;
                    ni.rsngroupcipher = p.group_cipher;
                    ni.rsngroupmgmtcipher = p.group_mgmt_cipher;
                    ni.rsncaps = p.caps;
                }
                None => ni.rsnprotos = RsnProtos::empty(),
            }
        }

        if !ssid.is_empty() && ni.essid.is_empty() {
            ni.essid = ssid.to_vec();
        }
        ni.bssid = wh.addr3;
        ni.rssi = rxi.rssi;
        ni.rstamp = rxi.tstamp;
        ni.tstamp = b.tstamp;
        ni.intval = b.intval;
        ni.capinfo = b.capinfo;
        ni.chan = chan;
        ni.erp = erp;
        if let Ok(rs) = RateSet::negotiate(rates, e.xrates, &self.sup_rates, RateFlags::DOSORT) {
            ni.rates = rs;
        }

        if self.opmode == OpMode::Ibss && is_new && isprobe {
            // no handshake in IBSS; let the driver set up its state
            drv.newassoc(ni, true);
        }
    }

    fn recv_probe_req<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        wh: &MacHeader,
        e: &Elements<'_>,
        rxi: &RxInfo,
        drv: &mut D,
    ) {
        if self.opmode == OpMode::Sta || self.state != State::Run {
            return;
        }
        self.count_toosmall(e);
        let (Some(rates), Some(ssid)) = (e.rates, e.ssid) else {
            dprintln!("probe request without rates or SSID");
            return;
        };
        if !e.rates_ok() || !e.ssid_ok() {
            dprintln!("invalid rates or SSID element in probe request");
            return;
        }
        if !ssid.is_empty() && ssid != nt.bss().essid.as_slice() {
            dprintln!("SSID mismatch");
            self.stats.rx_ssidmismatch += 1;
            return;
        }
        if ssid.is_empty() && self.flags.contains(IcFlags::HIDENWID) {
            dprintln!("wildcard SSID rejected");
            self.stats.rx_ssidmismatch += 1;
            return;
        }

        let key = if key == NodeKey::Bss {
            match nt.find_or_dup(wh.addr2) {
                Some(k) => k,
                None => return,
            }
        } else {
            key
        };
        let Some(ni) = nt.get_mut(key) else { return };
        ni.rssi = rxi.rssi;
        ni.rstamp = rxi.tstamp;
        let flags = RateFlags::DOSORT | RateFlags::DONEGO | RateFlags::DODEL;
        match RateSet::negotiate(rates, e.xrates, &self.sup_rates, flags) {
            Ok(rs) => ni.rates = rs,
            Err(rate) => {
                dprintln!("rate mismatch for {} ({:#x})", wh.addr2, rate);
                return;
            }
        }
        if let Some(h) = e.htcaps.and_then(HtCaps::parse) {
            ni.htcaps = Some(h);
        }
        let _ = drv.send_mgmt(ni, MgmtTx::ProbeResp);
    }

    #[allow(clippy::too_many_arguments)]
    fn recv_auth<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        wh: &MacHeader,
        algo: u16,
        seq: u16,
        status: StatusCode,
        drv: &mut D,
    ) {
        dprintln!("auth {} seq {} from {}", algo, seq, wh.addr2);
        if algo != AUTH_ALG_OPEN {
            dprintln!("unsupported auth algorithm {} from {}", algo, wh.addr2);
            self.stats.rx_auth_unsupported += 1;
            if self.opmode == OpMode::HostAp {
                let key = if key == NodeKey::Bss { nt.find_or_dup(wh.addr2) } else { Some(key) };
                if let Some(ni) = key.and_then(|k| nt.get(k)) {
                    let tx = MgmtTx::Auth { seq: seq.wrapping_add(1), status: StatusCode::Alg };
                    let _ = drv.send_mgmt(ni, tx);
                }
            }
            return;
        }

        match self.opmode {
            OpMode::HostAp | OpMode::Ibss => {
                if self.state != State::Run || seq != 1 {
                    dprintln!("discard auth seq {} from {}", seq, wh.addr2);
                    return;
                }
                let key = if key == NodeKey::Bss {
                    match nt.find_or_dup(wh.addr2) {
                        Some(k) => k,
                        None => return,
                    }
                } else {
                    key
                };
                let hostap = self.opmode == OpMode::HostAp;
                let Some(ni) = nt.get_mut(key) else { return };
                if ni.is_bss() {
                    return;
                }
                if hostap {
                    ni.state = NodeState::Auth;
                }
                dprintln!("station {} authenticated (open)", ni.macaddr);
                let _ = drv.send_mgmt(ni, MgmtTx::Auth { seq: 2, status: StatusCode::Success });
            }
            OpMode::Sta => {
                if self.state != State::Auth || seq != 2 {
                    return;
                }
                if !status.is_success() {
                    if let Some(ni) = nt.get_mut(key) {
                        if !ni.is_bss() {
                            ni.fails += 1;
                        }
                    }
                    dprintln!("open authentication failed (status {:?}) for {}", status, wh.addr3);
                    self.stats.rx_auth_fail += 1;
                    self.new_state(State::Scan, drv);
                    return;
                }
                self.new_state(State::Assoc, drv);
            }
            OpMode::AhDemo | OpMode::Monitor => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn recv_assoc_req<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        wh: &MacHeader,
        reassoc: bool,
        capinfo: u16,
        intval: u16,
        e: &Elements<'_>,
        rxi: &RxInfo,
        drv: &mut D,
    ) {
        if self.opmode != OpMode::HostAp || self.state != State::Run {
            return;
        }
        if wh.addr3 != nt.bss().bssid {
            dprintln!("ignore other bss from {}", wh.addr2);
            self.stats.rx_assoc_bss += 1;
            return;
        }
        self.count_toosmall(e);
        if !e.rates_ok() || !e.ssid_ok() {
            dprintln!("invalid rates or SSID element in assoc request");
            return;
        }
        if e.ssid.unwrap_or_default() != nt.bss().essid.as_slice() {
            dprintln!("SSID mismatch");
            self.stats.rx_ssidmismatch += 1;
            return;
        }

        let Some(state) = nt.get(key).map(|n| n.state) else { return };
        if !matches!(state, NodeState::Auth | NodeState::Assoc) {
            dprintln!("deny {}assoc from {}, not authenticated", if reassoc { "re" } else { "" }, wh.addr2);
            if let Some(ni) = nt.find_or_dup(wh.addr2).and_then(|k| nt.get(k)) {
                let _ = drv.send_mgmt(ni, MgmtTx::Deauth(ReasonCode::AssocNotAuthed));
            }
            self.stats.rx_assoc_notauth += 1;
            return;
        }

        let Some(ni) = nt.get_mut(key) else { return };
        if ni.state == NodeState::Assoc && ni.flags.contains(NodeFlags::MFP) {
            if ni.flags.contains(NodeFlags::SA_QUERY_FAILED) {
                // the old SA is gone
                let _ = drv.send_mgmt(ni, MgmtTx::Disassoc(ReasonCode::AuthExpire));
                self.node_leave(nt, key, drv);
            } else {
                let tx = MgmtTx::AssocResp { reassoc, status: StatusCode::TryAgainLater, associd: 0 };
                let _ = drv.send_mgmt(ni, tx);
                if !ni.flags.contains(NodeFlags::SA_QUERY) {
                    self.sa_query_request(ni, drv);
                }
            }
            return;
        }

        match self.assoc_req_admit(nt, key, capinfo, intval, e, rxi) {
            Ok(()) => self.node_join(nt, key, reassoc, drv),
            Err(status) => {
                dprintln!("refuse {}assoc from {}: {:?}", if reassoc { "re" } else { "" }, wh.addr2, status);
                if let Some(ni) = nt.get(key) {
                    let _ = drv.send_mgmt(ni, MgmtTx::AssocResp { reassoc, status, associd: 0 });
                }
                self.node_leave(nt, key, drv);
            }
        }
    }

    /// Capability, rate and security checks of an association request.
    /// On success the node carries the negotiated parameters.
    fn assoc_req_admit(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        capinfo: u16,
        intval: u16,
        e: &Elements<'_>,
        rxi: &RxInfo,
    ) -> Result<(), StatusCode> {
        if capinfo & CAPINFO_ESS == 0 {
            self.stats.rx_assoc_capmismatch += 1;
            return Err(StatusCode::Capinfo);
        }
        let flags = RateFlags::DOSORT | RateFlags::DONEGO | RateFlags::DODEL;
        let rates = match RateSet::negotiate(e.rates.unwrap_or_default(), e.xrates, &self.sup_rates, flags) {
            Ok(rs) => rs,
            Err(_) => {
                self.stats.rx_assoc_norate += 1;
                return Err(StatusCode::BasicRate);
            }
        };

        let bss = nt.bss();
        let (bss_chan, bss_group, bss_group_mgmt) = (bss.chan, bss.rsngroupcipher, bss.rsngroupmgmtcipher);
        let rsn = if self.flags.contains(IcFlags::RSNON) {
            Some(select_rsn(self, bss, e)?)
        } else {
            None
        };

        let Some(addr) = nt.get(key).map(|n| n.macaddr) else {
            return Err(StatusCode::Unspecified);
        };
        let pmkid = match &rsn {
            Some((_, _, p)) if p.akms.is_8021x() => {
                p.pmkids.iter().find_map(|id| self.pmksa_find(&addr, id)).map(|pmk| pmk.pmkid)
            }
            _ => None,
        };

        let Some(ni) = nt.get_mut(key) else {
            return Err(StatusCode::Unspecified);
        };
        ni.rates = rates;
        match rsn {
            Some((protos, ie, p)) => {
                ni.rsnprotos = protos;
                ni.rsnie = save_ie(&ie);
                ni.rsnakms = p.akms;
                ni.rsnciphers = p.ciphers;
                ni.rsngroupcipher = bss_group;
                ni.rsngroupmgmtcipher = bss_group_mgmt;
                ni.rsncaps = p.caps;
                if let Some(id) = pmkid {
                    ni.pmkid = Some(id);
                    ni.flags |= NodeFlags::PMK;
                }
            }
            None => ni.rsnprotos = RsnProtos::empty(),
        }
        ni.rssi = rxi.rssi;
        ni.rstamp = rxi.tstamp;
        ni.intval = intval;
        ni.capinfo = capinfo;
        ni.chan = bss_chan;
        if let Some(h) = e.htcaps.and_then(HtCaps::parse) {
            ni.htcaps = Some(h);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn recv_assoc_resp<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        wh: &MacHeader,
        reassoc: bool,
        capinfo: u16,
        status: StatusCode,
        associd: u16,
        e: &Elements<'_>,
        drv: &mut D,
    ) {
        if self.opmode != OpMode::Sta || self.state != State::Assoc {
            self.stats.rx_mgtdiscard += 1;
            return;
        }
        let Some(ni) = nt.get_mut(key) else { return };
        if !status.is_success() {
            dprintln!("{}association failed (status {:?}) for {}", if reassoc { "re" } else { "" }, status, wh.addr3);
            if !ni.is_bss() {
                ni.fails += 1;
            }
            self.stats.rx_auth_fail += 1;
            return;
        }
        self.count_toosmall(e);
        let Some(rates) = e.rates.filter(|_| e.rates_ok()) else {
            dprintln!("invalid supported rates element");
            return;
        };
        let flags = RateFlags::DOSORT | RateFlags::DONEGO | RateFlags::DODEL;
        match RateSet::negotiate(rates, e.xrates, &self.sup_rates, flags) {
            Ok(rs) => ni.rates = rs,
            Err(_) => {
                dprintln!("rate mismatch for {}", wh.addr2);
                self.stats.rx_assoc_norate += 1;
                return;
            }
        }
        ni.capinfo = capinfo;
        ni.associd = associd;

        if e.edca.is_some() || e.wmm.is_some() {
            // force the parameters in
            self.edca_updtcount = None;
            let params = self.edca_params(e);
            match params {
                Some(p) => {
                    self.apply_edca(&p, drv);
                    ni.flags |= NodeFlags::QOS;
                }
                None => ni.flags.remove(NodeFlags::QOS),
            }
        }
        if let Some(h) = e.htcaps.and_then(HtCaps::parse) {
            ni.htcaps = Some(h);
        }
        if let Some(h) = e.htop.and_then(HtOp::parse) {
            ni.htop = Some(h);
        }
        let ht = self.flags.contains(IcFlags::HTON) && ni.htcaps.is_some();
        ni.flags.set(NodeFlags::HT, ht);

        let chan_2ghz = ni.chan <= 14;
        self.curmode = if ht {
            PhyMode::Mode11n
        } else if chan_2ghz {
            PhyMode::Mode11g
        } else {
            PhyMode::Mode11a
        };
        let is_11a = self.curmode == PhyMode::Mode11a;
        self.flags.set(IcFlags::SHPREAMBLE, is_11a || capinfo & CAPINFO_SHORT_PREAMBLE != 0);
        self.set_shortslottime(is_11a || capinfo & CAPINFO_SHORT_SLOTTIME != 0, drv);
        let erp_mode = self.curmode == PhyMode::Mode11g || (self.curmode == PhyMode::Mode11n && chan_2ghz);
        self.flags.set(IcFlags::USEPROT, erp_mode && ni.erp & ERP_USE_PROTECTION != 0);

        // an RSNA waits for the 4-way handshake instead
        if !self.flags.contains(IcFlags::RSNON) && self.flags.contains(IcFlags::WEPON) {
            ni.flags |= NodeFlags::TXRXPROT;
        }
        self.new_state(State::Run, drv);
    }

    fn recv_deauth<D: Driver + ?Sized>(&mut self, nt: &mut NodeTable, key: NodeKey, reason: ReasonCode, drv: &mut D) {
        self.stats.rx_deauth += 1;
        match self.opmode {
            OpMode::Sta => self.new_state(State::Auth, drv),
            OpMode::HostAp if key != NodeKey::Bss => {
                if let Some(ni) = nt.get(key) {
                    dprintln!("station {} deauthenticated by peer (reason {:?})", ni.macaddr, reason);
                }
                self.node_leave(nt, key, drv);
            }
            _ => {}
        }
    }

    fn recv_disassoc<D: Driver + ?Sized>(&mut self, nt: &mut NodeTable, key: NodeKey, reason: ReasonCode, drv: &mut D) {
        self.stats.rx_disassoc += 1;
        match self.opmode {
            OpMode::Sta => self.new_state(State::Assoc, drv),
            OpMode::HostAp if key != NodeKey::Bss => {
                if let Some(ni) = nt.get(key) {
                    dprintln!("station {} disassociated by peer (reason {:?})", ni.macaddr, reason);
                }
                self.node_leave(nt, key, drv);
            }
            _ => {}
        }
    }

    fn recv_action<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        action: Action,
        drv: &mut D,
        out: &mut Released,
    ) {
        match action {
            Action::AddbaReq { token, params, timeout, ssn } => {
                self.recv_addba_req(nt, key, token, params, timeout, ssn, drv, out)
            }
            Action::AddbaResp { token, status, params, .. } => {
                self.recv_addba_resp(nt, key, token, status, params, drv)
            }
            Action::Delba { params, reason } => self.recv_delba(nt, key, params, reason, drv),
            Action::SaQueryReq { trid } => self.recv_sa_query_req(nt, key, trid, drv),
            Action::SaQueryResp { trid } => self.recv_sa_query_resp(nt, key, trid),
            Action::Unknown { category, action } => {
                dprintln!("action frame category {} action {} not handled", category, action);
            }
        }
    }

    /// Peer asks for a receive Block Ack agreement.
    #[allow(clippy::too_many_arguments)]
    fn recv_addba_req<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        token: u8,
        params: u16,
        timeout: u16,
        ssn: u16,
        drv: &mut D,
        out: &mut Released,
    ) {
        let now = drv.uptime_us();
        let Some(ni) = nt.get_mut(key) else { return };
        if !ni.flags.contains(NodeFlags::HT) {
            dprintln!("received ADDBA req from non-HT STA {}", ni.macaddr);
            return;
        }
        let tid = ((params & ADDBA_TID_MASK) >> ADDBA_TID_SHIFT) as usize;
        let bufsz = (params & ADDBA_BUFSZ_MASK) >> ADDBA_BUFSZ_SHIFT;
        let pbac = ni.pbac();

        let ba = &mut ni.rx_ba[tid];
        if ba.state == BaState::Agreed {
            ba.touch(now);
            // under PBAC an ADDBA request doubles as BlockAckReq
            if pbac && seq_lt(ba.winstart, ssn) {
                ba.move_window(ssn, out);
            }
            return;
        }

        let status = if self.flags.contains(IcFlags::PBAR) && !pbac {
            StatusCode::Refused
        } else if self.tid_noack & (1 << tid) != 0 {
            StatusCode::Refused
        } else if self.htcaps & HTCAP_DELAYEDBA == 0 && params & ADDBA_BA_POLICY == 0 {
            StatusCode::InvalidParam
        } else {
            let max = self.config.ba.max_winsize;
            let winsize = if bufsz == 0 || bufsz > max { max } else { bufsz };
            let ba_params = (params & ADDBA_BA_POLICY)
                | (winsize << ADDBA_BUFSZ_SHIFT)
                | ((tid as u16) << ADDBA_TID_SHIFT)
                | ADDBA_AMSDU;
            if ni.rx_ba[tid].setup(ssn, winsize, ba_params, u64::from(timeout) * DUR_TU).is_err() {
                StatusCode::Refused
            } else if drv.ampdu_rx_start(ni, tid as u8).is_err() {
                dprintln!("driver refused rx aggregation, tid {}", tid);
                ni.rx_ba[tid].teardown();
                StatusCode::Refused
            } else {
                let ba = &mut ni.rx_ba[tid];
                ba.state = BaState::Agreed;
                ba.touch(now);
                StatusCode::Success
            }
        };
        let _ = drv.send_action(ni, ActionTx::AddbaResp { tid: tid as u8, token, status });
    }

    /// Answer to one of our ADDBA requests.
    fn recv_addba_resp<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        token: u8,
        status: StatusCode,
        params: u16,
        drv: &mut D,
    ) {
        let now = drv.uptime_us();
        let Some(ni) = nt.get_mut(key) else { return };
        let tid = ((params >> 2) & 0xf) as usize;
        dprintln!("received ADDBA resp from {}, TID {}, status {:?}", ni.macaddr, tid, status);

        let ba = &mut ni.tx_ba[tid];
        if ba.state != BaState::Requested {
            dprintln!("no matching ADDBA req found");
            return;
        }
        if token != ba.token {
            dprintln!("ignoring ADDBA resp from {}: token {:#x}!={:#x}", ni.macaddr, token, ba.token);
            return;
        }
        ba.to.cancel();
        if !status.is_success() {
            ba.state = BaState::Init;
            return;
        }
        ba.state = BaState::Agreed;
        if ba.timeout_val_us != 0 {
            ba.to.arm(now, ba.timeout_val_us);
        }
        drv.ampdu_tx_start(ni, tid as u8);
    }

    fn recv_delba<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        params: u16,
        reason: ReasonCode,
        drv: &mut D,
    ) {
        let Some(ni) = nt.get_mut(key) else { return };
        let tid = (params >> 12) as usize;
        dprintln!("received DELBA from {}, TID {}, reason {:?}", ni.macaddr, tid, reason);

        if params & DELBA_INITIATOR != 0 {
            // the originator ends our receive agreement
            if ni.rx_ba[tid].state != BaState::Agreed {
                dprintln!("no matching Block Ack agreement");
                return;
            }
            drv.ampdu_rx_stop(ni, tid as u8);
            let dropped = ni.rx_ba[tid].teardown();
            if dropped > 0 {
                dprintln!("{} buffered frames dropped", dropped);
            }
        } else {
            if ni.tx_ba[tid].state != BaState::Agreed {
                dprintln!("no matching Block Ack agreement");
                return;
            }
            drv.ampdu_tx_stop(ni, tid as u8);
            let ba = &mut ni.tx_ba[tid];
            ba.state = BaState::Init;
            ba.to.cancel();
        }
    }

    fn recv_sa_query_req<D: Driver + ?Sized>(&mut self, nt: &mut NodeTable, key: NodeKey, trid: u16, drv: &mut D) {
        let Some(ni) = nt.get_mut(key) else { return };
        if self.opmode != OpMode::Sta || !ni.flags.contains(NodeFlags::MFP) {
            dprintln!("unexpected SA Query req from {}", ni.macaddr);
            return;
        }
        ni.sa_query_trid = trid;
        let _ = drv.send_action(ni, ActionTx::SaQueryResp { trid });
    }

    fn recv_sa_query_resp(&mut self, nt: &mut NodeTable, key: NodeKey, trid: u16) {
        let Some(ni) = nt.get_mut(key) else { return };
        if !ni.flags.contains(NodeFlags::SA_QUERY) {
            dprintln!("unexpected SA Query resp from {}", ni.macaddr);
            return;
        }
        if ni.sa_query_trid != trid {
            dprintln!("transaction identifier does not match");
            return;
        }
        ni.sa_query_to.cancel();
        ni.flags.remove(NodeFlags::SA_QUERY);
    }
}

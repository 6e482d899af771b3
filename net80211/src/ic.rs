//! Per-interface 802.11 context
//!
//! `Ieee80211Com` carries the operating mode and state, feature flags,
//! receive statistics and the defragmentation cache of one interface.
//! The receive path, the management handlers and the timers are all
//! methods on it.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use bitflags::bitflags;

use crate::ba::{BaState, Released, BA_MAX_WINSZ};
use crate::config::Config;
use crate::defrag::DefragCache;
use crate::dprintln;
use crate::driver::{ActionTx, Driver, MgmtTx};
use crate::frame::{ReasonCode, StatusCode};
use crate::ie::{EdcaAc, EdcaParams, RateSet, EDCA_NUM_AC};
use crate::mac::MacAddress;
use crate::node::{Node, NodeFlags, NodeKey, NodeState, NodeTable, PowerSave, NUM_TID};
use crate::rsn::{RsnCaps, RsnProtos, PMKID_LEN};
use crate::stats::Stats;
use crate::util::{KError, KResult};

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    Sta,
    Ibss,
    /// Ad-hoc without management frames
    AhDemo,
    HostAp,
    Monitor,
}

/// Interface state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Init,
    Scan,
    Auth,
    Assoc,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhyMode {
    #[default]
    Auto,
    Mode11a,
    Mode11b,
    Mode11g,
    Mode11n,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IcFlags: u32 {
        const WEPON = 1 << 0;
        const RSNON = 1 << 1;
        const QOS = 1 << 2;
        const HTON = 1 << 3;
        /// Require protected block ack from peers.
        const PBAR = 1 << 4;
        const HIDENWID = 1 << 5;
        /// Do not bridge frames between stations.
        const NOBRIDGE = 1 << 6;
        /// TKIP countermeasures active.
        const COUNTERM = 1 << 7;
        const USEPROT = 1 << 8;
        const SHPREAMBLE = 1 << 9;
        const SHSLOT = 1 << 10;
        const SIMPLEX = 1 << 11;
        const DEBUG = 1 << 12;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IcCaps: u32 {
        /// AP power save management.
        const APPMGT = 1 << 0;
        /// Hardware scans all channels without retuning.
        const SCANALL = 1 << 1;
    }
}

/// Capability information field
pub const CAPINFO_ESS: u16 = 0x0001;
pub const CAPINFO_IBSS: u16 = 0x0002;
pub const CAPINFO_PRIVACY: u16 = 0x0010;
pub const CAPINFO_SHORT_PREAMBLE: u16 = 0x0020;
pub const CAPINFO_SHORT_SLOTTIME: u16 = 0x0400;

pub const ERP_USE_PROTECTION: u8 = 0x02;

pub const HTCAP_DELAYEDBA: u16 = 0x0400;

/// Time unit in microseconds
pub const DUR_TU: u64 = 1024;

/// Association IDs carry the two top bits set on the air.
pub const AID_MASK: u16 = 0x3fff;

/// Channels usable on this interface, as a 256-bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelSet([u64; 4]);

impl ChannelSet {
    pub fn set(&mut self, chan: u8) {
        self.0[chan as usize / 64] |= 1 << (chan % 64);
    }

    pub fn clear(&mut self, chan: u8) {
        self.0[chan as usize / 64] &= !(1 << (chan % 64));
    }

    pub fn contains(&self, chan: u8) -> bool {
        self.0[chan as usize / 64] & (1 << (chan % 64)) != 0
    }
}

impl FromIterator<u8> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        let mut s = ChannelSet::default();
        for c in iter {
            s.set(c);
        }
        s
    }
}

/// Cached PMK security association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmk {
    pub macaddr: MacAddress,
    pub pmkid: [u8; PMKID_LEN],
}

pub struct Ieee80211Com {
    pub opmode: OpMode,
    pub state: State,
    pub flags: IcFlags,
    pub caps: IcCaps,
    pub htcaps: u16,
    pub curmode: PhyMode,
    pub myaddr: MacAddress,
    pub sup_rates: RateSet,
    pub chan_active: ChannelSet,
    pub rsnprotos: RsnProtos,
    /// TIDs configured with a no-ack policy
    pub tid_noack: u16,
    pub edca_updtcount: Option<u8>,
    pub edca_ac: [EdcaAc; EDCA_NUM_AC],
    /// Stations in power save
    pub pssta: u32,
    pub pmksa: Vec<Pmk>,
    pub stats: Stats,
    pub config: Config,
    pub(crate) defrag: DefragCache,
    next_token: u8,
    next_trid: u16,
}

impl Ieee80211Com {
    pub fn new(opmode: OpMode, myaddr: MacAddress, config: Config) -> Self {
        Ieee80211Com {
            opmode,
            state: State::Init,
            flags: IcFlags::empty(),
            caps: IcCaps::empty(),
            htcaps: 0,
            curmode: PhyMode::Auto,
            myaddr,
            sup_rates: RateSet::default_11g(),
            chan_active: (1..=14).collect(),
            rsnprotos: RsnProtos::RSN,
            tid_noack: 0,
            edca_updtcount: None,
            edca_ac: [EdcaAc::default(); EDCA_NUM_AC],
            pssta: 0,
            pmksa: Vec::new(),
            stats: Stats::default(),
            defrag: DefragCache::new(config.defrag_lifetime_us),
            config,
            next_token: 0,
            next_trid: 0,
        }
    }

    pub fn new_state<D: Driver + ?Sized>(&mut self, next: State, drv: &mut D) {
        let prev = self.state;
        if prev == next {
            return;
        }
        dprintln!("state {:?} -> {:?}", prev, next);
        self.state = next;
        drv.new_state(prev, next);
    }

    /// Apply an EDCA parameter set unless its update count is unchanged.
    pub fn apply_edca<D: Driver + ?Sized>(&mut self, p: &EdcaParams, drv: &mut D) {
        if self.edca_updtcount == Some(p.updtcount) {
            return;
        }
        self.edca_updtcount = Some(p.updtcount);
        self.edca_ac = p.ac;
        if self.flags.contains(IcFlags::QOS) {
            drv.update_edca(&self.edca_ac);
        }
    }

    pub fn set_shortslottime<D: Driver + ?Sized>(&mut self, on: bool, drv: &mut D) {
        self.flags.set(IcFlags::SHSLOT, on);
        drv.update_slot(on);
    }

    pub fn pmksa_find(&self, addr: &MacAddress, pmkid: &[u8; PMKID_LEN]) -> Option<&Pmk> {
        self.pmksa.iter().find(|p| p.macaddr == *addr && p.pmkid == *pmkid)
    }

    /// Admit an authenticated station: allocate its association ID, set
    /// up protection state and answer the (re)association request.
    pub fn node_join<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        reassoc: bool,
        drv: &mut D,
    ) {
        let aid = match nt.get(key) {
            Some(ni) if ni.associd != 0 => Some(ni.associd),
            Some(_) => nt.free_associd().map(|a| a | 0xc000),
            None => return,
        };
        let Some(aid) = aid else {
            dprintln!("no association id left");
            if let Some(ni) = nt.get(key) {
                let _ = drv.send_mgmt(ni, MgmtTx::AssocResp { reassoc, status: StatusCode::TooMany, associd: 0 });
            }
            self.node_leave(nt, key, drv);
            return;
        };
        let bss_caps = nt.bss().rsncaps;
        let rsn = self.flags.contains(IcFlags::RSNON);
        let wep = self.flags.contains(IcFlags::WEPON);
        let ht = self.flags.contains(IcFlags::HTON);
        let Some(ni) = nt.get_mut(key) else { return };

        let is_new = ni.state != NodeState::Assoc;
        ni.associd = aid;
        ni.state = NodeState::Assoc;
        ni.inact = 0;
        ni.flags.remove(NodeFlags::SA_QUERY | NodeFlags::SA_QUERY_FAILED);
        ni.sa_query_to.cancel();
        if rsn {
            ni.port_valid = false;
            if ni.rsnprotos == RsnProtos::RSN
                && bss_caps.contains(RsnCaps::MFPC)
                && ni.rsncaps.contains(RsnCaps::MFPC)
            {
                ni.flags |= NodeFlags::MFP;
            }
        } else {
            ni.port_valid = true;
            if wep {
                ni.flags |= NodeFlags::TXRXPROT;
            }
        }
        ni.flags.set(NodeFlags::HT, ht && ni.htcaps.is_some());

        dprintln!("station {} {}associated, aid {}", ni.macaddr, if is_new { "" } else { "re" }, aid & AID_MASK);
        let _ = drv.send_mgmt(ni, MgmtTx::AssocResp { reassoc, status: StatusCode::Success, associd: aid });
        drv.newassoc(ni, is_new);
    }

    /// Drop a station from the BSS. Its Block Ack agreements and saved
    /// frames go with it; the record is reclaimed by `run_timers`.
    pub fn node_leave<D: Driver + ?Sized>(&mut self, nt: &mut NodeTable, key: NodeKey, drv: &mut D) {
        if key == NodeKey::Bss {
            return;
        }
        let Some(ni) = nt.get_mut(key) else { return };
        if ni.pwrsave == PowerSave::Doze {
            ni.pwrsave = PowerSave::Awake;
            self.pssta = self.pssta.saturating_sub(1);
        }
        for tid in 0..NUM_TID {
            if ni.rx_ba[tid].state == BaState::Agreed {
                drv.ampdu_rx_stop(ni, tid as u8);
            }
            ni.rx_ba[tid].teardown();
            if ni.tx_ba[tid].state == BaState::Agreed {
                drv.ampdu_tx_stop(ni, tid as u8);
            }
            ni.tx_ba[tid].state = BaState::Init;
            ni.tx_ba[tid].to.cancel();
        }
        ni.savedq = VecDeque::new();
        if ni.associd != 0 {
            drv.set_tim(ni.associd & AID_MASK, false);
        }
        ni.associd = 0;
        ni.state = NodeState::Collect;
        ni.port_valid = false;
        ni.flags.remove(
            NodeFlags::TXRXPROT
                | NodeFlags::MFP
                | NodeFlags::RXMGMTPROT
                | NodeFlags::TXMGMTPROT
                | NodeFlags::SA_QUERY
                | NodeFlags::SA_QUERY_FAILED
                | NodeFlags::PMK,
        );
        ni.sa_query_to.cancel();
        dprintln!("station {} left", ni.macaddr);
        drv.node_leave(ni);
    }

    /// Ask `key` for a Block Ack agreement on `tid`, our traffic starting
    /// at `ssn`.
    pub fn addba_request<D: Driver + ?Sized>(
        &mut self,
        nt: &mut NodeTable,
        key: NodeKey,
        tid: u8,
        ssn: u16,
        drv: &mut D,
    ) -> KResult<()> {
        let now = drv.uptime_us();
        let ni = nt.get_mut(key).ok_or(KError::NotFound)?;
        if tid as usize >= NUM_TID || !ni.flags.contains(NodeFlags::HT) {
            return Err(KError::Invalid);
        }
        let ba = &mut ni.tx_ba[tid as usize];
        if ba.state != BaState::Init {
            return Err(KError::Busy);
        }
        self.next_token = self.next_token.wrapping_add(1);
        let token = self.next_token;
        ba.state = BaState::Requested;
        ba.token = token;
        ba.winstart = ssn;
        ba.winsize = BA_MAX_WINSZ;
        ba.timeout_val_us = 0;
        ba.to.arm(now, self.config.addba_resp_timeout_us);
        let tx = ActionTx::AddbaReq { tid, token, ssn, winsize: BA_MAX_WINSZ, timeout_tu: 0 };
        let res = drv.send_action(ni, tx);
        if res.is_err() {
            let ba = &mut ni.tx_ba[tid as usize];
            ba.state = BaState::Init;
            ba.to.cancel();
        }
        res
    }

    /// Start (or restart) an SA Query with `ni`.
    pub fn sa_query_request<D: Driver + ?Sized>(&mut self, ni: &mut Node, drv: &mut D) {
        let now = drv.uptime_us();
        self.next_trid = self.next_trid.wrapping_add(1);
        ni.sa_query_trid = self.next_trid;
        if !ni.flags.contains(NodeFlags::SA_QUERY) {
            ni.sa_query_count = 0;
        }
        ni.sa_query_count += 1;
        ni.flags.insert(NodeFlags::SA_QUERY);
        ni.flags.remove(NodeFlags::SA_QUERY_FAILED);
        ni.sa_query_to.arm(now, self.config.sa_query_timeout_us);
        let _ = drv.send_action(ni, ActionTx::SaQueryReq { trid: ni.sa_query_trid });
    }

    /// Fire every expired timer. Frames released from reorder buffers
    /// are pushed back through the receive path.
    pub fn run_timers<D: Driver + ?Sized>(&mut self, nt: &mut NodeTable, drv: &mut D) {
        let now = drv.uptime_us();
        let n = self.defrag.expire(now);
        if n > 0 {
            dprintln!("{} reassemblies expired", n);
        }

        let mut redeliver: Vec<(NodeKey, Released)> = Vec::new();
        let mut reclaim = Vec::new();
        for key in nt.keys() {
            let Some(ni) = nt.get_mut(key) else { continue };
            if ni.state == NodeState::Collect {
                reclaim.push(ni.macaddr);
                continue;
            }
            let mut out = Released::new();
            for tid in 0..NUM_TID {
                let ba = &mut ni.rx_ba[tid];
                if ba.gap_to.fire(now) {
                    dprintln!("reorder gap timeout, tid {}", tid);
                    ba.gap_timeout(&mut out);
                }
                if ba.to.fire(now) && ba.state == BaState::Agreed {
                    dprintln!("rx block ack inactivity timeout, tid {}", tid);
                    let tx = ActionTx::Delba { tid: tid as u8, reason: ReasonCode::Timeout, initiator: false };
                    let _ = drv.send_action(ni, tx);
                    drv.ampdu_rx_stop(ni, tid as u8);
                    ni.rx_ba[tid].teardown();
                }

                let ba = &mut ni.tx_ba[tid];
                if ba.to.fire(now) {
                    match ba.state {
                        BaState::Requested => {
                            dprintln!("no ADDBA response, tid {}", tid);
                            ba.state = BaState::Init;
                        }
                        BaState::Agreed => {
                            ba.state = BaState::Init;
                            let tx = ActionTx::Delba { tid: tid as u8, reason: ReasonCode::Timeout, initiator: true };
                            let _ = drv.send_action(ni, tx);
                            drv.ampdu_tx_stop(ni, tid as u8);
                        }
                        BaState::Init => {}
                    }
                }
            }
            if !out.is_empty() {
                redeliver.push((key, out));
            }

            if ni.sa_query_to.fire(now) && ni.flags.contains(NodeFlags::SA_QUERY) {
                if ni.sa_query_count >= self.config.sa_query_max_count {
                    dprintln!("SA Query with {} failed", ni.macaddr);
                    ni.flags.remove(NodeFlags::SA_QUERY);
                    ni.flags.insert(NodeFlags::SA_QUERY_FAILED);
                } else {
                    self.sa_query_request(ni, drv);
                }
            }
        }

        for addr in reclaim {
            nt.remove_node(&addr);
        }
        for (key, frames) in redeliver {
            for (frame, rxi) in frames {
                self.input(nt, key, frame, rxi, drv);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;

    fn peer() -> MacAddress {
        MacAddress([2, 0, 0, 0, 0, 7])
    }

    fn setup() -> (Ieee80211Com, NodeTable, FakeDriver) {
        let me = MacAddress([2, 0, 0, 0, 0, 1]);
        let mut ic = Ieee80211Com::new(OpMode::HostAp, me, Config::default());
        ic.flags |= IcFlags::HTON;
        let mut bss = Node::new(me);
        bss.bssid = me;
        let nt = NodeTable::new(bss, 8);
        (ic, nt, FakeDriver::default())
    }

    #[test]
    fn test_channel_set() {
        let mut s: ChannelSet = [1u8, 6, 149].into_iter().collect();
        assert!(s.contains(149));
        assert!(!s.contains(2));
        s.clear(6);
        assert!(!s.contains(6));
    }

    #[test]
    fn test_node_join_assigns_aid() {
        let (mut ic, mut nt, mut drv) = setup();
        let key = nt.dup_bss(peer()).unwrap();
        nt.get_mut(key).unwrap().state = NodeState::Auth;
        ic.node_join(&mut nt, key, false, &mut drv);
        let ni = nt.get(key).unwrap();
        assert_eq!(ni.state, NodeState::Assoc);
        assert_eq!(ni.associd, 0xc001);
        assert!(ni.port_valid);
        assert_eq!(
            drv.mgmt,
            [(peer(), MgmtTx::AssocResp { reassoc: false, status: StatusCode::Success, associd: 0xc001 })]
        );
    }

    #[test]
    fn test_node_leave_reclaimed() {
        let (mut ic, mut nt, mut drv) = setup();
        let key = nt.dup_bss(peer()).unwrap();
        ic.node_join(&mut nt, key, false, &mut drv);
        ic.node_leave(&mut nt, key, &mut drv);
        assert_eq!(nt.get(key).unwrap().state, NodeState::Collect);
        assert_eq!(drv.left, [peer()]);
        ic.run_timers(&mut nt, &mut drv);
        assert!(nt.get(key).is_none());
    }

    #[test]
    fn test_addba_request_times_out() {
        let (mut ic, mut nt, mut drv) = setup();
        let key = nt.dup_bss(peer()).unwrap();
        nt.get_mut(key).unwrap().flags |= NodeFlags::HT;
        ic.addba_request(&mut nt, key, 5, 100, &mut drv).unwrap();
        assert_eq!(ic.addba_request(&mut nt, key, 5, 100, &mut drv), Err(KError::Busy));
        assert_eq!(nt.get(key).unwrap().tx_ba[5].state, BaState::Requested);

        drv.now = ic.config.addba_resp_timeout_us;
        ic.run_timers(&mut nt, &mut drv);
        assert_eq!(nt.get(key).unwrap().tx_ba[5].state, BaState::Init);
    }

    #[test]
    fn test_sa_query_fails_after_retries() {
        let (mut ic, mut nt, mut drv) = setup();
        let key = nt.dup_bss(peer()).unwrap();
        let ni = nt.get_mut(key).unwrap();
        ic.sa_query_request(ni, &mut drv);
        for i in 1..=3u64 {
            drv.now = i * ic.config.sa_query_timeout_us;
            ic.run_timers(&mut nt, &mut drv);
        }
        let ni = nt.get(key).unwrap();
        assert!(ni.flags.contains(NodeFlags::SA_QUERY_FAILED));
        assert!(!ni.flags.contains(NodeFlags::SA_QUERY));
        assert_eq!(drv.actions.len(), 3);
    }

    #[test]
    fn test_edca_update_count_gates() {
        let (mut ic, _, mut drv) = setup();
        let mut p = EdcaParams::default();
        p.updtcount = 3;
        p.ac[0].aifsn = 7;
        ic.apply_edca(&p, &mut drv);
        assert_eq!(ic.edca_ac[0].aifsn, 7);
        p.ac[0].aifsn = 2;
        ic.apply_edca(&p, &mut drv);
        assert_eq!(ic.edca_ac[0].aifsn, 7);
    }
}

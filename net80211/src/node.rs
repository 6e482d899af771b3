//! Peer records
//!
//! A `Node` holds everything known about one station: association state,
//! negotiated capabilities, per-TID duplicate detection and Block Ack
//! state, and frames saved while it dozes. The `NodeTable` owns every
//! node, including the one describing our own BSS.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use bitflags::bitflags;

use crate::ba::{RxBlockAck, TxBlockAck};
use crate::frame::Frame;
use crate::ie::{HtCaps, HtOp, RateSet};
use crate::mac::MacAddress;
use crate::rsn::{Akm, Cipher, RsnCaps, RsnProtos, PMKID_LEN};
use crate::timer::Timeout;

pub const NUM_TID: usize = 16;

/// Association state of a peer, seen from this interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    /// Known from scanning only.
    #[default]
    Cache,
    /// The node describing our BSS.
    Bss,
    Auth,
    Assoc,
    /// Left the BSS, awaiting reclaim.
    Collect,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u32 {
        const QOS = 1 << 0;
        const HT = 1 << 1;
        /// Management frame protection negotiated.
        const MFP = 1 << 2;
        const RXPROT = 1 << 3;
        const TXPROT = 1 << 4;
        const TXRXPROT = Self::RXPROT.bits() | Self::TXPROT.bits();
        const RXMGMTPROT = 1 << 5;
        const TXMGMTPROT = 1 << 6;
        /// SA Query in progress.
        const SA_QUERY = 1 << 7;
        const SA_QUERY_FAILED = 1 << 8;
        /// A cached PMK was found at association.
        const PMK = 1 << 9;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerSave {
    #[default]
    Awake,
    Doze,
}

#[derive(Debug, Default)]
pub struct Node {
    pub macaddr: MacAddress,
    pub bssid: MacAddress,
    pub essid: Vec<u8>,
    pub chan: u8,
    pub state: NodeState,
    pub flags: NodeFlags,
    pub associd: u16,
    pub capinfo: u16,
    pub intval: u16,
    pub erp: u8,
    pub rssi: i32,
    pub rstamp: u32,
    pub tstamp: [u8; 8],
    pub inact: u32,
    pub fails: u32,
    pub rates: RateSet,
    pub htcaps: Option<HtCaps>,
    pub htop: Option<HtOp>,

    /// Last sequence number seen, non-QoS traffic.
    pub rxseq: Option<u16>,
    /// Last sequence number seen per TID.
    pub qos_rxseqs: [Option<u16>; NUM_TID],
    pub rx_ba: [RxBlockAck; NUM_TID],
    pub tx_ba: [TxBlockAck; NUM_TID],

    pub pwrsave: PowerSave,
    pub savedq: VecDeque<Frame>,

    pub rsnprotos: RsnProtos,
    pub rsnie: Vec<u8>,
    pub rsnakms: Akm,
    pub rsnciphers: Cipher,
    pub rsngroupcipher: Cipher,
    pub rsngroupmgmtcipher: Cipher,
    pub rsncaps: RsnCaps,
    pub pmkid: Option<[u8; PMKID_LEN]>,
    /// 802.1X controlled port open.
    pub port_valid: bool,

    pub sa_query_trid: u16,
    pub sa_query_count: u8,
    pub sa_query_to: Timeout,
}

impl Node {
    pub fn new(macaddr: MacAddress) -> Self {
        Node {
            macaddr,
            rx_ba: core::array::from_fn(|_| RxBlockAck::default()),
            tx_ba: core::array::from_fn(|_| TxBlockAck::default()),
            ..Default::default()
        }
    }

    pub fn is_bss(&self) -> bool {
        self.state == NodeState::Bss
    }

    /// Protected Block Ack agreements in force with this peer.
    pub fn pbac(&self) -> bool {
        self.flags.contains(NodeFlags::MFP) && self.rsncaps.contains(RsnCaps::PBAC)
    }
}

/// Handle for a node passed to the receive path.
///
/// `Bss` stands for "sender unknown": the caller found no node for the
/// transmitter and passes our BSS node instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKey {
    Bss,
    Peer(MacAddress),
}

#[derive(Debug)]
pub struct NodeTable {
    bss: Node,
    nodes: BTreeMap<MacAddress, Node>,
    max_nodes: usize,
}

impl NodeTable {
    pub fn new(bss: Node, max_nodes: usize) -> Self {
        let mut bss = bss;
        bss.state = NodeState::Bss;
        NodeTable { bss, nodes: BTreeMap::new(), max_nodes }
    }

    pub fn bss(&self) -> &Node {
        &self.bss
    }

    pub fn bss_mut(&mut self) -> &mut Node {
        &mut self.bss
    }

    pub fn get(&self, key: NodeKey) -> Option<&Node> {
        match key {
            NodeKey::Bss => Some(&self.bss),
            NodeKey::Peer(a) => self.nodes.get(&a),
        }
    }

    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        match key {
            NodeKey::Bss => Some(&mut self.bss),
            NodeKey::Peer(a) => self.nodes.get_mut(&a),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Key of the node with this address, if known. Our BSS node
    /// answers to its own address.
    pub fn find_node(&self, addr: &MacAddress) -> Option<NodeKey> {
        if self.bss.macaddr == *addr {
            return Some(NodeKey::Bss);
        }
        self.nodes.contains_key(addr).then_some(NodeKey::Peer(*addr))
    }

    /// Add a blank node. Fails when the table is full.
    pub fn alloc_node(&mut self, addr: MacAddress) -> Option<NodeKey> {
        if !self.nodes.contains_key(&addr) && self.nodes.len() >= self.max_nodes {
            return None;
        }
        self.nodes.entry(addr).or_insert_with(|| Node::new(addr));
        Some(NodeKey::Peer(addr))
    }

    /// Add a node inheriting the parameters of our BSS.
    pub fn dup_bss(&mut self, addr: MacAddress) -> Option<NodeKey> {
        let key = self.alloc_node(addr)?;
        let bss = &self.bss;
        if let Some(ni) = self.nodes.get_mut(&addr) {
            ni.bssid = bss.bssid;
            ni.essid = bss.essid.clone();
            ni.chan = bss.chan;
            ni.rates = bss.rates.clone();
            ni.intval = bss.intval;
            ni.capinfo = bss.capinfo;
            ni.rsnprotos = bss.rsnprotos;
            ni.rsnakms = bss.rsnakms;
            ni.rsnciphers = bss.rsnciphers;
            ni.rsngroupcipher = bss.rsngroupcipher;
            ni.rsngroupmgmtcipher = bss.rsngroupmgmtcipher;
        }
        Some(key)
    }

    /// Find or create the node for `addr`, cloning the BSS for new ones.
    pub fn find_or_dup(&mut self, addr: MacAddress) -> Option<NodeKey> {
        self.find_node(&addr).or_else(|| self.dup_bss(addr))
    }

    pub fn remove_node(&mut self, addr: &MacAddress) -> Option<Node> {
        self.nodes.remove(addr)
    }

    /// While scanning, keep only the best copy of an AP: a node already
    /// heard on another channel with at least this signal wins.
    pub fn find_node_for_beacon(&self, addr: &MacAddress, chan: u8, rssi: i32) -> bool {
        matches!(self.nodes.get(addr), Some(ni) if ni.chan != chan && ni.rssi >= rssi)
    }

    /// Lowest association ID not in use.
    pub fn free_associd(&self) -> Option<u16> {
        (1..=2007u16).find(|aid| !self.nodes.values().any(|n| n.associd & 0x3fff == *aid))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        core::iter::once(&self.bss).chain(self.nodes.values())
    }

    /// Keys of all nodes, BSS first.
    pub fn keys(&self) -> Vec<NodeKey> {
        core::iter::once(NodeKey::Bss)
            .chain(self.nodes.keys().map(|a| NodeKey::Peer(*a)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(max: usize) -> NodeTable {
        let mut bss = Node::new(MacAddress([0, 0, 0, 0, 0, 1]));
        bss.bssid = bss.macaddr;
        bss.essid = b"lab".to_vec();
        bss.chan = 6;
        NodeTable::new(bss, max)
    }

    #[test]
    fn test_dup_bss_inherits() {
        let mut nt = table(4);
        let a = MacAddress([2, 0, 0, 0, 0, 9]);
        let key = nt.dup_bss(a).unwrap();
        let ni = nt.get(key).unwrap();
        assert_eq!(ni.essid, b"lab");
        assert_eq!(ni.chan, 6);
        assert_eq!(ni.state, NodeState::Cache);
        assert!(nt.bss().is_bss());
        assert_eq!(nt.find_node(&MacAddress([0, 0, 0, 0, 0, 1])), Some(NodeKey::Bss));
        assert_eq!(nt.find_or_dup(a), Some(key));
    }

    #[test]
    fn test_table_full() {
        let mut nt = table(1);
        assert!(nt.alloc_node(MacAddress([2, 0, 0, 0, 0, 1])).is_some());
        assert!(nt.alloc_node(MacAddress([2, 0, 0, 0, 0, 2])).is_none());
        // existing entries are still reachable
        assert!(nt.alloc_node(MacAddress([2, 0, 0, 0, 0, 1])).is_some());
    }

    #[test]
    fn test_beacon_dedup() {
        let mut nt = table(4);
        let a = MacAddress([2, 0, 0, 0, 0, 3]);
        let key = nt.alloc_node(a).unwrap();
        let ni = nt.get_mut(key).unwrap();
        ni.chan = 1;
        ni.rssi = 40;
        assert!(nt.find_node_for_beacon(&a, 6, 30));
        assert!(!nt.find_node_for_beacon(&a, 6, 50));
        assert!(!nt.find_node_for_beacon(&a, 1, 10));
    }

    #[test]
    fn test_free_associd() {
        let mut nt = table(4);
        let key = nt.alloc_node(MacAddress([2, 0, 0, 0, 0, 4])).unwrap();
        nt.get_mut(key).unwrap().associd = 0xc001;
        assert_eq!(nt.free_associd(), Some(2));
    }
}

//! MAC Address and MAC Header
//!
//! IEEE 802.11 addressing, frame control decoding and 12-bit sequence
//! number arithmetic.

use core::fmt;

use crate::util::le16;

/// IEEE 802.11 MAC Address (6 bytes)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(C)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Broadcast address (FF:FF:FF:FF:FF:FF)
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    /// Zero/null address (00:00:00:00:00:00)
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Create from slice
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 6 {
            let mut addr = [0u8; 6];
            addr.copy_from_slice(&bytes[..6]);
            Some(MacAddress(addr))
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Check if multicast address (bit 0 of first byte set)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2],
            self.0[3], self.0[4], self.0[5]
        )
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

/// Frame type (bits 2-3 of frame control)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Management,
    Control,
    Data,
    Reserved,
}

impl FrameType {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x03 {
            0 => FrameType::Management,
            1 => FrameType::Control,
            2 => FrameType::Data,
            _ => FrameType::Reserved,
        }
    }
}

/// Management frame subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MgmtSubtype {
    AssocReq,
    AssocResp,
    ReassocReq,
    ReassocResp,
    ProbeReq,
    ProbeResp,
    Beacon,
    Atim,
    Disassoc,
    Auth,
    Deauth,
    Action,
    ActionNoAck,
    Reserved(u8),
}

impl MgmtSubtype {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => MgmtSubtype::AssocReq,
            1 => MgmtSubtype::AssocResp,
            2 => MgmtSubtype::ReassocReq,
            3 => MgmtSubtype::ReassocResp,
            4 => MgmtSubtype::ProbeReq,
            5 => MgmtSubtype::ProbeResp,
            8 => MgmtSubtype::Beacon,
            9 => MgmtSubtype::Atim,
            10 => MgmtSubtype::Disassoc,
            11 => MgmtSubtype::Auth,
            12 => MgmtSubtype::Deauth,
            13 => MgmtSubtype::Action,
            14 => MgmtSubtype::ActionNoAck,
            v => MgmtSubtype::Reserved(v),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MgmtSubtype::AssocReq => "assoc_req",
            MgmtSubtype::AssocResp => "assoc_resp",
            MgmtSubtype::ReassocReq => "reassoc_req",
            MgmtSubtype::ReassocResp => "reassoc_resp",
            MgmtSubtype::ProbeReq => "probe_req",
            MgmtSubtype::ProbeResp => "probe_resp",
            MgmtSubtype::Beacon => "beacon",
            MgmtSubtype::Atim => "atim",
            MgmtSubtype::Disassoc => "disassoc",
            MgmtSubtype::Auth => "auth",
            MgmtSubtype::Deauth => "deauth",
            MgmtSubtype::Action => "action",
            MgmtSubtype::ActionNoAck => "action_noack",
            MgmtSubtype::Reserved(_) => "reserved",
        }
    }
}

/// Control frame subtypes handled on receive
pub const CTL_SUBTYPE_BAR: u8 = 8;
pub const CTL_SUBTYPE_BA: u8 = 9;
pub const CTL_SUBTYPE_PS_POLL: u8 = 10;

/// Distribution system direction (to-DS / from-DS bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    NoDs,
    ToDs,
    FromDs,
    DsToDs,
}

/// Frame Control field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameControl(pub u16);

impl FrameControl {
    pub const VERSION_0: u8 = 0;

    pub fn from_bytes(b: [u8; 2]) -> Self {
        FrameControl(u16::from_le_bytes(b))
    }

    pub fn protocol_version(&self) -> u8 {
        (self.0 & 0x03) as u8
    }

    pub fn frame_type(&self) -> FrameType {
        FrameType::from_raw(((self.0 >> 2) & 0x03) as u8)
    }

    pub fn subtype(&self) -> u8 {
        ((self.0 >> 4) & 0x0F) as u8
    }

    pub fn direction(&self) -> Direction {
        match (self.to_ds(), self.from_ds()) {
            (false, false) => Direction::NoDs,
            (true, false) => Direction::ToDs,
            (false, true) => Direction::FromDs,
            (true, true) => Direction::DsToDs,
        }
    }

    pub fn to_ds(&self) -> bool {
        self.0 & (1 << 8) != 0
    }

    pub fn from_ds(&self) -> bool {
        self.0 & (1 << 9) != 0
    }

    pub fn more_fragments(&self) -> bool {
        self.0 & (1 << 10) != 0
    }

    pub fn retry(&self) -> bool {
        self.0 & (1 << 11) != 0
    }

    pub fn power_mgmt(&self) -> bool {
        self.0 & (1 << 12) != 0
    }

    pub fn more_data(&self) -> bool {
        self.0 & (1 << 13) != 0
    }

    pub fn protected(&self) -> bool {
        self.0 & (1 << 14) != 0
    }

    pub fn order(&self) -> bool {
        self.0 & (1 << 15) != 0
    }

    /// QoS data subtypes have bit 3 of the subtype set.
    pub fn has_qos(&self) -> bool {
        self.frame_type() == FrameType::Data && self.subtype() & 0x08 != 0
    }

    pub fn has_addr4(&self) -> bool {
        self.direction() == Direction::DsToDs
    }

    /// HT control is present on ordered QoS data and management frames.
    pub fn has_htc(&self) -> bool {
        self.order() && (self.has_qos() || self.frame_type() == FrameType::Management)
    }

    /// MAC header length implied by this frame control.
    pub fn header_len(&self) -> usize {
        let mut len = MacHeader::BASE_LEN;
        if self.has_addr4() {
            len += 6;
        }
        if self.has_qos() {
            len += 2;
        }
        if self.has_htc() {
            len += 4;
        }
        len
    }
}

/// Frame control flag bits as seen in the second octet.
pub const FC1_MORE_FRAG: u8 = 0x04;
pub const FC1_PWR_MGT: u8 = 0x10;
pub const FC1_MORE_DATA: u8 = 0x20;
pub const FC1_PROTECTED: u8 = 0x40;

/// QoS control field
pub const QOS_TID: u16 = 0x000f;
pub const QOS_ACK_POLICY_MASK: u16 = 0x0060;
pub const QOS_ACK_POLICY_NORMAL: u16 = 0x0000;
pub const QOS_ACK_POLICY_NOACK: u16 = 0x0020;
pub const QOS_ACK_POLICY_NOEXPLICIT: u16 = 0x0040;
pub const QOS_ACK_POLICY_BA: u16 = 0x0060;
pub const QOS_AMSDU: u16 = 0x0080;

/// Decoded MAC header.
///
/// Built from a byte slice only after its length has been checked against
/// the length the frame control implies, so every field is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacHeader {
    pub fc: FrameControl,
    pub duration: u16,
    pub addr1: MacAddress,
    pub addr2: MacAddress,
    pub addr3: MacAddress,
    pub seq_ctrl: u16,
    pub addr4: Option<MacAddress>,
    pub qos: Option<u16>,
}

impl MacHeader {
    /// Three-address header without QoS or HT control.
    pub const BASE_LEN: usize = 24;
    /// Shortest frame that still carries addr1 and addr2.
    pub const MIN_LEN: usize = 16;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }
        let fc = FrameControl::from_bytes([data[0], data[1]]);
        if data.len() < fc.header_len() {
            return None;
        }
        let mut off = Self::BASE_LEN;
        let addr4 = if fc.has_addr4() {
            let a = MacAddress::from_slice(&data[off..])?;
            off += 6;
            Some(a)
        } else {
            None
        };
        let qos = if fc.has_qos() { Some(le16(data, off)) } else { None };

        Some(MacHeader {
            fc,
            duration: le16(data, 2),
            addr1: MacAddress::from_slice(&data[4..])?,
            addr2: MacAddress::from_slice(&data[10..])?,
            addr3: MacAddress::from_slice(&data[16..])?,
            seq_ctrl: le16(data, 22),
            addr4,
            qos,
        })
    }

    pub fn header_len(&self) -> usize {
        self.fc.header_len()
    }

    pub fn seq(&self) -> u16 {
        seq_num(self.seq_ctrl)
    }

    pub fn frag(&self) -> u8 {
        frag_num(self.seq_ctrl)
    }

    pub fn tid(&self) -> Option<u8> {
        self.qos.map(|q| (q & QOS_TID) as u8)
    }
}

pub const SEQ_MASK: u16 = 0x0fff;

/// Sequence number from a sequence control field.
pub fn seq_num(seq_ctrl: u16) -> u16 {
    seq_ctrl >> 4
}

/// Fragment number from a sequence control field.
pub fn frag_num(seq_ctrl: u16) -> u8 {
    (seq_ctrl & 0x000f) as u8
}

/// Modular distance `a - b` in sequence space.
pub fn seq_sub(a: u16, b: u16) -> u16 {
    a.wrapping_sub(b) & SEQ_MASK
}

pub fn seq_add(a: u16, b: u16) -> u16 {
    a.wrapping_add(b) & SEQ_MASK
}

/// `a` precedes `b` in 12-bit sequence space.
pub fn seq_lt(a: u16, b: u16) -> bool {
    seq_sub(a, b) > 2048
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_lt_wraps() {
        assert!(seq_lt(4095, 0));
        assert!(seq_lt(4094, 1));
        assert!(!seq_lt(0, 4095));
        assert!(seq_lt(10, 11));
        assert!(!seq_lt(11, 11));
    }

    #[test]
    fn test_header_len() {
        // plain data
        assert_eq!(FrameControl::from_bytes([0x08, 0x00]).header_len(), 24);
        // QoS data, 4 addresses
        assert_eq!(FrameControl::from_bytes([0x88, 0x03]).header_len(), 32);
        // QoS data with HT control
        assert_eq!(FrameControl::from_bytes([0x88, 0x80]).header_len(), 30);
        // management with order bit
        assert_eq!(FrameControl::from_bytes([0x80, 0x80]).header_len(), 28);
    }

    #[test]
    fn test_parse_qos_header() {
        let mut buf = [0u8; 26];
        buf[0] = 0x88;
        buf[1] = 0x01;
        buf[4..10].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        buf[22] = 0x50; // seq 5, frag 0
        buf[24] = 0x06; // tid 6
        let wh = MacHeader::parse(&buf).unwrap();
        assert_eq!(wh.fc.direction(), Direction::ToDs);
        assert_eq!(wh.seq(), 5);
        assert_eq!(wh.tid(), Some(6));
        assert_eq!(wh.addr1, MacAddress([1, 2, 3, 4, 5, 6]));
        assert!(MacHeader::parse(&buf[..25]).is_none());
    }
}

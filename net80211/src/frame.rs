//! Frame buffers
//!
//! Owned receive buffers, receive metadata and the LLC/SNAP and
//! Ethernet framing used when handing payloads up the stack.

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::mac::{FrameControl, MacAddress, MacHeader};

bitflags! {
    /// Receive status flags set by the driver or by the reorder buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RxFlags: u32 {
        /// Hardware already decrypted the frame.
        const HWDEC = 1 << 0;
        /// Block-Ack reordering already resolved for this frame.
        const AMPDU_DONE = 1 << 1;
    }
}

/// Per-frame receive metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxInfo {
    pub rssi: i32,
    pub tstamp: u32,
    pub flags: RxFlags,
}

/// An owned frame buffer.
///
/// Ownership moves along the receive pipeline; a stage that rejects the
/// frame simply drops it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    data: Vec<u8>,
}

impl Frame {
    pub fn new(data: Vec<u8>) -> Self {
        Frame { data }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Frame { data: data.to_vec() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Frame control, if at least two bytes are present.
    pub fn fc(&self) -> Option<FrameControl> {
        if self.data.len() < 2 {
            return None;
        }
        Some(FrameControl::from_bytes([self.data[0], self.data[1]]))
    }

    /// Validated view of the MAC header.
    pub fn header(&self) -> Option<MacHeader> {
        MacHeader::parse(&self.data)
    }

    /// Bytes following the first `hdrlen` bytes.
    pub fn body(&self, hdrlen: usize) -> &[u8] {
        self.data.get(hdrlen..).unwrap_or(&[])
    }

    /// Drop `n` bytes from the front; clears the buffer if shorter.
    pub fn trim_front(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.drain(..n);
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Split off everything from `at`, leaving `[0, at)` in `self`.
    pub fn split_off(&mut self, at: usize) -> Frame {
        Frame { data: self.data.split_off(at.min(self.data.len())) }
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn set_fc1(&mut self, bits: u8) {
        if let Some(b) = self.data.get_mut(1) {
            *b |= bits;
        }
    }

    pub fn clear_fc1(&mut self, bits: u8) {
        if let Some(b) = self.data.get_mut(1) {
            *b &= !bits;
        }
    }
}

/// LLC/SNAP header length
pub const LLC_SNAP_LEN: usize = 8;

/// LLC header with SNAP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlcHeader {
    pub oui: [u8; 3],
    pub ether_type: u16,
}

impl LlcHeader {
    pub const SNAP: [u8; 3] = [0xAA, 0xAA, 0x03];

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < LLC_SNAP_LEN || data[..3] != Self::SNAP {
            return None;
        }
        Some(LlcHeader {
            oui: [data[3], data[4], data[5]],
            ether_type: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// RFC 1042 encapsulation: the SNAP header can be replaced by an
    /// Ethernet type field.
    pub fn is_rfc1042(&self) -> bool {
        self.oui == [0, 0, 0]
    }
}

pub const ETHER_HDR_LEN: usize = 14;
pub const ETHERTYPE_PAE: u16 = 0x888e;

/// Ethernet header written in front of decapsulated payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtherHeader {
    pub dst: MacAddress,
    pub src: MacAddress,
    pub ether_type: u16,
}

impl EtherHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ETHER_HDR_LEN {
            return None;
        }
        Some(EtherHeader {
            dst: MacAddress::from_slice(&data[0..6])?,
            src: MacAddress::from_slice(&data[6..12])?,
            ether_type: u16::from_be_bytes([data[12], data[13]]),
        })
    }

    /// Builds a frame with this header followed by `payload`.
    pub fn encap(&self, payload: &[u8]) -> Frame {
        let mut data = Vec::with_capacity(ETHER_HDR_LEN + payload.len());
        data.extend_from_slice(self.dst.as_bytes());
        data.extend_from_slice(self.src.as_bytes());
        data.extend_from_slice(&self.ether_type.to_be_bytes());
        data.extend_from_slice(payload);
        Frame::new(data)
    }
}

/// Status codes carried in authentication, association and ADDBA responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Unspecified,
    Capinfo,
    NotAssoced,
    Other,
    Alg,
    Sequence,
    Challenge,
    Timeout,
    TooMany,
    BasicRate,
    TryAgainLater,
    MfpPolicy,
    Refused,
    InvalidParam,
    IeInvalid,
    BadGroupCipher,
    BadPairwiseCipher,
    BadAkmp,
    RsnIeVerUnsup,
    CipherRejPolicy,
    Unknown(u16),
}

impl StatusCode {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => StatusCode::Success,
            1 => StatusCode::Unspecified,
            10 => StatusCode::Capinfo,
            11 => StatusCode::NotAssoced,
            12 => StatusCode::Other,
            13 => StatusCode::Alg,
            14 => StatusCode::Sequence,
            15 => StatusCode::Challenge,
            16 => StatusCode::Timeout,
            17 => StatusCode::TooMany,
            18 => StatusCode::BasicRate,
            30 => StatusCode::TryAgainLater,
            31 => StatusCode::MfpPolicy,
            37 => StatusCode::Refused,
            38 => StatusCode::InvalidParam,
            40 => StatusCode::IeInvalid,
            41 => StatusCode::BadGroupCipher,
            42 => StatusCode::BadPairwiseCipher,
            43 => StatusCode::BadAkmp,
            44 => StatusCode::RsnIeVerUnsup,
            46 => StatusCode::CipherRejPolicy,
            _ => StatusCode::Unknown(raw),
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            StatusCode::Success => 0,
            StatusCode::Unspecified => 1,
            StatusCode::Capinfo => 10,
            StatusCode::NotAssoced => 11,
            StatusCode::Other => 12,
            StatusCode::Alg => 13,
            StatusCode::Sequence => 14,
            StatusCode::Challenge => 15,
            StatusCode::Timeout => 16,
            StatusCode::TooMany => 17,
            StatusCode::BasicRate => 18,
            StatusCode::TryAgainLater => 30,
            StatusCode::MfpPolicy => 31,
            StatusCode::Refused => 37,
            StatusCode::InvalidParam => 38,
            StatusCode::IeInvalid => 40,
            StatusCode::BadGroupCipher => 41,
            StatusCode::BadPairwiseCipher => 42,
            StatusCode::BadAkmp => 43,
            StatusCode::RsnIeVerUnsup => 44,
            StatusCode::CipherRejPolicy => 46,
            StatusCode::Unknown(v) => v,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

/// Reason codes carried in deauthentication, disassociation and DELBA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonCode {
    Unspecified,
    AuthExpire,
    AuthLeave,
    AssocExpire,
    AssocTooMany,
    NotAuthed,
    NotAssoced,
    AssocLeave,
    AssocNotAuthed,
    IeInvalid,
    MicFailure,
    SetupRequired,
    Timeout,
    Unknown(u16),
}

impl ReasonCode {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            1 => ReasonCode::Unspecified,
            2 => ReasonCode::AuthExpire,
            3 => ReasonCode::AuthLeave,
            4 => ReasonCode::AssocExpire,
            5 => ReasonCode::AssocTooMany,
            6 => ReasonCode::NotAuthed,
            7 => ReasonCode::NotAssoced,
            8 => ReasonCode::AssocLeave,
            9 => ReasonCode::AssocNotAuthed,
            13 => ReasonCode::IeInvalid,
            14 => ReasonCode::MicFailure,
            38 => ReasonCode::SetupRequired,
            39 => ReasonCode::Timeout,
            _ => ReasonCode::Unknown(raw),
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            ReasonCode::Unspecified => 1,
            ReasonCode::AuthExpire => 2,
            ReasonCode::AuthLeave => 3,
            ReasonCode::AssocExpire => 4,
            ReasonCode::AssocTooMany => 5,
            ReasonCode::NotAuthed => 6,
            ReasonCode::NotAssoced => 7,
            ReasonCode::AssocLeave => 8,
            ReasonCode::AssocNotAuthed => 9,
            ReasonCode::IeInvalid => 13,
            ReasonCode::MicFailure => 14,
            ReasonCode::SetupRequired => 38,
            ReasonCode::Timeout => 39,
            ReasonCode::Unknown(v) => v,
        }
    }
}

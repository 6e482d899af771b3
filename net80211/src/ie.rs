//! Information elements
//!
//! Type-length-value walking for management frame bodies, plus decoders
//! for the elements the receive path acts on (EDCA/WMM, HT, rates).

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::util::{le16, le32};

pub const ELEMID_SSID: u8 = 0;
pub const ELEMID_RATES: u8 = 1;
pub const ELEMID_DSPARMS: u8 = 3;
pub const ELEMID_EDCAPARMS: u8 = 12;
pub const ELEMID_ERP: u8 = 42;
pub const ELEMID_HTCAPS: u8 = 45;
pub const ELEMID_QOS_CAP: u8 = 46;
pub const ELEMID_RSN: u8 = 48;
pub const ELEMID_XRATES: u8 = 50;
pub const ELEMID_HTOP: u8 = 61;
pub const ELEMID_VENDOR: u8 = 221;

pub const MICROSOFT_OUI: [u8; 3] = [0x00, 0x50, 0xf2];
pub const IEEE80211_OUI: [u8; 3] = [0x00, 0x0f, 0xac];

pub const NWID_LEN: usize = 32;
pub const RATE_MAXSIZE: usize = 15;
pub const RATE_BASIC: u8 = 0x80;
pub const RATE_VAL: u8 = 0x7f;

/// One element: `data` excludes the id and length octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    pub id: u8,
    pub data: &'a [u8],
}

/// Walks a TLV sequence, stopping at the first element whose declared
/// length runs past the buffer.
pub struct ElementIter<'a> {
    buf: &'a [u8],
    truncated: bool,
}

impl<'a> ElementIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ElementIter { buf, truncated: false }
    }

    /// True once the walk stopped on an overrunning element.
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<'a> Iterator for ElementIter<'a> {
    type Item = Element<'a>;

    fn next(&mut self) -> Option<Element<'a>> {
        if self.buf.len() < 2 {
            return None;
        }
        let id = self.buf[0];
        let len = self.buf[1] as usize;
        if 2 + len > self.buf.len() {
            self.truncated = true;
            self.buf = &[];
            return None;
        }
        let data = &self.buf[2..2 + len];
        self.buf = &self.buf[2 + len..];
        Some(Element { id, data })
    }
}

/// Elements of interest collected from a management frame body.
#[derive(Debug, Clone, Default)]
pub struct Elements<'a> {
    pub ssid: Option<&'a [u8]>,
    pub rates: Option<&'a [u8]>,
    pub xrates: Option<&'a [u8]>,
    pub chan: Option<u8>,
    pub erp: Option<u8>,
    pub rsn: Option<Element<'a>>,
    pub wpa: Option<Element<'a>>,
    pub edca: Option<Element<'a>>,
    pub wmm: Option<Element<'a>>,
    pub htcaps: Option<&'a [u8]>,
    pub htop: Option<&'a [u8]>,
    pub qos_cap: bool,
    /// Elements rejected as too short, including a truncated tail.
    pub toosmall: u32,
}

impl<'a> Elements<'a> {
    pub fn parse(body: &'a [u8]) -> Self {
        let mut e = Elements::default();
        let mut iter = ElementIter::new(body);
        for elem in iter.by_ref() {
            match elem.id {
                ELEMID_SSID => e.ssid = Some(elem.data),
                ELEMID_RATES => e.rates = Some(elem.data),
                ELEMID_XRATES => e.xrates = Some(elem.data),
                ELEMID_DSPARMS => match elem.data.first() {
                    Some(&c) => e.chan = Some(c),
                    None => e.toosmall += 1,
                },
                ELEMID_ERP => match elem.data.first() {
                    Some(&v) => e.erp = Some(v),
                    None => e.toosmall += 1,
                },
                ELEMID_RSN => e.rsn = Some(elem),
                ELEMID_EDCAPARMS => e.edca = Some(elem),
                ELEMID_QOS_CAP => e.qos_cap = true,
                ELEMID_HTCAPS => e.htcaps = Some(elem.data),
                ELEMID_HTOP => e.htop = Some(elem.data),
                ELEMID_VENDOR => {
                    if elem.data.len() < 4 {
                        e.toosmall += 1;
                    } else if elem.data[..3] == MICROSOFT_OUI {
                        if elem.data[3] == 1 {
                            e.wpa = Some(elem);
                        } else if elem.data.len() >= 5 && elem.data[3] == 2 && elem.data[4] == 1 {
                            e.wmm = Some(elem);
                        }
                    }
                }
                _ => {}
            }
        }
        if iter.truncated() {
            e.toosmall += 1;
        }
        e
    }

    /// Supported rates present and within bounds.
    pub fn rates_ok(&self) -> bool {
        matches!(self.rates, Some(r) if r.len() <= RATE_MAXSIZE)
    }

    /// SSID present and within bounds.
    pub fn ssid_ok(&self) -> bool {
        matches!(self.ssid, Some(s) if s.len() <= NWID_LEN)
    }
}

/// Access category parameters from an EDCA Parameter Set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdcaAc {
    pub acm: bool,
    pub aifsn: u8,
    pub ecwmin: u8,
    pub ecwmax: u8,
    pub txoplimit: u16,
}

pub const EDCA_NUM_AC: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdcaParams {
    pub updtcount: u8,
    pub ac: [EdcaAc; EDCA_NUM_AC],
}

impl EdcaParams {
    /// Decode from the body starting at the QoS Info field.
    fn parse_body(frm: &[u8]) -> Self {
        let mut p = EdcaParams { updtcount: frm[0] & 0x0f, ..Default::default() };
        // skip QoS Info and Reserved
        let mut off = 2;
        for ac in p.ac.iter_mut() {
            ac.acm = (frm[off] >> 4) & 0x1 != 0;
            ac.aifsn = frm[off] & 0x0f;
            ac.ecwmin = frm[off + 1] & 0x0f;
            ac.ecwmax = frm[off + 1] >> 4;
            ac.txoplimit = le16(frm, off + 2);
            off += 4;
        }
        p
    }

    /// EDCA Parameter Set element. `None` if too short.
    pub fn from_edca(elem: &Element<'_>) -> Option<Self> {
        if elem.data.len() < 18 {
            return None;
        }
        Some(Self::parse_body(elem.data))
    }

    /// WMM Parameter vendor element. `None` if too short.
    pub fn from_wmm(elem: &Element<'_>) -> Option<Self> {
        if elem.data.len() < 24 {
            return None;
        }
        Some(Self::parse_body(&elem.data[6..]))
    }
}

/// HT Capabilities element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HtCaps {
    pub caps: u16,
    pub ampdu_params: u8,
    pub rxmcs: [u8; 16],
    pub ext_caps: u16,
    pub txbf_caps: u32,
    pub asel_caps: u8,
}

impl HtCaps {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 26 {
            return None;
        }
        let mut rxmcs = [0u8; 16];
        rxmcs.copy_from_slice(&data[3..19]);
        Some(HtCaps {
            caps: le16(data, 0),
            ampdu_params: data[2],
            rxmcs,
            ext_caps: le16(data, 19),
            txbf_caps: le32(data, 21),
            asel_caps: data[25],
        })
    }
}

pub const HTOP1_PROT_MASK: u16 = 0x0003;

/// HT Operation element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HtOp {
    pub primary_chan: u8,
    pub htop0: u8,
    pub htop1: u16,
    pub htop2: u16,
}

impl HtOp {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 22 {
            return None;
        }
        Some(HtOp {
            primary_chan: data[0],
            htop0: data[1],
            htop1: le16(data, 2),
            htop2: le16(data, 4),
        })
    }

    pub fn protection(&self) -> u16 {
        self.htop1 & HTOP1_PROT_MASK
    }
}

bitflags! {
    /// Rate set negotiation options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RateFlags: u8 {
        /// Sort by rate value.
        const DOSORT = 1 << 0;
        /// Flag basic rates we cannot support.
        const DONEGO = 1 << 1;
        /// Drop rates we cannot support.
        const DODEL = 1 << 2;
    }
}

/// A rate set in 500 kb/s units, high bit marking basic rates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RateSet(pub Vec<u8>);

impl RateSet {
    /// 802.11g rates, 1/2/5.5/11 basic.
    pub fn default_11g() -> Self {
        RateSet(alloc::vec![
            0x82, 0x84, 0x8b, 0x96, 0x0c, 0x12, 0x18, 0x24, 0x30, 0x48, 0x60, 0x6c,
        ])
    }

    pub fn contains(&self, rate: u8) -> bool {
        self.0.iter().any(|r| r & RATE_VAL == rate & RATE_VAL)
    }

    /// Combine a peer's rates and extended rates and negotiate them
    /// against `ours`.
    ///
    /// Returns the resulting set, or the first basic rate the peer
    /// requires that `ours` lacks (with [`RATE_BASIC`] set).
    pub fn negotiate(
        rates: &[u8],
        xrates: Option<&[u8]>,
        ours: &RateSet,
        flags: RateFlags,
    ) -> Result<RateSet, u8> {
        let mut rs: Vec<u8> = rates.to_vec();
        if let Some(x) = xrates {
            let room = RATE_MAXSIZE.saturating_sub(rs.len());
            rs.extend(x.iter().take(room));
        }
        if flags.contains(RateFlags::DOSORT) {
            rs.sort_by_key(|r| r & RATE_VAL);
        }
        let mut bad = None;
        if flags.intersects(RateFlags::DONEGO | RateFlags::DODEL) {
            rs.retain(|&r| {
                if ours.contains(r) {
                    return true;
                }
                if flags.contains(RateFlags::DONEGO) && r & RATE_BASIC != 0 && bad.is_none() {
                    bad = Some(r);
                }
                !flags.contains(RateFlags::DODEL)
            });
        }
        match bad {
            Some(r) => Err(r | RATE_BASIC),
            None => Ok(RateSet(rs)),
        }
    }
}

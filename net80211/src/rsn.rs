//! RSN / WPA security parameters
//!
//! Decodes the RSN element and the WPA vendor element into cipher and AKM
//! suite sets. Parsing is pure: it returns either the decoded parameters
//! or the status code an association response would carry.

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::frame::StatusCode;
use crate::ie::{Element, IEEE80211_OUI, MICROSOFT_OUI};
use crate::util::le16;

bitflags! {
    /// Cipher suites. The empty set is "none".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Cipher: u32 {
        const USEGROUP = 1 << 0;
        const WEP40 = 1 << 1;
        const TKIP = 1 << 2;
        const CCMP = 1 << 3;
        const WEP104 = 1 << 4;
        const BIP = 1 << 5;
    }
}

bitflags! {
    /// Authentication and key management suites.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Akm: u32 {
        const PSK = 1 << 0;
        const IEEE8021X = 1 << 1;
        const SHA256_PSK = 1 << 2;
        const SHA256_8021X = 1 << 3;
    }
}

impl Akm {
    /// AKMs that derive the PMK from an 802.1X exchange.
    pub fn is_8021x(self) -> bool {
        self.intersects(Akm::IEEE8021X | Akm::SHA256_8021X)
    }
}

bitflags! {
    /// RSN Capabilities field
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RsnCaps: u16 {
        const PREAUTH = 1 << 0;
        const NOPAIRWISE = 1 << 1;
        const MFPR = 1 << 6;
        const MFPC = 1 << 7;
        const PBAC = 1 << 12;
        const _ = !0;
    }
}

bitflags! {
    /// Security protocol generations an interface or peer speaks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RsnProtos: u8 {
        const WPA = 1 << 0;
        const RSN = 1 << 1;
    }
}

pub const PMKID_LEN: usize = 16;

/// Decoded RSN/WPA element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsnParams {
    pub group_cipher: Cipher,
    pub nciphers: u16,
    pub ciphers: Cipher,
    pub nakms: u16,
    pub akms: Akm,
    pub group_mgmt_cipher: Cipher,
    pub caps: RsnCaps,
    pub pmkids: Vec<[u8; PMKID_LEN]>,
}

impl Default for RsnParams {
    /// Values assumed for fields absent from a short element.
    fn default() -> Self {
        RsnParams {
            group_cipher: Cipher::CCMP,
            nciphers: 1,
            ciphers: Cipher::CCMP,
            nakms: 1,
            akms: Akm::IEEE8021X,
            group_mgmt_cipher: Cipher::BIP,
            caps: RsnCaps::empty(),
            pmkids: Vec::new(),
        }
    }
}

fn parse_cipher(sel: &[u8]) -> Cipher {
    let wpa = sel[..3] == MICROSOFT_OUI;
    if !wpa && sel[..3] != IEEE80211_OUI {
        return Cipher::empty();
    }
    match sel[3] {
        0 => Cipher::USEGROUP,
        1 => Cipher::WEP40,
        2 => Cipher::TKIP,
        4 => Cipher::CCMP,
        5 => Cipher::WEP104,
        6 if !wpa => Cipher::BIP,
        _ => Cipher::empty(),
    }
}

fn parse_akm(sel: &[u8]) -> Akm {
    let wpa = sel[..3] == MICROSOFT_OUI;
    if !wpa && sel[..3] != IEEE80211_OUI {
        return Akm::empty();
    }
    match sel[3] {
        1 => Akm::IEEE8021X,
        2 => Akm::PSK,
        5 if !wpa => Akm::SHA256_8021X,
        6 if !wpa => Akm::SHA256_PSK,
        _ => Akm::empty(),
    }
}

/// Parse an RSN element body, starting at the Version field.
///
/// Every field after Version is optional: when the buffer ends before a
/// field, the parameters decoded so far are returned with defaults for the
/// rest. A list whose count overruns the buffer is invalid.
pub fn parse_rsn_body(frm: &[u8]) -> Result<RsnParams, StatusCode> {
    if frm.len() < 2 || le16(frm, 0) != 1 {
        return Err(StatusCode::RsnIeVerUnsup);
    }
    let mut rsn = RsnParams::default();
    let mut off = 2;
    let left = |off: usize| frm.len().saturating_sub(off);

    // group data cipher suite
    if left(off) < 4 {
        return Ok(rsn);
    }
    rsn.group_cipher = parse_cipher(&frm[off..]);
    if rsn.group_cipher.is_empty()
        || rsn.group_cipher == Cipher::USEGROUP
        || rsn.group_cipher == Cipher::BIP
    {
        return Err(StatusCode::BadGroupCipher);
    }
    off += 4;

    // pairwise cipher suites
    if left(off) < 2 {
        return Ok(rsn);
    }
    rsn.nciphers = le16(frm, off);
    off += 2;
    let n = rsn.nciphers as usize;
    if left(off) < n * 4 {
        return Err(StatusCode::IeInvalid);
    }
    rsn.ciphers = Cipher::empty();
    for _ in 0..n {
        rsn.ciphers |= parse_cipher(&frm[off..]);
        off += 4;
    }
    if rsn.ciphers.contains(Cipher::USEGROUP)
        && (rsn.ciphers != Cipher::USEGROUP || rsn.group_cipher == Cipher::CCMP)
    {
        return Err(StatusCode::BadPairwiseCipher);
    }

    // AKM suites
    if left(off) < 2 {
        return Ok(rsn);
    }
    rsn.nakms = le16(frm, off);
    off += 2;
    let n = rsn.nakms as usize;
    if left(off) < n * 4 {
        return Err(StatusCode::IeInvalid);
    }
    rsn.akms = Akm::empty();
    for _ in 0..n {
        rsn.akms |= parse_akm(&frm[off..]);
        off += 4;
    }

    if left(off) < 2 {
        return Ok(rsn);
    }
    rsn.caps = RsnCaps::from_bits_retain(le16(frm, off));
    off += 2;

    // PMKID list
    if left(off) < 2 {
        return Ok(rsn);
    }
    let n = le16(frm, off) as usize;
    off += 2;
    if left(off) < n * PMKID_LEN {
        return Err(StatusCode::IeInvalid);
    }
    for _ in 0..n {
        let mut id = [0u8; PMKID_LEN];
        id.copy_from_slice(&frm[off..off + PMKID_LEN]);
        rsn.pmkids.push(id);
        off += PMKID_LEN;
    }

    // group management cipher suite
    if left(off) < 4 {
        return Ok(rsn);
    }
    rsn.group_mgmt_cipher = parse_cipher(&frm[off..]);
    if rsn.group_mgmt_cipher != Cipher::BIP {
        return Err(StatusCode::BadGroupCipher);
    }
    Ok(rsn)
}

/// Shortest RSN element body: the Version field.
pub const RSN_MIN_LEN: usize = 2;
/// Shortest WPA element body: OUI, type and Version.
pub const WPA_MIN_LEN: usize = 6;

/// Parse an RSN element. Elements shorter than the Version field are
/// reported as [`StatusCode::IeInvalid`].
pub fn parse_rsn(ie: &Element<'_>) -> Result<RsnParams, StatusCode> {
    if ie.data.len() < RSN_MIN_LEN {
        return Err(StatusCode::IeInvalid);
    }
    parse_rsn_body(ie.data)
}

/// Parse a WPA vendor element: the OUI and type octets precede a body
/// laid out like RSN.
pub fn parse_wpa(ie: &Element<'_>) -> Result<RsnParams, StatusCode> {
    if ie.data.len() < WPA_MIN_LEN {
        return Err(StatusCode::IeInvalid);
    }
    parse_rsn_body(&ie.data[4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ie::{ELEMID_RSN, ELEMID_VENDOR};
    use alloc::vec;

    fn rsn(data: &[u8]) -> Result<RsnParams, StatusCode> {
        parse_rsn(&Element { id: ELEMID_RSN, data })
    }

    #[test]
    fn test_version_only_defaults() {
        let p = rsn(&[1, 0]).unwrap();
        assert_eq!(p.group_cipher, Cipher::CCMP);
        assert_eq!(p.ciphers, Cipher::CCMP);
        assert_eq!(p.akms, Akm::IEEE8021X);
        assert_eq!(p.group_mgmt_cipher, Cipher::BIP);
        assert_eq!(p.caps, RsnCaps::empty());
        assert!(p.pmkids.is_empty());
    }

    #[test]
    fn test_bad_version() {
        assert_eq!(rsn(&[2, 0]), Err(StatusCode::RsnIeVerUnsup));
        assert_eq!(rsn(&[1]), Err(StatusCode::IeInvalid));
    }

    #[test]
    fn test_bip_group_cipher_rejected() {
        assert_eq!(rsn(&[1, 0, 0x00, 0x0f, 0xac, 6]), Err(StatusCode::BadGroupCipher));
        assert_eq!(rsn(&[1, 0, 0x00, 0x0f, 0xac, 0]), Err(StatusCode::BadGroupCipher));
    }

    #[test]
    fn test_group_only_keeps_default_pairwise() {
        let p = rsn(&[1, 0, 0x00, 0x0f, 0xac, 2]).unwrap();
        assert_eq!(p.group_cipher, Cipher::TKIP);
        assert_eq!(p.ciphers, Cipher::CCMP);
        assert_eq!(p.akms, Akm::IEEE8021X);
    }

    #[test]
    fn test_truncated_pairwise_list() {
        let data = [1, 0, 0x00, 0x0f, 0xac, 4, 2, 0, 0x00, 0x0f, 0xac, 4];
        assert_eq!(rsn(&data), Err(StatusCode::IeInvalid));
    }

    #[test]
    fn test_usegroup_with_ccmp_group() {
        let data = [1, 0, 0x00, 0x0f, 0xac, 4, 1, 0, 0x00, 0x0f, 0xac, 0];
        assert_eq!(rsn(&data), Err(StatusCode::BadPairwiseCipher));
        // usegroup is fine with a TKIP group cipher
        let data = [1, 0, 0x00, 0x0f, 0xac, 2, 1, 0, 0x00, 0x0f, 0xac, 0];
        assert_eq!(rsn(&data).unwrap().ciphers, Cipher::USEGROUP);
    }

    #[test]
    fn test_full_element() {
        let mut data = vec![
            1, 0,
            0x00, 0x0f, 0xac, 4, // group CCMP
            2, 0, 0x00, 0x0f, 0xac, 4, 0x00, 0x0f, 0xac, 2, // CCMP, TKIP
            1, 0, 0x00, 0x0f, 0xac, 2, // PSK
            0xc0, 0x10, // MFPR | MFPC | PBAC
            1, 0,
        ];
        data.extend_from_slice(&[0xab; 16]);
        data.extend_from_slice(&[0x00, 0x0f, 0xac, 6]);
        let p = rsn(&data).unwrap();
        assert_eq!(p.nciphers, 2);
        assert_eq!(p.ciphers, Cipher::CCMP | Cipher::TKIP);
        assert_eq!(p.akms, Akm::PSK);
        assert!(p.caps.contains(RsnCaps::MFPR | RsnCaps::MFPC | RsnCaps::PBAC));
        assert_eq!(p.pmkids, vec![[0xab; 16]]);
        assert_eq!(p.group_mgmt_cipher, Cipher::BIP);
    }

    #[test]
    fn test_unknown_selectors_ignored() {
        let data = [1, 0, 0x00, 0x0f, 0xac, 4, 1, 0, 0x12, 0x34, 0x56, 4, 1, 0, 0x00, 0x0f, 0xac, 9];
        let p = rsn(&data).unwrap();
        assert!(p.ciphers.is_empty());
        assert!(p.akms.is_empty());
    }

    #[test]
    fn test_wpa_wrapper() {
        let data = [
            0x00, 0x50, 0xf2, 1, // OUI, type
            1, 0,
            0x00, 0x50, 0xf2, 2, // group TKIP
            1, 0, 0x00, 0x50, 0xf2, 2,
            1, 0, 0x00, 0x50, 0xf2, 2,
        ];
        let p = parse_wpa(&Element { id: ELEMID_VENDOR, data: &data }).unwrap();
        assert_eq!(p.group_cipher, Cipher::TKIP);
        assert_eq!(p.ciphers, Cipher::TKIP);
        assert_eq!(p.akms, Akm::PSK);
        assert_eq!(parse_wpa(&Element { id: ELEMID_VENDOR, data: &data[..5] }), Err(StatusCode::IeInvalid));
    }
}

//! Receive statistics
//!
//! One counter per discard cause, plus the interface-level error and
//! packet counters.

/// Per-interface receive counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    /// Frames counted as interface input errors.
    pub ierrors: u64,
    /// Frames that could not be queued for transmission.
    pub oerrors: u64,
    /// EAPOL frames handed to key management.
    pub ipackets: u64,

    pub rx_tooshort: u64,
    pub rx_badversion: u64,
    pub rx_wrongdir: u64,
    pub rx_wrongbss: u64,
    pub rx_mcastecho: u64,
    pub rx_notassoc: u64,
    pub rx_unencrypted: u64,
    pub rx_wepfail: u64,
    pub rx_nowep: u64,
    pub rx_decap: u64,
    pub rx_mgtdiscard: u64,
    pub rx_mgmt_unprotected: u64,
    pub rx_mgmt_decrypt_fail: u64,
    pub rx_ahdemo_mgt: u64,
    pub rx_ctl: u64,
    pub rx_dup: u64,
    pub rx_defrag: u64,
    pub rx_elem_toosmall: u64,
    pub rx_badchan: u64,
    pub rx_chanmismatch: u64,
    pub rx_ssidmismatch: u64,
    pub rx_auth_unsupported: u64,
    pub rx_auth_fail: u64,
    pub rx_assoc_bss: u64,
    pub rx_assoc_notauth: u64,
    pub rx_assoc_capmismatch: u64,
    pub rx_assoc_norate: u64,
    pub rx_deauth: u64,
    pub rx_disassoc: u64,
    pub rx_badsubtype: u64,
    pub rx_unauth: u64,
    pub rx_ba_jump: u64,
    pub pbac_errs: u64,
}

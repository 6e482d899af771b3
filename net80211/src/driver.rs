//! Driver interface
//!
//! Everything the receive path needs from the hardware driver and the
//! upper layers: crypto, frame transmission, delivery and the A-MPDU
//! hooks. Frame construction for outbound management and action frames
//! belongs to the driver; the receive path only says which frame to send.

use crate::frame::{Frame, ReasonCode, RxInfo, StatusCode};
use crate::ic::State;
use crate::ie::EdcaAc;
use crate::node::Node;
use crate::util::{KError, KResult};

/// Action frame categories
pub const CATEG_BA: u8 = 3;
pub const CATEG_SA_QUERY: u8 = 8;

/// Block Ack actions
pub const ACTION_ADDBA_REQ: u8 = 0;
pub const ACTION_ADDBA_RESP: u8 = 1;
pub const ACTION_DELBA: u8 = 2;

/// SA Query actions
pub const ACTION_SA_QUERY_REQ: u8 = 0;
pub const ACTION_SA_QUERY_RESP: u8 = 1;

/// Management frames the receive path asks the driver to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MgmtTx {
    ProbeResp,
    Auth { seq: u16, status: StatusCode },
    AssocResp { reassoc: bool, status: StatusCode, associd: u16 },
    Deauth(ReasonCode),
    Disassoc(ReasonCode),
}

/// Action frames the receive path asks the driver to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTx {
    AddbaReq { tid: u8, token: u8, ssn: u16, winsize: u16, timeout_tu: u16 },
    AddbaResp { tid: u8, token: u8, status: StatusCode },
    Delba { tid: u8, reason: ReasonCode, initiator: bool },
    SaQueryReq { trid: u16 },
    SaQueryResp { trid: u16 },
}

impl ActionTx {
    pub fn category(&self) -> u8 {
        match self {
            ActionTx::AddbaReq { .. } | ActionTx::AddbaResp { .. } | ActionTx::Delba { .. } => CATEG_BA,
            ActionTx::SaQueryReq { .. } | ActionTx::SaQueryResp { .. } => CATEG_SA_QUERY,
        }
    }

    pub fn action(&self) -> u8 {
        match self {
            ActionTx::AddbaReq { .. } => ACTION_ADDBA_REQ,
            ActionTx::AddbaResp { .. } => ACTION_ADDBA_RESP,
            ActionTx::Delba { .. } => ACTION_DELBA,
            ActionTx::SaQueryReq { .. } => ACTION_SA_QUERY_REQ,
            ActionTx::SaQueryResp { .. } => ACTION_SA_QUERY_RESP,
        }
    }
}

/// Driver trait
///
/// Called with the interface lock held; implementations must not call
/// back into the interface.
pub trait Driver: Send {
    /// Monotonic time in microseconds
    fn uptime_us(&self) -> u64;

    /// Decrypt a protected frame in place and return it with the
    /// Protected bit cleared.
    fn decrypt(&mut self, ni: &Node, frame: Frame) -> KResult<Frame>;

    /// Send a management frame to `ni`
    fn send_mgmt(&mut self, ni: &Node, tx: MgmtTx) -> KResult<()>;

    /// Send an action frame to `ni`
    fn send_action(&mut self, ni: &Node, tx: ActionTx) -> KResult<()>;

    /// Hand an Ethernet frame to the network stack
    fn deliver(&mut self, ni: &Node, frame: Frame);

    /// EAPOL frame for the key management state machine
    fn eapol_input(&mut self, ni: &Node, frame: Frame) {
        let _ = (ni, frame);
    }

    /// Queue an Ethernet frame for transmission on the wireless side
    fn enqueue_tx(&mut self, frame: Frame) -> KResult<()> {
        let _ = frame;
        Err(KError::NotSupported)
    }

    /// Queue a frame saved for a station that just woke up
    fn enqueue_pwrsave(&mut self, ni: &Node, frame: Frame) {
        let _ = (ni, frame);
    }

    /// Set or clear the TIM bit for an association ID
    fn set_tim(&mut self, aid: u16, set: bool) {
        let _ = (aid, set);
    }

    /// Raw 802.11 tap
    fn raw_input(&mut self, frame: &Frame, rxi: &RxInfo) {
        let _ = (frame, rxi);
    }

    /// Hardware setup for a new receive Block Ack agreement
    fn ampdu_rx_start(&mut self, ni: &Node, tid: u8) -> KResult<()> {
        let _ = (ni, tid);
        Ok(())
    }

    fn ampdu_rx_stop(&mut self, ni: &Node, tid: u8) {
        let _ = (ni, tid);
    }

    fn ampdu_tx_start(&mut self, ni: &Node, tid: u8) {
        let _ = (ni, tid);
    }

    fn ampdu_tx_stop(&mut self, ni: &Node, tid: u8) {
        let _ = (ni, tid);
    }

    /// Interface state changed
    fn new_state(&mut self, old: State, new: State) {
        let _ = (old, new);
    }

    /// A station joined (or, for IBSS, was discovered)
    fn newassoc(&mut self, ni: &Node, is_new: bool) {
        let _ = (ni, is_new);
    }

    /// A station left the BSS
    fn node_leave(&mut self, ni: &Node) {
        let _ = ni;
    }

    fn update_edca(&mut self, ac: &[EdcaAc]) {
        let _ = ac;
    }

    fn update_slot(&mut self, short: bool) {
        let _ = short;
    }

    fn update_htprot(&mut self, ni: &Node) {
        let _ = ni;
    }
}

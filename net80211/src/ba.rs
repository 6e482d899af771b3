//! Block Ack agreements
//!
//! Recipient side: a per-TID reorder buffer holding A-MPDU subframes until
//! they can be released in sequence order (802.11-2012 9.21.7.6).
//! Originator side: only the negotiation state is tracked here.

use alloc::vec::Vec;

use crate::frame::{Frame, RxFlags, RxInfo};
use crate::mac::{seq_add, seq_lt, seq_sub};
use crate::timer::Timeout;
use crate::util::{KError, KResult};

/// Largest reorder window we accept.
pub const BA_MAX_WINSZ: u16 = 64;

/// ADDBA Block Ack Parameter Set
pub const ADDBA_AMSDU: u16 = 0x0001;
pub const ADDBA_BA_POLICY: u16 = 0x0002;
pub const ADDBA_TID_MASK: u16 = 0x003c;
pub const ADDBA_TID_SHIFT: u16 = 2;
pub const ADDBA_BUFSZ_MASK: u16 = 0xffc0;
pub const ADDBA_BUFSZ_SHIFT: u16 = 6;
/// DELBA Parameter Set
pub const DELBA_INITIATOR: u16 = 0x0800;
/// BlockAckReq control
pub const BA_MULTI_TID: u16 = 0x0002;

/// Reorder tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaConfig {
    /// How long a hole at the head of the window may hold back frames.
    pub gap_timeout_us: u64,
    /// Consecutive out-of-range frames needed before the window jumps.
    pub max_winmiss: u8,
    /// Distance past the window end still accepted without suspicion.
    pub jump_tolerance: u16,
    /// Jumps this far or further past the window end are followed at
    /// once. 4096 (the sequence space) puts every jump on the cautious path.
    pub max_jump: u16,
    /// Cap on the negotiated window size.
    pub max_winsize: u16,
}

impl Default for BaConfig {
    fn default() -> Self {
        BaConfig {
            gap_timeout_us: 200_000,
            max_winmiss: 20,
            jump_tolerance: BA_MAX_WINSZ,
            max_jump: 4096,
            max_winsize: BA_MAX_WINSZ,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaState {
    #[default]
    Init,
    Requested,
    Agreed,
}

/// What the reorder buffer did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaOutcome {
    /// Stored (and possibly already released).
    Stored,
    /// Sequence number before the window start.
    Duplicate,
    /// Suspicious jump ahead of the window; dropped.
    Jump,
    /// Buffer slot already occupied; dropped.
    SlotBusy,
}

/// Frames released in order from a reorder buffer.
pub type Released = Vec<(Frame, RxInfo)>;

/// Recipient Block Ack agreement for one TID.
#[derive(Debug, Default)]
pub struct RxBlockAck {
    pub state: BaState,
    pub timeout_val_us: u64,
    pub params: u16,
    pub winstart: u16,
    pub winend: u16,
    pub winsize: u16,
    head: usize,
    winmiss: u8,
    missed_sn: Option<u16>,
    buf: Vec<Option<(Frame, RxInfo)>>,
    /// Inactivity timeout.
    pub to: Timeout,
    /// Head-of-window gap timeout.
    pub gap_to: Timeout,
}

impl RxBlockAck {
    /// Prepare the window and reorder buffer for a new agreement. The
    /// caller moves the state to `Agreed` once the hardware accepted it.
    pub fn setup(&mut self, ssn: u16, winsize: u16, params: u16, timeout_val_us: u64) -> KResult<()> {
        if winsize == 0 {
            return Err(KError::Invalid);
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(winsize as usize).map_err(|_| KError::NoMemory)?;
        buf.resize_with(winsize as usize, || None);

        self.state = BaState::Init;
        self.timeout_val_us = timeout_val_us;
        self.params = params;
        self.winsize = winsize;
        self.winstart = ssn;
        self.winend = seq_add(ssn, winsize - 1);
        self.head = 0;
        self.winmiss = 0;
        self.missed_sn = None;
        self.buf = buf;
        self.to.cancel();
        self.gap_to.cancel();
        Ok(())
    }

    /// Free the reorder buffer and return to `Init`. Returns the number
    /// of frames that were still held.
    pub fn teardown(&mut self) -> usize {
        let held = self.buffered();
        self.state = BaState::Init;
        self.to.cancel();
        self.gap_to.cancel();
        self.buf = Vec::new();
        self.head = 0;
        held
    }

    /// Frames currently held for reordering.
    pub fn buffered(&self) -> usize {
        self.buf.iter().filter(|s| s.is_some()).count()
    }

    fn next_head(&self, head: usize) -> usize {
        (head + 1) % self.buf.len()
    }

    /// Rearm the inactivity timer if the agreement has one.
    pub fn touch(&mut self, now: u64) {
        if self.timeout_val_us != 0 {
            self.to.arm(now, self.timeout_val_us);
        }
    }

    /// Reorder one MPDU with sequence number `sn`. Frames that become
    /// deliverable are appended to `out` with `AMPDU_DONE` set.
    pub fn input(
        &mut self,
        frame: Frame,
        mut rxi: RxInfo,
        sn: u16,
        now: u64,
        cfg: &BaConfig,
        out: &mut Released,
    ) -> BaOutcome {
        if self.buf.is_empty() {
            return BaOutcome::SlotBusy;
        }
        self.touch(now);

        if seq_lt(sn, self.winstart) {
            return BaOutcome::Duplicate;
        }
        if seq_lt(self.winend, sn) {
            let dist = seq_sub(sn, self.winend);
            if dist > cfg.jump_tolerance && dist < cfg.max_jump {
                // Some senders emit stray sequence numbers far ahead of
                // the stream. Only follow a jump that persists.
                let consecutive = matches!(self.missed_sn,
                    Some(m) if sn == m || sn == seq_add(m, 1));
                self.winmiss = if consecutive { self.winmiss.saturating_add(1) } else { 1 };
                self.missed_sn = Some(sn);
                if self.winmiss < cfg.max_winmiss {
                    return BaOutcome::Jump;
                }
                self.winmiss = 0;
                self.missed_sn = None;
            }
            let count = dist.min(self.winsize);
            self.release(count, out);
            self.winend = sn;
            self.winstart = seq_sub(sn, self.winsize - 1);
        }

        let idx = (self.head + seq_sub(sn, self.winstart) as usize) % self.buf.len();
        if self.buf[idx].is_some() {
            return BaOutcome::SlotBusy;
        }
        rxi.flags |= RxFlags::AMPDU_DONE;
        self.buf[idx] = Some((frame, rxi));

        if self.buf[self.head].is_none() {
            self.gap_to.arm(now, cfg.gap_timeout_us);
        } else {
            self.gap_to.cancel();
        }
        self.flush(out);
        BaOutcome::Stored
    }

    /// Advance the head by `count` slots, releasing whatever is held.
    fn release(&mut self, count: u16, out: &mut Released) {
        for _ in 0..count {
            if let Some(f) = self.buf[self.head].take() {
                out.push(f);
            }
            self.head = self.next_head(self.head);
        }
    }

    /// Release the in-order run at the head of the window.
    pub fn flush(&mut self, out: &mut Released) {
        if self.buf.is_empty() {
            return;
        }
        while let Some(f) = self.buf[self.head].take() {
            out.push(f);
            self.head = self.next_head(self.head);
            self.winstart = seq_add(self.winstart, 1);
        }
        self.winend = seq_add(self.winstart, self.winsize - 1);
    }

    /// Skip the hole at the head of the window, then flush.
    pub fn gap_timeout(&mut self, out: &mut Released) {
        if self.buf.is_empty() {
            return;
        }
        let mut skipped = 0;
        while skipped < self.winsize && self.buf[self.head].is_none() {
            self.head = self.next_head(self.head);
            self.winstart = seq_add(self.winstart, 1);
            skipped += 1;
        }
        if skipped > 0 {
            self.winend = seq_add(self.winstart, self.winsize - 1);
        }
        self.flush(out);
    }

    /// Move the window start forward to `ssn` (BlockAckReq or PBAC ADDBA).
    pub fn move_window(&mut self, ssn: u16, out: &mut Released) {
        if self.buf.is_empty() {
            return;
        }
        let count = seq_sub(ssn, self.winstart).min(self.winsize);
        self.release(count, out);
        self.winstart = ssn;
        self.flush(out);
    }
}

/// Originator Block Ack agreement for one TID.
#[derive(Debug, Default)]
pub struct TxBlockAck {
    pub state: BaState,
    pub token: u8,
    pub timeout_val_us: u64,
    pub winstart: u16,
    pub winsize: u16,
    /// Response timeout while `Requested`, inactivity once `Agreed`.
    pub to: Timeout,
}

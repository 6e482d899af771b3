//! IEEE 802.11 reception engine.
//!
//! Takes raw 802.11 frames from a wireless driver and turns them into
//! Ethernet frames for the network stack, while running the receive side
//! of the MAC: duplicate detection, defragmentation, Block Ack
//! reordering, power save polling and the management handshakes of
//! station, IBSS and access point modes.
//!
//! The hardware, crypto and transmit paths sit behind [`driver::Driver`].

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod util;

pub mod mac;
pub mod frame;
pub mod timer;

pub mod ie;
pub mod rsn;

pub mod defrag;
pub mod ba;

pub mod node;
pub mod driver;
pub mod config;
pub mod stats;

pub mod ic;
pub mod input;
pub mod mgmt;
pub mod ctl;

use spin::Mutex;

use crate::driver::Driver;
use crate::frame::{Frame, RxInfo};
use crate::ic::Ieee80211Com;
use crate::node::{NodeKey, NodeTable};

struct Inner<D> {
    ic: Ieee80211Com,
    nodes: NodeTable,
    driver: D,
}

/// A wireless interface: its 802.11 state, its peers and its driver,
/// behind one lock.
///
/// Receive interrupts and the timer tick both go through here, so frame
/// processing and timer expiry never run concurrently.
pub struct Interface<D: Driver> {
    inner: Mutex<Inner<D>>,
}

impl<D: Driver> Interface<D> {
    pub fn new(ic: Ieee80211Com, nodes: NodeTable, driver: D) -> Self {
        Interface { inner: Mutex::new(Inner { ic, nodes, driver }) }
    }

    /// Receive one frame. `key` names the transmitter as the driver
    /// resolved it, `NodeKey::Bss` when unknown.
    pub fn input(&self, frame: Frame, key: NodeKey, rxi: RxInfo) {
        let mut g = self.inner.lock();
        let Inner { ic, nodes, driver } = &mut *g;
        ic.input(nodes, key, frame, rxi, driver);
    }

    /// Periodic tick: reorder gaps, Block Ack and SA Query timeouts,
    /// stale reassemblies.
    pub fn run_timers(&self) {
        let mut g = self.inner.lock();
        let Inner { ic, nodes, driver } = &mut *g;
        ic.run_timers(nodes, driver);
    }

    /// Run `f` with the interface locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut Ieee80211Com, &mut NodeTable, &mut D) -> R) -> R {
        let mut g = self.inner.lock();
        let Inner { ic, nodes, driver } = &mut *g;
        f(ic, nodes, driver)
    }
}

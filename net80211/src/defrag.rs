//! Defragmentation cache
//!
//! Up to three MSDUs or MMPDUs may be under reassembly at once. Each slot
//! holds the first fragment (with its MAC header) and grows as later
//! fragments arrive in order; a slot that does not complete within the
//! receive lifetime is abandoned.

use crate::dprintln;
use crate::frame::Frame;
use crate::mac::{MacAddress, MacHeader, FC1_MORE_FRAG};
use crate::timer::Timeout;

pub const DEFRAG_SLOTS: usize = 3;

#[derive(Debug)]
struct DefragSlot {
    seq: u16,
    frag: u8,
    ftype: u8,
    addr1: MacAddress,
    addr2: MacAddress,
    frame: Frame,
    to: Timeout,
}

impl DefragSlot {
    fn matches(&self, wh: &MacHeader) -> bool {
        self.seq == wh.seq()
            && self.ftype == (wh.fc.0 >> 2) as u8 & 0x03
            && self.addr1 == wh.addr1
            && self.addr2 == wh.addr2
    }
}

/// Result of feeding one frame to the cache.
#[derive(Debug, PartialEq, Eq)]
pub enum Defrag {
    /// Unfragmented frame, or the last fragment completed a reassembly.
    Complete(Frame),
    /// The cache kept the frame.
    Pending,
    /// Fragment without a matching reassembly in progress.
    Discard,
}

#[derive(Debug)]
pub struct DefragCache {
    slots: [Option<DefragSlot>; DEFRAG_SLOTS],
    cur: usize,
    lifetime_us: u64,
}

impl DefragCache {
    pub fn new(lifetime_us: u64) -> Self {
        DefragCache { slots: [None, None, None], cur: 0, lifetime_us }
    }

    /// Number of reassemblies in progress.
    pub fn in_progress(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn defrag(&mut self, mut frame: Frame, hdrlen: usize, now: u64) -> Defrag {
        let wh = match frame.header() {
            Some(wh) => wh,
            None => return Defrag::Discard,
        };
        let frag = wh.frag();
        let more = wh.fc.more_fragments();
        if frag == 0 && !more {
            return Defrag::Complete(frame);
        }

        if frag == 0 {
            // restart a reassembly already under way for this MSDU,
            // otherwise evict the round-robin victim
            let idx = match self.slots.iter().position(|s| matches!(s, Some(s) if s.matches(&wh))) {
                Some(i) => i,
                None => {
                    self.cur = (self.cur + 1) % DEFRAG_SLOTS;
                    self.cur
                }
            };
            let mut to = Timeout::new();
            to.arm(now, self.lifetime_us);
            self.slots[idx] = Some(DefragSlot {
                seq: wh.seq(),
                frag: 0,
                ftype: (wh.fc.0 >> 2) as u8 & 0x03,
                addr1: wh.addr1,
                addr2: wh.addr2,
                frame,
                to,
            });
            return Defrag::Pending;
        }

        let idx = self.slots.iter().position(|s| {
            matches!(s, Some(s) if s.matches(&wh) && s.frag.wrapping_add(1) == frag)
        });
        let idx = match idx {
            Some(i) => i,
            None => {
                dprintln!("no reassembly for fragment {} of seq {} from {}", frag, wh.seq(), wh.addr2);
                return Defrag::Discard;
            }
        };

        frame.trim_front(hdrlen);
        let Some(slot) = self.slots[idx].as_mut() else {
            return Defrag::Discard;
        };
        slot.frag = frag;
        slot.frame.extend_from_slice(frame.as_slice());
        if more {
            return Defrag::Pending;
        }
        match self.slots[idx].take() {
            Some(mut slot) => {
                slot.to.cancel();
                slot.frame.clear_fc1(FC1_MORE_FRAG);
                Defrag::Complete(slot.frame)
            }
            None => Defrag::Discard,
        }
    }

    /// Drop reassemblies whose lifetime ran out. Returns how many.
    pub fn expire(&mut self, now: u64) -> usize {
        let mut n = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_mut().is_some_and(|s| s.to.fire(now)) {
                *slot = None;
                n += 1;
            }
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    const LIFETIME: u64 = 1_000_000;

    fn fragment(seq: u16, frag: u8, more: bool, payload: &[u8]) -> Frame {
        let mut buf = alloc::vec![0u8; 24];
        buf[0] = 0x08; // data
        if more {
            buf[1] = FC1_MORE_FRAG;
        }
        buf[4..10].copy_from_slice(&[2, 0, 0, 0, 0, 1]);
        buf[10..16].copy_from_slice(&[2, 0, 0, 0, 0, 2]);
        let sc = (seq << 4) | frag as u16;
        buf[22..24].copy_from_slice(&sc.to_le_bytes());
        buf.extend_from_slice(payload);
        Frame::new(buf)
    }

    fn roundtrip(n: usize) {
        let msdu: Vec<u8> = (0..90u8).collect();
        let chunk = (msdu.len() + n - 1) / n;
        let mut cache = DefragCache::new(LIFETIME);
        let mut out = None;
        for (i, part) in msdu.chunks(chunk).enumerate() {
            let last = i == n - 1;
            match cache.defrag(fragment(77, i as u8, !last, part), 24, 0) {
                Defrag::Pending => assert!(!last),
                Defrag::Complete(f) => {
                    assert!(last);
                    out = Some(f);
                }
                Defrag::Discard => panic!("fragment {} discarded", i),
            }
        }
        let f = out.unwrap();
        assert_eq!(f.body(24), &msdu[..]);
        assert!(!f.header().unwrap().fc.more_fragments());
        assert_eq!(cache.in_progress(), 0);
    }

    #[test]
    fn test_two_fragments() {
        roundtrip(2);
    }

    #[test]
    fn test_three_fragments() {
        roundtrip(3);
    }

    #[test]
    fn test_unfragmented_passes_through() {
        let mut cache = DefragCache::new(LIFETIME);
        let f = fragment(1, 0, false, &[9, 9]);
        assert_eq!(cache.defrag(f.clone(), 24, 0), Defrag::Complete(f));
    }

    #[test]
    fn test_missing_fragment_discarded() {
        let mut cache = DefragCache::new(LIFETIME);
        assert_eq!(cache.defrag(fragment(5, 2, false, &[1]), 24, 0), Defrag::Discard);

        // fragment 0 present, 1 missing
        assert_eq!(cache.defrag(fragment(5, 0, true, &[1]), 24, 0), Defrag::Pending);
        assert_eq!(cache.defrag(fragment(5, 2, false, &[3]), 24, 0), Defrag::Discard);
    }

    #[test]
    fn test_restart_reuses_slot() {
        let mut cache = DefragCache::new(LIFETIME);
        assert_eq!(cache.defrag(fragment(5, 0, true, &[1]), 24, 0), Defrag::Pending);
        assert_eq!(cache.defrag(fragment(5, 0, true, &[1]), 24, 0), Defrag::Pending);
        assert_eq!(cache.in_progress(), 1);
    }

    #[test]
    fn test_round_robin_eviction() {
        let mut cache = DefragCache::new(LIFETIME);
        for seq in 0..4 {
            assert_eq!(cache.defrag(fragment(seq, 0, true, &[0]), 24, 0), Defrag::Pending);
        }
        assert_eq!(cache.in_progress(), DEFRAG_SLOTS);
        // seq 0 was evicted by seq 3
        assert_eq!(cache.defrag(fragment(0, 1, false, &[1]), 24, 0), Defrag::Discard);
        assert!(matches!(cache.defrag(fragment(1, 1, false, &[1]), 24, 0), Defrag::Complete(_)));
    }

    #[test]
    fn test_expiry_frees_slot() {
        let mut cache = DefragCache::new(LIFETIME);
        cache.defrag(fragment(8, 0, true, &[1]), 24, 100);
        assert_eq!(cache.expire(LIFETIME), 0);
        assert_eq!(cache.expire(LIFETIME + 100), 1);
        assert_eq!(cache.defrag(fragment(8, 1, false, &[2]), 24, LIFETIME + 200), Defrag::Discard);
    }
}

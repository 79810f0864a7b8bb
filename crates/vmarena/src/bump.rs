//! Logical allocation over a shared cursor.
//!
//! [`BumpCursor`] hands out disjoint byte ranges. Each grant consumes
//! `round_up(size, align)` bytes (never less than the arena's
//! `min_align` granule), so the cursor stays `min_align`-aligned at rest
//! and never rests above capacity.
//!
//! Requests aligned to at most `min_align` take a single wait-free
//! `fetch_add`. Requests aligned more strictly first need the padding up
//! to the next aligned address, which depends on the current cursor, so
//! they claim their range with a compare-and-swap loop instead. Zero-size
//! requests only read the cursor.
//!
//! A `fetch_add` that overshoots capacity is undone by the thread that
//! crossed the boundary: it stores its own start offset back. While that
//! store is pending the cursor sits above capacity, so every other add
//! that lands in the meantime fails too and is undone by the same store.
//! Compensating each failed add with its own `fetch_sub` is not enough
//! when failures unwind out of order: the cursor can dip back under
//! capacity while a later add is still outstanding, let a new grant
//! through, and then be pulled below that grant.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::align::checked_align_up;

/// A successfully reserved range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Grant {
    /// Aligned start handed to the caller, relative to the arena base.
    pub offset: usize,
    /// `offset + size`: the prefix that must be committed before use.
    pub end: usize,
}

/// The request did not fit. Once no other reservation is in flight the
/// cursor is exactly where it was before the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Exhausted;

/// The allocation cursor, on its own cache line.
///
/// 128-byte alignment covers both 64-byte (x86) and 128-byte (Apple
/// M-series) cache lines, so bumps do not invalidate the commit cursor.
#[repr(align(128))]
pub(crate) struct BumpCursor {
    next: AtomicUsize,
}

impl BumpCursor {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicUsize::new(0),
        }
    }

    /// Reserve `size` bytes aligned to `align` within `[0, capacity)`.
    ///
    /// `base` is the address offset 0 maps to; alignment is computed on
    /// real addresses so alignments above the page size also hold. `base`
    /// must be `min_align`-aligned and both alignments powers of two.
    pub(crate) fn reserve(
        &self,
        size: usize,
        align: usize,
        min_align: usize,
        capacity: usize,
        base: usize,
    ) -> Result<Grant, Exhausted> {
        debug_assert!(align.is_power_of_two() && min_align.is_power_of_two());
        debug_assert_eq!(base % min_align, 0);

        if size == 0 {
            return self.peek(align, capacity, base);
        }
        // Requests that can never fit are rejected before touching the
        // cursor, which also keeps fetch_add far from usize overflow.
        if size > capacity {
            return Err(Exhausted);
        }
        let step = checked_align_up(size, align.max(min_align)).ok_or(Exhausted)?;
        if align <= min_align {
            self.bump(size, step, capacity)
        } else {
            self.bump_aligned(size, step, align, capacity, base)
        }
    }

    /// Wait-free path: the cursor is already suitably aligned.
    fn bump(&self, size: usize, step: usize, capacity: usize) -> Result<Grant, Exhausted> {
        let offset = self.next.fetch_add(step, Ordering::Relaxed);
        match offset.checked_add(size) {
            Some(end) if end <= capacity => {
                if offset + step > capacity {
                    // Only the rounding tail is past capacity; pull the
                    // cursor back so it rests in range. Anything added on
                    // top meanwhile started past capacity and failed.
                    self.next.fetch_min(capacity, Ordering::Relaxed);
                }
                Ok(Grant { offset, end })
            }
            _ => {
                if offset <= capacity {
                    self.restore(offset);
                }
                Err(Exhausted)
            }
        }
    }

    /// Lock-free path for alignments above `min_align`.
    fn bump_aligned(
        &self,
        size: usize,
        step: usize,
        align: usize,
        capacity: usize,
        base: usize,
    ) -> Result<Grant, Exhausted> {
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let offset = aligned_offset(current, align, base)
                .filter(|&o| o <= capacity)
                .ok_or(Exhausted)?;
            let end = offset
                .checked_add(size)
                .filter(|&e| e <= capacity)
                .ok_or(Exhausted)?;
            let next = offset.saturating_add(step).min(capacity);
            match self.next.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(Grant { offset, end }),
                Err(actual) => current = actual,
            }
        }
    }

    /// Zero-size requests: the next aligned offset, cursor untouched.
    fn peek(&self, align: usize, capacity: usize, base: usize) -> Result<Grant, Exhausted> {
        let current = self.next.load(Ordering::Relaxed);
        aligned_offset(current, align, base)
            .filter(|&o| o <= capacity)
            .map(|offset| Grant {
                offset,
                end: offset,
            })
            .ok_or(Exhausted)
    }

    /// Undo an overshoot by the thread whose add crossed capacity.
    ///
    /// `offset` must be that thread's pre-add value and at most capacity.
    fn restore(&self, offset: usize) {
        self.next.store(offset, Ordering::Relaxed);
    }

    /// Current cursor value. Exceeds capacity only while a failing
    /// reservation is being undone.
    pub(crate) fn load(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }

    /// Rewind to zero. Callers guarantee no reservation is in flight.
    pub(crate) fn rewind(&self) {
        self.next.store(0, Ordering::Relaxed);
    }
}

/// First offset at or after `current` whose address is `align`-aligned.
fn aligned_offset(current: usize, align: usize, base: usize) -> Option<usize> {
    base.checked_add(current)
        .and_then(|addr| checked_align_up(addr, align))
        .map(|addr| addr - base)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 0x10_0000;

    #[test]
    fn sequential_grants_are_contiguous() {
        let c = BumpCursor::new();
        let a = c.reserve(4, 8, 8, 4096, BASE).unwrap();
        let b = c.reserve(4, 8, 8, 4096, BASE).unwrap();
        assert_eq!(a, Grant { offset: 0, end: 4 });
        assert_eq!(b, Grant { offset: 8, end: 12 });
        assert_eq!(c.load(), 16);
    }

    #[test]
    fn exact_fit_succeeds() {
        let c = BumpCursor::new();
        let g = c.reserve(4096, 8, 8, 4096, BASE).unwrap();
        assert_eq!(g.end, 4096);
        assert_eq!(c.load(), 4096);
    }

    #[test]
    fn exact_fit_over_aligned_succeeds() {
        let c = BumpCursor::new();
        let g = c.reserve(4096, 16, 8, 4096, BASE).unwrap();
        assert_eq!(g, Grant { offset: 0, end: 4096 });
        assert_eq!(c.load(), 4096);
    }

    #[test]
    fn over_aligned_requests_fill_capacity() {
        let c = BumpCursor::new();
        for i in 0..256 {
            let g = c.reserve(16, 16, 8, 4096, BASE).unwrap();
            assert_eq!(g.offset, i * 16);
            assert!(c.load() <= 4096);
        }
        assert_eq!(c.load(), 4096);
        assert_eq!(c.reserve(16, 16, 8, 4096, BASE), Err(Exhausted));
        assert_eq!(c.load(), 4096);
    }

    #[test]
    fn step_is_size_rounded_to_alignment() {
        let c = BumpCursor::new();
        c.reserve(4, 16, 8, 4096, BASE).unwrap();
        assert_eq!(c.load(), 16);
        c.reserve(3, 1, 8, 4096, BASE).unwrap();
        assert_eq!(c.load(), 24);
    }

    #[test]
    fn overshoot_rolls_back_exactly() {
        let c = BumpCursor::new();
        c.reserve(4000, 8, 8, 4096, BASE).unwrap();
        let before = c.load();
        assert_eq!(c.reserve(200, 8, 8, 4096, BASE), Err(Exhausted));
        assert_eq!(c.load(), before);
        assert_eq!(c.reserve(200, 64, 8, 4096, BASE), Err(Exhausted));
        assert_eq!(c.load(), before);
        // Smaller requests still fit afterwards.
        assert!(c.reserve(96, 8, 8, 4096, BASE).is_ok());
        assert_eq!(c.load(), 4096);
    }

    #[test]
    fn out_of_order_unwinding_cannot_overlap() {
        let c = BumpCursor::new();
        c.reserve(4000, 8, 8, 4096, BASE).unwrap();

        // A crosses capacity, then B stacks a failing add on top of it.
        let a = c.next.fetch_add(200, Ordering::Relaxed);
        assert_eq!(c.reserve(8, 8, 8, 4096, BASE), Err(Exhausted));
        assert_eq!(c.load(), 4208);

        // A unwinds first; B's add is gone with it.
        c.restore(a);
        assert_eq!(c.load(), 4000);
        let d = c.reserve(8, 8, 8, 4096, BASE).unwrap();
        let e = c.reserve(8, 8, 8, 4096, BASE).unwrap();
        assert_eq!(d.offset, 4000);
        assert_eq!(e.offset, 4008);
    }

    #[test]
    fn rounding_tail_past_capacity_is_clamped() {
        let c = BumpCursor::new();
        let g = c.reserve(4999, 8, 8, 4999, BASE).unwrap();
        assert_eq!(g.end, 4999);
        assert_eq!(c.load(), 4999);
        assert_eq!(c.reserve(1, 1, 8, 4999, BASE), Err(Exhausted));
        assert_eq!(c.load(), 4999);
    }

    #[test]
    fn oversized_request_never_touches_cursor() {
        let c = BumpCursor::new();
        assert_eq!(c.reserve(8192, 8, 8, 4096, BASE), Err(Exhausted));
        assert_eq!(c.reserve(usize::MAX, 8, 8, 4096, BASE), Err(Exhausted));
        assert_eq!(c.reserve(usize::MAX - 3, 1, 1, 4096, BASE), Err(Exhausted));
        assert_eq!(c.reserve(8192, 64, 8, 4096, BASE), Err(Exhausted));
        assert_eq!(c.load(), 0);
    }

    #[test]
    fn zero_size_returns_current_offset() {
        let c = BumpCursor::new();
        c.reserve(4, 8, 8, 4096, BASE).unwrap();
        let g = c.reserve(0, 8, 8, 4096, BASE).unwrap();
        assert_eq!(g, Grant { offset: 8, end: 8 });
        assert_eq!(c.load(), 8);
    }

    #[test]
    fn zero_size_never_moves_cursor() {
        let c = BumpCursor::new();
        c.reserve(4, 8, 8, 8192, BASE).unwrap();
        for shift in 0..=12 {
            let align = 1usize << shift;
            let g = c.reserve(0, align, 8, 8192, BASE).unwrap();
            assert_eq!((BASE + g.offset) % align, 0);
            assert!(g.offset >= 8);
            assert_eq!(g.offset, g.end);
            assert_eq!(c.load(), 8, "align {align} moved the cursor");
        }
    }

    #[test]
    fn zero_size_at_full_capacity_succeeds() {
        let c = BumpCursor::new();
        c.reserve(4096, 8, 8, 4096, BASE).unwrap();
        let g = c.reserve(0, 8, 8, 4096, BASE).unwrap();
        assert_eq!(g.offset, 4096);
    }

    #[test]
    fn over_aligned_request_starts_aligned() {
        let c = BumpCursor::new();
        c.reserve(1, 1, 8, 4096, BASE).unwrap(); // cursor = 8
        let g = c.reserve(16, 64, 8, 4096, BASE).unwrap();
        assert_eq!((BASE + g.offset) % 64, 0);
        assert_eq!(g.offset, 64);
        assert_eq!(c.load(), 128);
    }

    #[test]
    fn alignment_is_on_addresses_not_offsets() {
        let c = BumpCursor::new();
        // base is only 8-aligned here; offset 0 is not 4096-aligned.
        let base = 0x1008;
        let g = c.reserve(8, 4096, 8, 1 << 16, base).unwrap();
        assert_eq!((base + g.offset) % 4096, 0);
        assert_eq!(g.offset, 0x2000 - base);
    }

    #[test]
    fn rewind_restarts_at_zero() {
        let c = BumpCursor::new();
        c.reserve(100, 8, 8, 4096, BASE).unwrap();
        c.rewind();
        assert_eq!(c.load(), 0);
        assert_eq!(c.reserve(4, 8, 8, 4096, BASE).unwrap().offset, 0);
    }

    #[test]
    fn cursor_is_cache_line_aligned() {
        assert!(std::mem::align_of::<BumpCursor>() >= 128);
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn grants_are_disjoint_aligned_and_in_bounds(
                reqs in proptest::collection::vec((0usize..300, 0u32..8), 1..200),
            ) {
                let capacity = 8192;
                let c = BumpCursor::new();
                let mut granted: Vec<(usize, usize)> = Vec::new();
                for (size, align_log) in reqs {
                    let align = 1usize << align_log;
                    let before = c.load();
                    match c.reserve(size, align, 8, capacity, BASE) {
                        Ok(g) => {
                            prop_assert_eq!((BASE + g.offset) % align, 0);
                            prop_assert!(g.end <= capacity);
                            prop_assert!(g.offset >= before);
                            prop_assert!(c.load() <= capacity);
                            if size == 0 {
                                prop_assert_eq!(c.load(), before);
                            } else {
                                prop_assert!(c.load() >= g.end);
                            }
                            granted.push((g.offset, g.end));
                        }
                        Err(Exhausted) => {
                            prop_assert_eq!(c.load(), before);
                        }
                    }
                }
                granted.retain(|(s, e)| s != e);
                granted.sort();
                for w in granted.windows(2) {
                    prop_assert!(w[0].1 <= w[1].0, "overlap: {:?} and {:?}", w[0], w[1]);
                }
            }
        }
    }
}

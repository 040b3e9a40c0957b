// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Frame records and the bounds checks shared by dispatch and unwind.
//!
//! Frame records form an intrusive, singly linked list that lives on the very stack being walked.
//! Nothing about that list can be trusted: every record address is re-checked against the active
//! stack limits before it is dereferenced.

use core::fmt;

use static_assertions::{assert_eq_align, const_assert_eq};

use crate::{Platform, StackGrowth};

/// Address of a [`FrameRecord`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameAddr(usize);

impl FrameAddr {
    /// The sentinel terminating every frame chain.
    pub const CHAIN_END: Self = Self(usize::MAX);

    #[must_use]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[must_use]
    pub fn from_ptr(ptr: *const FrameRecord) -> Self {
        Self(ptr.expose_provenance())
    }

    pub const fn get(self) -> usize {
        self.0
    }

    pub fn as_ptr(self) -> *const FrameRecord {
        core::ptr::with_exposed_provenance(self.0)
    }

    pub const fn is_chain_end(self) -> bool {
        self.0 == Self::CHAIN_END.0
    }

    pub const fn is_aligned(self) -> bool {
        self.0 & (FrameRecord::ALIGN - 1) == 0
    }
}

impl fmt::Debug for FrameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_chain_end() {
            f.write_str("FrameAddr(CHAIN_END)")
        } else {
            write!(f, "FrameAddr({:#x})", self.0)
        }
    }
}

impl fmt::Display for FrameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// One registered exception handler, stored in place on the stack frame that declared it.
///
/// `next` points at the record of an older, still live stack frame. Records are pushed and popped
/// by function prologues and epilogues, this crate only ever reads and unlinks them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    pub next: FrameAddr,
    /// Entry point of the frame's handler.
    pub handler: usize,
}

const_assert_eq!(FrameRecord::SIZE, 2 * size_of::<usize>());
assert_eq_align!(FrameRecord, usize);

impl FrameRecord {
    pub const SIZE: usize = size_of::<Self>();
    pub const ALIGN: usize = align_of::<Self>();

    pub const fn new(next: FrameAddr, handler: usize) -> Self {
        Self { next, handler }
    }
}

/// The `[low, high)` address range of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackLimits {
    pub low: usize,
    pub high: usize,
}

impl StackLimits {
    pub const fn new(low: usize, high: usize) -> Self {
        Self { low, high }
    }

    /// Limits of a stack of `size` bytes whose initial stack pointer is `top`.
    pub const fn below(top: usize, size: usize) -> Self {
        Self {
            low: top.saturating_sub(size),
            high: top,
        }
    }

    /// Returns `true` if a whole frame record at `frame` fits within these limits.
    pub fn contains_record(&self, frame: FrameAddr) -> bool {
        frame.get() >= self.low
            && frame
                .get()
                .checked_add(FrameRecord::SIZE)
                .is_some_and(|end| end <= self.high)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InvalidFrame {
    pub frame: FrameAddr,
}

/// Tracks the stack limits a chain walk is currently checking records against.
///
/// The walk starts out on the thread's primary stack. At elevated priority execution may
/// temporarily run on a bounded secondary stack, so a record that falls outside the primary
/// limits but inside an active secondary stack switches the walk over to those limits.
///
/// Every record must also be strictly older than the one checked before it, so a corrupted
/// link can never send the walk back to a record it has already visited.
#[derive(Debug)]
pub(crate) struct ChainWalker {
    limits: StackLimits,
    growth: StackGrowth,
    previous: Option<FrameAddr>,
}

impl ChainWalker {
    pub fn new<P: Platform + ?Sized>(platform: &P) -> Self {
        Self {
            limits: platform.stack_limits(),
            growth: platform.config().growth,
            previous: None,
        }
    }

    #[cfg(test)]
    pub fn limits(&self) -> StackLimits {
        self.limits
    }

    /// Checks that the record at `frame` may be dereferenced.
    pub fn check<P: Platform + ?Sized>(
        &mut self,
        platform: &P,
        frame: FrameAddr,
    ) -> Result<(), InvalidFrame> {
        if self.within_limits(frame) {
            let growth = self.growth;
            if let Some(previous) = self
                .previous
                .filter(|previous| !growth.is_older(frame, *previous))
            {
                log::warn!("frame record {frame} does not lie above the previous record {previous}");
                return Err(InvalidFrame { frame });
            }

            self.previous = Some(frame);
            return Ok(());
        }

        // the two stacks are unrelated, so ordering can't be compared across the switch
        if self.switch_to_secondary(platform, frame) && self.within_limits(frame) {
            self.previous = Some(frame);
            return Ok(());
        }

        log::warn!(
            "frame record {frame} is misaligned or outside of {:#x}..{:#x}",
            self.limits.low,
            self.limits.high
        );
        Err(InvalidFrame { frame })
    }

    fn within_limits(&self, frame: FrameAddr) -> bool {
        frame.is_aligned() && self.limits.contains_record(frame)
    }

    fn switch_to_secondary<P: Platform + ?Sized>(&mut self, platform: &P, frame: FrameAddr) -> bool {
        if !frame.is_aligned() || platform.current_priority() < platform.config().elevated_priority {
            return false;
        }

        let Some(secondary) = platform
            .secondary_stack()
            .filter(|secondary| secondary.contains_record(frame))
        else {
            return false;
        };

        log::debug!(
            "frame record {frame} lives on the secondary stack {:#x}..{:#x}",
            secondary.low,
            secondary.high
        );
        self.limits = secondary;
        true
    }
}

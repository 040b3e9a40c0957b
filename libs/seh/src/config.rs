// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::FrameAddr;

/// Execution priority of the calling processor.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub u8);

impl Priority {
    pub const PASSIVE: Self = Self(0);
    pub const APC: Self = Self(1);
    pub const DISPATCH: Self = Self(2);
}

/// The direction in which the stack grows as calls nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StackGrowth {
    /// Newer frames live at lower addresses. True for every architecture we currently support.
    #[default]
    Down,
    Up,
}

impl StackGrowth {
    /// Returns `true` if `a` belongs to an older activation than `b`, i.e. `a` is farther up
    /// the chain.
    pub fn is_older(self, a: FrameAddr, b: FrameAddr) -> bool {
        match self {
            StackGrowth::Down => a > b,
            StackGrowth::Up => a < b,
        }
    }

    /// Returns the stack pointer after popping `bytes` off the stack at `sp`.
    pub const fn pop(self, sp: usize, bytes: usize) -> usize {
        match self {
            StackGrowth::Down => sp.wrapping_add(bytes),
            StackGrowth::Up => sp.wrapping_sub(bytes),
        }
    }
}

/// Tunables of the dispatch and unwind engine.
///
/// Platforms hand this out through [`Platform::config`][crate::Platform::config].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub growth: StackGrowth,
    /// Priority at or above which frame records may live on the secondary stack.
    pub elevated_priority: Priority,
    /// Number of bytes [`unwind`][crate::unwind] pops off the captured stack pointer to account
    /// for its own arguments.
    pub unwind_argument_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub const fn new() -> Self {
        Self {
            growth: StackGrowth::Down,
            elevated_priority: Priority::DISPATCH,
            unwind_argument_bytes: 4 * size_of::<usize>(),
        }
    }

    #[must_use]
    pub const fn with_growth(mut self, growth: StackGrowth) -> Self {
        self.growth = growth;
        self
    }

    #[must_use]
    pub const fn with_elevated_priority(mut self, priority: Priority) -> Self {
        self.elevated_priority = priority;
        self
    }

    #[must_use]
    pub const fn with_unwind_argument_bytes(mut self, bytes: usize) -> Self {
        self.unwind_argument_bytes = bytes;
        self
    }
}

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::FrameAddr;
use crate::arch;

/// Register snapshot that execution can be resumed from.
///
/// Captured once per unwind, then updated as frames are torn down before it is finally handed to
/// [`Platform::resume`][crate::Platform::resume].
#[repr(C)]
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Context {
    /// General purpose registers, including the stack pointer.
    pub gp: [usize; arch::GP_REGS],
    pub ip: usize,
    pub flags: usize,
}

impl Context {
    pub fn sp(&self) -> usize {
        self.gp[arch::SP]
    }

    pub fn set_sp(&mut self, sp: usize) {
        self.gp[arch::SP] = sp;
    }

    pub fn return_value(&self) -> usize {
        self.gp[arch::RETURN_VALUE]
    }

    pub fn set_return_value(&mut self, value: usize) {
        self.gp[arch::RETURN_VALUE] = value;
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("Context");
        for (name, value) in arch::REG_NAMES.iter().zip(self.gp.iter()) {
            f.field(name, &format_args!("{value:#x}"));
        }
        f.field("ip", &format_args!("{:#x}", self.ip))
            .field("flags", &format_args!("{:#x}", self.flags))
            .finish()
    }
}

/// Scratch state threaded through a single handler invocation.
///
/// Only the handler trampoline writes to this: when it reports a nested exception or a collided
/// unwind, `registration` holds the frame record the dispatch or unwind should continue from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherContext {
    pub registration: FrameAddr,
}

impl Default for DispatcherContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherContext {
    pub const fn new() -> Self {
        Self {
            registration: FrameAddr::CHAIN_END,
        }
    }
}

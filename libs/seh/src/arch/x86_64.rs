// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! x86_64 register file layout.

/// Number of general purpose registers captured in a [`Context`][crate::Context].
pub const GP_REGS: usize = 16;

/// Index of the integer return value register (`rax`).
pub const RETURN_VALUE: usize = 0;

/// Index of the stack pointer.
pub const SP: usize = 4;

pub const REG_NAMES: [&str; GP_REGS] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

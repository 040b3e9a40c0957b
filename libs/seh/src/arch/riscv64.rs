// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! RISC-V register file layout.

/// Number of general purpose registers captured in a [`Context`][crate::Context].
pub const GP_REGS: usize = 32;

/// Index of the integer return value register (`a0`).
pub const RETURN_VALUE: usize = 10;

/// Index of the stack pointer.
pub const SP: usize = 2;

pub const REG_NAMES: [&str; GP_REGS] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! AArch64 register file layout.

/// Number of general purpose registers captured in a [`Context`][crate::Context].
pub const GP_REGS: usize = 32;

/// Index of the integer return value register (`x0`).
pub const RETURN_VALUE: usize = 0;

/// Index of the stack pointer, stored after the 31 numbered registers.
pub const SP: usize = 31;

pub const REG_NAMES: [&str; GP_REGS] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14",
    "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27",
    "x28", "x29", "x30", "sp",
];

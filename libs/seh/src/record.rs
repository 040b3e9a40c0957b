// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use bitflags::bitflags;

/// The maximum number of auxiliary parameters an [`ExceptionRecord`] can carry.
pub const EXCEPTION_MAXIMUM_PARAMETERS: usize = 15;

/// Classification of an exceptional condition.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionCode(pub u32);

impl ExceptionCode {
    pub const NONCONTINUABLE_EXCEPTION: Self = Self(0xC000_0025);
    pub const INVALID_DISPOSITION: Self = Self(0xC000_0026);
    pub const UNWIND: Self = Self(0xC000_0027);
    pub const BAD_STACK: Self = Self(0xC000_0028);
    pub const INVALID_UNWIND_TARGET: Self = Self(0xC000_0029);
}

impl fmt::Debug for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExceptionCode(")?;
        match *self {
            Self::NONCONTINUABLE_EXCEPTION => write!(f, "NONCONTINUABLE_EXCEPTION")?,
            Self::INVALID_DISPOSITION => write!(f, "INVALID_DISPOSITION")?,
            Self::UNWIND => write!(f, "UNWIND")?,
            Self::BAD_STACK => write!(f, "BAD_STACK")?,
            Self::INVALID_UNWIND_TARGET => write!(f, "INVALID_UNWIND_TARGET")?,
            Self(raw) => write!(f, "{raw:#010x}")?,
        }
        write!(f, ")")
    }
}

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExceptionFlags: u32 {
        const NONCONTINUABLE = 0x01;
        const UNWINDING = 0x02;
        const EXIT_UNWIND = 0x04;
        const STACK_INVALID = 0x08;
        const NESTED_CALL = 0x10;
        const TARGET_UNWIND = 0x20;
        const COLLIDED_UNWIND = 0x40;

        const UNWIND = Self::UNWINDING.bits()
            | Self::EXIT_UNWIND.bits()
            | Self::TARGET_UNWIND.bits()
            | Self::COLLIDED_UNWIND.bits();
    }
}

/// Returned when a record is built with more than [`EXCEPTION_MAXIMUM_PARAMETERS`] parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterOverflow(pub usize);

impl fmt::Display for ParameterOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exception records carry at most {EXCEPTION_MAXIMUM_PARAMETERS} parameters, got {}",
            self.0
        )
    }
}

impl core::error::Error for ParameterOverflow {}

/// Describes one exceptional condition for the duration of a dispatch or unwind.
///
/// Records raised while another exception is being handled link back to the record
/// that was active at the time through [`ExceptionRecord::enclosing`]. Each nested
/// activation owns its own record, so the nesting depth is simply the length of that chain.
#[derive(Clone, Copy)]
pub struct ExceptionRecord<'a> {
    pub code: ExceptionCode,
    pub flags: ExceptionFlags,
    pub enclosing: Option<&'a ExceptionRecord<'a>>,
    /// Address at which the exception originated.
    pub address: usize,
    parameters: [usize; EXCEPTION_MAXIMUM_PARAMETERS],
    num_parameters: usize,
}

impl<'a> ExceptionRecord<'a> {
    pub const fn new(code: ExceptionCode, flags: ExceptionFlags, address: usize) -> Self {
        Self {
            code,
            flags,
            enclosing: None,
            address,
            parameters: [0; EXCEPTION_MAXIMUM_PARAMETERS],
            num_parameters: 0,
        }
    }

    /// Construct a record carrying the given auxiliary parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterOverflow`] if more than [`EXCEPTION_MAXIMUM_PARAMETERS`] are given.
    pub fn with_parameters(
        code: ExceptionCode,
        flags: ExceptionFlags,
        address: usize,
        parameters: &[usize],
    ) -> Result<Self, ParameterOverflow> {
        let mut this = Self::new(code, flags, address);
        this.parameters
            .get_mut(..parameters.len())
            .ok_or(ParameterOverflow(parameters.len()))?
            .copy_from_slice(parameters);
        this.num_parameters = parameters.len();
        Ok(this)
    }

    /// Construct a non-continuable record for `code` that was caused by `cause`.
    pub const fn chained(code: ExceptionCode, cause: &'a ExceptionRecord<'a>) -> Self {
        let mut this = Self::new(code, ExceptionFlags::NONCONTINUABLE, cause.address);
        this.enclosing = Some(cause);
        this
    }

    pub fn parameters(&self) -> &[usize] {
        &self.parameters[..self.num_parameters]
    }

    pub const fn is_continuable(&self) -> bool {
        !self.flags.contains(ExceptionFlags::NONCONTINUABLE)
    }

    pub const fn is_unwinding(&self) -> bool {
        self.flags.intersects(ExceptionFlags::UNWIND)
    }

    /// Iterates this record followed by every enclosing record, innermost first.
    pub fn chain(&self) -> impl Iterator<Item = &ExceptionRecord<'a>> {
        core::iter::successors(Some(self), |record| record.enclosing)
    }
}

impl fmt::Debug for ExceptionRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionRecord")
            .field("code", &self.code)
            .field("flags", &self.flags)
            .field("enclosing", &self.enclosing)
            .field("address", &format_args!("{:#x}", self.address))
            .field("parameters", &self.parameters())
            .field("num_parameters", &self.num_parameters)
            .finish()
    }
}

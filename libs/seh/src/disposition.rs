// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::{Fault, FrameAddr};

/// A handler's verdict exactly as the trampoline captured it.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawDisposition(pub u32);

impl RawDisposition {
    pub const CONTINUE_EXECUTION: Self = Self(0);
    pub const CONTINUE_SEARCH: Self = Self(1);
    pub const NESTED_EXCEPTION: Self = Self(2);
    pub const COLLIDED_UNWIND: Self = Self(3);
}

impl fmt::Debug for RawDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawDisposition(")?;
        match *self {
            Self::CONTINUE_EXECUTION => write!(f, "CONTINUE_EXECUTION")?,
            Self::CONTINUE_SEARCH => write!(f, "CONTINUE_SEARCH")?,
            Self::NESTED_EXCEPTION => write!(f, "NESTED_EXCEPTION")?,
            Self::COLLIDED_UNWIND => write!(f, "COLLIDED_UNWIND")?,
            Self(raw) => write!(f, "<invalid {raw}>")?,
        }
        write!(f, ")")
    }
}

/// Outcomes a handler may report while an exception is being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionDisposition {
    /// The handler dealt with the condition, resume at the (possibly modified) context.
    ContinueExecution,
    /// Not this frame, keep searching.
    ContinueSearch,
    /// The handler itself faulted; the dispatcher context names the frame the nested
    /// dispatch reached.
    NestedException,
}

impl TryFrom<RawDisposition> for ExceptionDisposition {
    type Error = Fault;

    fn try_from(raw: RawDisposition) -> Result<Self, Self::Error> {
        match raw {
            RawDisposition::CONTINUE_EXECUTION => Ok(Self::ContinueExecution),
            RawDisposition::CONTINUE_SEARCH => Ok(Self::ContinueSearch),
            RawDisposition::NESTED_EXCEPTION => Ok(Self::NestedException),
            raw => Err(Fault::InvalidDisposition(raw)),
        }
    }
}

impl From<ExceptionDisposition> for RawDisposition {
    fn from(disposition: ExceptionDisposition) -> Self {
        match disposition {
            ExceptionDisposition::ContinueExecution => Self::CONTINUE_EXECUTION,
            ExceptionDisposition::ContinueSearch => Self::CONTINUE_SEARCH,
            ExceptionDisposition::NestedException => Self::NESTED_EXCEPTION,
        }
    }
}

/// Outcomes a handler may report while frames are being unwound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindDisposition {
    ContinueSearch,
    /// Another unwind ran over this one; the dispatcher context names the frame record it
    /// stopped at.
    CollidedUnwind,
}

impl TryFrom<RawDisposition> for UnwindDisposition {
    type Error = Fault;

    fn try_from(raw: RawDisposition) -> Result<Self, Self::Error> {
        match raw {
            RawDisposition::CONTINUE_SEARCH => Ok(Self::ContinueSearch),
            RawDisposition::COLLIDED_UNWIND => Ok(Self::CollidedUnwind),
            raw => Err(Fault::InvalidDisposition(raw)),
        }
    }
}

impl From<UnwindDisposition> for RawDisposition {
    fn from(disposition: UnwindDisposition) -> Self {
        match disposition {
            UnwindDisposition::ContinueSearch => Self::CONTINUE_SEARCH,
            UnwindDisposition::CollidedUnwind => Self::COLLIDED_UNWIND,
        }
    }
}

/// Which of the two trampolines ran a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    Exception,
    Unwind,
}

/// A single handler execution, reported through
/// [`Platform::handler_executed`][crate::Platform::handler_executed].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerExecution {
    pub mode: HandlerMode,
    pub establisher: FrameAddr,
    pub handler: usize,
    pub disposition: RawDisposition,
}

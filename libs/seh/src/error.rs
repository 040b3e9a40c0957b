// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{ExceptionCode, ExceptionRecord, FrameAddr, RawDisposition};

/// Terminal conditions detected while dispatching or unwinding.
///
/// None of these can be recovered from locally. The public entry points turn them into a fresh,
/// non-continuable exception chained to the record being processed and hand that to
/// [`Platform::raise`][crate::Platform::raise].
#[derive(Debug, Clone, Copy, PartialEq, Eq, onlyerror::Error)]
pub enum Fault {
    #[error("handler continued execution of a non-continuable exception")]
    NonContinuable,
    #[error("handler returned invalid disposition {0:?}")]
    InvalidDisposition(RawDisposition),
    #[error("frame record {0} is misaligned or outside of the stack")]
    BadStack(FrameAddr),
    #[error("unwind target {target} lies below frame record {frame}")]
    InvalidUnwindTarget { target: FrameAddr, frame: FrameAddr },
}

impl Fault {
    pub const fn code(self) -> ExceptionCode {
        match self {
            Fault::NonContinuable => ExceptionCode::NONCONTINUABLE_EXCEPTION,
            Fault::InvalidDisposition(_) => ExceptionCode::INVALID_DISPOSITION,
            Fault::BadStack(_) => ExceptionCode::BAD_STACK,
            Fault::InvalidUnwindTarget { .. } => ExceptionCode::INVALID_UNWIND_TARGET,
        }
    }

    /// Builds the record that is raised for this fault, chained to the record that caused it.
    pub const fn record<'a>(self, cause: &'a ExceptionRecord<'a>) -> ExceptionRecord<'a> {
        ExceptionRecord::chained(self.code(), cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExceptionFlags;

    #[test]
    fn fault_records_chain_to_their_cause() {
        let cause = ExceptionRecord::new(ExceptionCode(0xE000_0001), ExceptionFlags::UNWINDING, 0x40);
        let record = Fault::BadStack(FrameAddr::new(0x1003)).record(&cause);

        assert_eq!(record.code, ExceptionCode::BAD_STACK);
        assert!(record.flags.contains(ExceptionFlags::NONCONTINUABLE));
        assert_eq!(record.enclosing.map(|r| r.code), Some(ExceptionCode(0xE000_0001)));
        assert!(record.parameters().is_empty());
    }

    #[test]
    fn display() {
        let fault = Fault::InvalidUnwindTarget {
            target: FrameAddr::new(0x100),
            frame: FrameAddr::new(0x200),
        };
        assert_eq!(
            fault.to_string(),
            "unwind target 0x100 lies below frame record 0x200"
        );
    }
}

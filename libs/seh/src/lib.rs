// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![cfg_attr(not(any(test, feature = "emulate")), no_std)]

//! Frame based structured exception dispatch and unwinding.
//!
//! Every activation that wants a say in exception handling links a [`FrameRecord`] into a
//! per-thread chain, newest first. [`dispatch_exception`] offers an exception to each record's
//! handler in turn until one of them resumes execution, while [`unwind`] walks the same chain
//! running handlers in unwind mode and unlinking their frames until it reaches a target frame.
//!
//! Both engines validate every frame before touching it: records must be aligned and lie
//! entirely within the current stack (or the secondary stack when running at elevated priority),
//! and during dispatch every handler must be listed in its module's function table.
//!
//! All of the machine specific parts (register capture, handler trampolines, the actual transfer
//! of control) live behind the [`Platform`] trait. With the `emulate` feature enabled the crate
//! ships a hosted implementation in [`emulate`] that the engines are tested against.

mod arch;
mod config;
mod context;
mod dispatch;
mod disposition;
#[cfg(any(test, feature = "emulate"))]
pub mod emulate;
mod error;
mod frame;
mod history;
mod platform;
mod record;
mod unwind;
mod validate;

pub use config::{Config, Priority, StackGrowth};
pub use context::{Context, DispatcherContext};
pub use dispatch::dispatch_exception;
pub use disposition::{
    ExceptionDisposition, HandlerExecution, HandlerMode, RawDisposition, UnwindDisposition,
};
pub use error::Fault;
pub use frame::{FrameAddr, FrameRecord, StackLimits};
pub use history::{DispatchLog, HandlerHistory, History};
pub use platform::Platform;
pub use record::{
    EXCEPTION_MAXIMUM_PARAMETERS, ExceptionCode, ExceptionFlags, ExceptionRecord,
    ParameterOverflow,
};
pub use unwind::unwind;
pub use validate::{FunctionTable, ImageFunctions, InvalidHandler, Rejection, is_valid_handler};

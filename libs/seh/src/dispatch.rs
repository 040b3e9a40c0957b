// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Exception dispatch: searching the frame chain for a handler.

use crate::frame::ChainWalker;
use crate::validate::is_valid_handler;
use crate::{
    Context, DispatcherContext, ExceptionDisposition, ExceptionFlags, ExceptionRecord, Fault,
    FrameAddr, HandlerExecution, HandlerMode, Platform,
};

/// Offers the exception described by `record` to every registered frame handler, newest first,
/// until one of them handles it.
///
/// Returns `true` if a handler chose to continue execution; the caller then resumes at `context`,
/// which the handler may have modified. Returns `false` if the end of the chain was reached, or if
/// a frame record or its handler failed validation, in which case
/// [`ExceptionFlags::STACK_INVALID`] is set on `record`.
///
/// A handler asking to continue a non-continuable exception, or returning a disposition that is
/// not valid during dispatch, raises a new non-continuable exception through
/// [`Platform::raise`] that is chained to `record`.
pub fn dispatch_exception<P: Platform + ?Sized>(
    platform: &mut P,
    record: &mut ExceptionRecord<'_>,
    context: &mut Context,
) -> bool {
    match dispatch(platform, record, context) {
        Ok(handled) => handled,
        Err(fault) => {
            log::error!("{fault} while dispatching {:?}", record.code);
            let fault = fault.record(record);
            platform.raise(&fault)
        }
    }
}

pub(crate) fn dispatch<P: Platform + ?Sized>(
    platform: &mut P,
    record: &mut ExceptionRecord<'_>,
    context: &mut Context,
) -> Result<bool, Fault> {
    let growth = platform.config().growth;
    let mut walker = ChainWalker::new(platform);
    // The outermost frame a nested dispatch has reported. Nesting ends once the search gets
    // back to this exact frame.
    let mut nested_frame: Option<FrameAddr> = None;

    let mut frame = platform.chain_head();
    while !frame.is_chain_end() {
        if walker.check(platform, frame).is_err() {
            record.flags |= ExceptionFlags::STACK_INVALID;
            return Ok(false);
        }

        // Safety: `check` verified the record is aligned and within the active stack
        let handler = unsafe { platform.read_record(frame) }.handler;

        if !is_valid_handler(platform, handler) {
            record.flags |= ExceptionFlags::STACK_INVALID;
            return Ok(false);
        }

        let mut dispatcher = DispatcherContext::new();
        log::trace!("executing handler {handler:#x} for {:?} at {frame}", record.code);
        // Safety: the handler was read from the frame's own record and passed validation
        let disposition = unsafe {
            platform.execute_handler_for_exception(record, frame, context, &mut dispatcher, handler)
        };
        log::trace!("handler {handler:#x} returned {disposition:?}");
        platform.handler_executed(&HandlerExecution {
            mode: HandlerMode::Exception,
            establisher: frame,
            handler,
            disposition,
        });

        if nested_frame == Some(frame) {
            record.flags.remove(ExceptionFlags::NESTED_CALL);
            nested_frame = None;
        }

        match ExceptionDisposition::try_from(disposition)? {
            ExceptionDisposition::ContinueExecution => {
                return if record.is_continuable() {
                    Ok(true)
                } else {
                    Err(Fault::NonContinuable)
                };
            }
            ExceptionDisposition::ContinueSearch => {
                if record.flags.contains(ExceptionFlags::STACK_INVALID) {
                    return Ok(false);
                }
            }
            ExceptionDisposition::NestedException => {
                record.flags |= ExceptionFlags::NESTED_CALL;
                let reported = dispatcher.registration;
                if nested_frame.is_none_or(|nested| growth.is_older(reported, nested)) {
                    nested_frame = Some(reported);
                }
            }
        }

        // Safety: `frame` was checked above, the handler may have rewritten its link
        frame = unsafe { platform.read_record(frame) }.next;
    }

    Ok(false)
}

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{
    Config, Context, DispatcherContext, ExceptionRecord, FrameAddr, FrameRecord, HandlerExecution,
    ImageFunctions, InvalidHandler, Priority, RawDisposition, StackLimits,
};

/// Everything the dispatch and unwind engine needs from its surroundings.
///
/// Implementations provide the thread's frame chain and stack limits, the handler trampolines,
/// module function table lookup and the transfer-of-control primitives. The engine never
/// allocates and keeps no state of its own between calls, so it may be re-entered from within a
/// handler through the same platform.
pub trait Platform {
    /// Tunables for the engine.
    fn config(&self) -> Config {
        Config::new()
    }

    /// Bounds of the calling thread's stack.
    fn stack_limits(&self) -> StackLimits;

    /// Bounds of the secondary stack, if the calling processor is currently running on one.
    fn secondary_stack(&self) -> Option<StackLimits>;

    fn current_priority(&self) -> Priority;

    /// The most recently registered frame record, or [`FrameAddr::CHAIN_END`].
    fn chain_head(&self) -> FrameAddr;

    fn set_chain_head(&mut self, head: FrameAddr);

    /// Reads the frame record at `frame`.
    ///
    /// # Safety
    ///
    /// `frame` must be aligned and lie, together with the whole record, within the limits of a
    /// live stack.
    unsafe fn read_record(&self, frame: FrameAddr) -> FrameRecord {
        // Safety: ensured by the caller.
        unsafe { frame.as_ptr().read() }
    }

    /// Removes the record at `frame` from the chain, its handler has been run for the last time.
    ///
    /// # Safety
    ///
    /// The same requirements as for [`Self::read_record`] apply.
    unsafe fn unlink(&mut self, frame: FrameAddr) {
        // Safety: ensured by the caller.
        let record = unsafe { self.read_record(frame) };
        self.set_chain_head(record.next);
    }

    /// Returns the function table of the module containing `address`, if it has one.
    fn lookup_function_table(&self, address: usize) -> Option<ImageFunctions<'_>>;

    /// Called whenever handler validation rejects a handler.
    fn invalid_handler_detected(&mut self, report: &InvalidHandler) {
        let _ = report;
    }

    /// Called after every handler execution, in both dispatch and unwind.
    fn handler_executed(&mut self, execution: &HandlerExecution) {
        let _ = execution;
    }

    /// Captures the register state of the caller.
    fn capture_context(&mut self) -> Context;

    /// Runs `handler` to decide what should happen with the exception described by `record`.
    ///
    /// The trampoline must be prepared for the handler raising a nested exception, in which case
    /// it reports [`RawDisposition::NESTED_EXCEPTION`] and stores the frame the nested dispatch
    /// reached in `dispatcher`.
    ///
    /// # Safety
    ///
    /// `handler` must be the entry point of an exception handler belonging to `establisher`.
    unsafe fn execute_handler_for_exception(
        &mut self,
        record: &mut ExceptionRecord<'_>,
        establisher: FrameAddr,
        context: &mut Context,
        dispatcher: &mut DispatcherContext,
        handler: usize,
    ) -> RawDisposition;

    /// Runs `handler` so it can clean up `establisher` before it is unwound.
    ///
    /// If an unwind started from within the handler runs into this one the trampoline reports
    /// [`RawDisposition::COLLIDED_UNWIND`] and stores the frame that unwind stopped at in
    /// `dispatcher`.
    ///
    /// # Safety
    ///
    /// `handler` must be the entry point of an exception handler belonging to `establisher`.
    unsafe fn execute_handler_for_unwind(
        &mut self,
        record: &mut ExceptionRecord<'_>,
        establisher: FrameAddr,
        context: &mut Context,
        dispatcher: &mut DispatcherContext,
        handler: usize,
    ) -> RawDisposition;

    /// Transfers control to `context`.
    ///
    /// # Safety
    ///
    /// `context` must describe a valid point of execution on the current thread and every frame
    /// between the caller and that point must have been torn down.
    unsafe fn resume(&mut self, context: &Context, raise_alert: bool) -> !;

    /// Hands an exception no frame based handler took care of to the outer layers, such as an
    /// attached debugger or the owning subsystem.
    ///
    /// `search_frames` is `false` when the frame chain has already been searched or unwound and
    /// must not be offered the exception again, so only the outer layers get to see it.
    fn escalate(&mut self, record: &ExceptionRecord<'_>, context: &Context, search_frames: bool) -> !;

    /// Raises `record` as a new exception.
    fn raise(&mut self, record: &ExceptionRecord<'_>) -> !;
}

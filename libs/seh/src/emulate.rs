// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A hosted [`Platform`] for exercising the engine without a real frame chain.
//!
//! Frame records live in heap allocated "stacks" that are laid out the way a downward growing
//! machine stack is, so the engine reads them through the same raw pointer path it uses on real
//! hardware. Handlers are scripted with closures keyed by handler address, and the
//! transfer-of-control primitives unwind the host stack with a [`Transfer`] payload that
//! [`catch`] turns back into a value.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::{
    Config, Context, DispatchLog, DispatcherContext, ExceptionCode, ExceptionFlags,
    ExceptionRecord, FrameAddr, FrameRecord, FunctionTable, HandlerExecution, HandlerHistory,
    HandlerMode, ImageFunctions, InvalidHandler, Platform, Priority, RawDisposition, StackLimits,
};

/// How execution left the engine through one of the never-returning platform primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Resumed {
        context: Context,
        raise_alert: bool,
    },
    Escalated {
        code: ExceptionCode,
        flags: ExceptionFlags,
        context: Context,
        search_frames: bool,
    },
    Raised {
        code: ExceptionCode,
        flags: ExceptionFlags,
        /// Codes of the raised record and every record it encloses, innermost first.
        chain: Vec<ExceptionCode>,
    },
}

/// Runs `f`, returning the [`Transfer`] if it left through a platform primitive instead of
/// returning normally.
///
/// # Errors
///
/// Returns the transfer `f` ended in.
pub fn catch<R>(f: impl FnOnce() -> R) -> Result<R, Transfer> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<Transfer>() {
            Ok(transfer) => Err(*transfer),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

/// The arguments of one scripted handler invocation.
#[derive(Debug)]
pub struct HandlerCall<'a, 'r> {
    pub mode: HandlerMode,
    pub record: &'a mut ExceptionRecord<'r>,
    pub establisher: FrameAddr,
    pub context: &'a mut Context,
    pub dispatcher: &'a mut DispatcherContext,
}

type Behavior = Rc<RefCell<dyn FnMut(&mut EmulatedPlatform, &mut HandlerCall<'_, '_>) -> RawDisposition>>;

/// A downward growing stack of frame record slots.
#[derive(Debug)]
pub struct EmulatedStack {
    slots: Box<[FrameRecord]>,
    used: usize,
}

impl EmulatedStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: std::vec![FrameRecord::new(FrameAddr::CHAIN_END, 0); capacity].into_boxed_slice(),
            used: 0,
        }
    }

    pub fn limits(&self) -> StackLimits {
        let low = self.slots.as_ptr().expose_provenance();
        StackLimits::new(low, low + self.slots.len() * FrameRecord::SIZE)
    }

    /// Places `record` in the next free slot below the previously pushed one.
    ///
    /// # Panics
    ///
    /// Panics if all slots are in use.
    pub fn push(&mut self, record: FrameRecord) -> FrameAddr {
        assert!(self.used < self.slots.len(), "emulated stack overflow");
        self.used += 1;
        let index = self.slots.len() - self.used;
        self.slots[index] = record;
        FrameAddr::from_ptr(&raw const self.slots[index])
    }

    /// Frees the slot of `frame` if it is the most recently pushed one.
    pub fn release(&mut self, frame: FrameAddr) {
        if self.used > 0 && self.slot(frame) == Some(self.slots.len() - self.used) {
            self.used -= 1;
        }
    }

    fn slot(&self, frame: FrameAddr) -> Option<usize> {
        let limits = self.limits();
        (frame.is_aligned() && limits.contains_record(frame))
            .then(|| (frame.get() - limits.low) / FrameRecord::SIZE)
    }
}

struct Image {
    base: usize,
    size: usize,
    table: Option<Vec<u32>>,
}

/// A single thread's worth of exception handling state.
pub struct EmulatedPlatform {
    config: Config,
    stack: EmulatedStack,
    secondary: EmulatedStack,
    secondary_active: bool,
    priority: Priority,
    head: FrameAddr,
    images: Vec<Image>,
    behaviors: BTreeMap<usize, Behavior>,
    fallback: Option<RawDisposition>,
    collision_guards: bool,
    /// Installed guard frames and the frame a colliding unwind continues from.
    guards: Vec<(FrameAddr, FrameAddr)>,
    captured: Context,
    trace: Vec<(HandlerMode, FrameAddr)>,
    unlinked: Vec<FrameAddr>,
    detections: HandlerHistory<8>,
    log: DispatchLog<64>,
}

impl core::fmt::Debug for EmulatedPlatform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EmulatedPlatform")
            .field("config", &self.config)
            .field("stack", &self.stack)
            .field("secondary", &self.secondary)
            .field("secondary_active", &self.secondary_active)
            .field("collision_guards", &self.collision_guards)
            .field("priority", &self.priority)
            .field("head", &self.head)
            .field("trace", &self.trace)
            .field("unlinked", &self.unlinked)
            .field("detections", &self.detections)
            .finish_non_exhaustive()
    }
}

impl EmulatedPlatform {
    /// Handler address of the guard frames installed around unwind handlers.
    pub const COLLISION_GUARD: usize = 0xffff_0000;

    /// Creates a platform whose primary and secondary stacks each hold `slots` frame records.
    pub fn new(slots: usize) -> Self {
        let mut captured = Context::default();
        captured.ip = 0x40_1000;
        captured.set_sp(0x7fff_f000);

        Self {
            config: Config::new(),
            stack: EmulatedStack::new(slots),
            secondary: EmulatedStack::new(slots),
            secondary_active: false,
            priority: Priority::PASSIVE,
            head: FrameAddr::CHAIN_END,
            images: Vec::new(),
            behaviors: BTreeMap::new(),
            fallback: None,
            collision_guards: false,
            guards: Vec::new(),
            captured,
            trace: Vec::new(),
            unlinked: Vec::new(),
            detections: HandlerHistory::new(),
            log: DispatchLog::new(),
        }
    }

    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    pub fn set_secondary_active(&mut self, active: bool) {
        self.secondary_active = active;
    }

    /// Registers a frame for `handler` on the primary stack and makes it the chain head.
    pub fn push_frame(&mut self, handler: usize) -> FrameAddr {
        self.head = self.stack.push(FrameRecord::new(self.head, handler));
        self.head
    }

    /// Registers a frame for `handler` on the secondary stack and makes it the chain head.
    pub fn push_secondary_frame(&mut self, handler: usize) -> FrameAddr {
        self.head = self.secondary.push(FrameRecord::new(self.head, handler));
        self.head
    }

    /// Scripts the behavior of `handler`.
    pub fn on<F>(&mut self, handler: usize, behavior: F)
    where
        F: FnMut(&mut EmulatedPlatform, &mut HandlerCall<'_, '_>) -> RawDisposition + 'static,
    {
        self.behaviors.insert(handler, Rc::new(RefCell::new(behavior)));
    }

    /// Makes the unwind trampoline protect every handler it runs with a guard frame, the way a
    /// real trampoline does. An unwind started by the handler that reaches the guard collides
    /// with the running unwind and takes over from the frame after the handler's own.
    pub fn set_collision_guards(&mut self, enabled: bool) {
        self.collision_guards = enabled;
    }

    /// Disposition returned by handlers without a scripted behavior.
    pub fn on_all(&mut self, disposition: RawDisposition) {
        self.fallback = Some(disposition);
    }

    /// Registers a module at `base`. A `table` of `None` marks a module that must not contain
    /// any handlers.
    pub fn add_image(&mut self, base: usize, size: usize, table: Option<Vec<u32>>) {
        self.images.push(Image { base, size, table });
    }

    /// Reads the record at `frame`.
    ///
    /// # Panics
    ///
    /// Panics if `frame` isn't a slot of either stack.
    pub fn read(&self, frame: FrameAddr) -> FrameRecord {
        let (stack, index) = self.locate(frame);
        stack.slots[index]
    }

    /// Overwrites the record at `frame`, e.g. to corrupt its link.
    ///
    /// # Panics
    ///
    /// Panics if `frame` isn't a slot of either stack.
    pub fn write_record(&mut self, frame: FrameAddr, record: FrameRecord) {
        let slot = if let Some(index) = self.stack.slot(frame) {
            &mut self.stack.slots[index]
        } else if let Some(index) = self.secondary.slot(frame) {
            &mut self.secondary.slots[index]
        } else {
            panic!("{frame:?} is not an emulated frame record");
        };
        *slot = record;
    }

    pub fn captured_context(&self) -> &Context {
        &self.captured
    }

    /// Establisher frames of every handler executed for an exception, in execution order.
    pub fn exception_trace(&self) -> Vec<FrameAddr> {
        self.trace_for(HandlerMode::Exception)
    }

    /// Establisher frames of every handler executed for an unwind, in execution order.
    pub fn unwind_trace(&self) -> Vec<FrameAddr> {
        self.trace_for(HandlerMode::Unwind)
    }

    /// Frames unlinked from the chain, in order.
    pub fn unlinked(&self) -> &[FrameAddr] {
        &self.unlinked
    }

    pub fn detections(&self) -> &HandlerHistory<8> {
        &self.detections
    }

    pub fn dispatch_log(&self) -> &DispatchLog<64> {
        &self.log
    }

    fn trace_for(&self, mode: HandlerMode) -> Vec<FrameAddr> {
        self.trace
            .iter()
            .filter(|(m, _)| *m == mode)
            .map(|(_, frame)| *frame)
            .collect()
    }

    fn locate(&self, frame: FrameAddr) -> (&EmulatedStack, usize) {
        if let Some(index) = self.stack.slot(frame) {
            (&self.stack, index)
        } else if let Some(index) = self.secondary.slot(frame) {
            (&self.secondary, index)
        } else {
            panic!("{frame:?} is not an emulated frame record")
        }
    }

    fn execute(&mut self, mut call: HandlerCall<'_, '_>, handler: usize) -> RawDisposition {
        if handler == Self::COLLISION_GUARD {
            return self.guard_disposition(&mut call);
        }

        self.trace.push((call.mode, call.establisher));

        let guard = (self.collision_guards && call.mode == HandlerMode::Unwind)
            .then(|| self.install_guard(call.establisher));

        // a busy behavior means the handler re-entered itself
        let behavior = self.behaviors.get(&handler).cloned();
        let disposition = match behavior.as_deref().map(RefCell::try_borrow_mut) {
            Some(Ok(mut behavior)) => (*behavior)(self, &mut call),
            _ => self
                .fallback
                .unwrap_or_else(|| panic!("no behavior scripted for handler {handler:#x}")),
        };

        if let Some(guard) = guard {
            self.remove_guard(guard);
        }
        disposition
    }

    fn install_guard(&mut self, establisher: FrameAddr) -> FrameAddr {
        let resume = self.read(establisher).next;
        let guard = self
            .stack
            .push(FrameRecord::new(self.head, Self::COLLISION_GUARD));
        self.head = guard;
        self.guards.push((guard, resume));
        guard
    }

    fn remove_guard(&mut self, guard: FrameAddr) {
        self.guards.retain(|(installed, _)| *installed != guard);
        if self.head == guard {
            self.head = self.read(guard).next;
        }
        self.stack.release(guard);
    }

    fn guard_disposition(&self, call: &mut HandlerCall<'_, '_>) -> RawDisposition {
        let resume = self
            .guards
            .iter()
            .find(|(guard, _)| *guard == call.establisher)
            .map(|(_, resume)| *resume);

        match (call.mode, resume) {
            (HandlerMode::Unwind, Some(resume)) => {
                call.dispatcher.registration = resume;
                RawDisposition::COLLIDED_UNWIND
            }
            _ => RawDisposition::CONTINUE_SEARCH,
        }
    }
}

impl Platform for EmulatedPlatform {
    fn config(&self) -> Config {
        self.config
    }

    fn stack_limits(&self) -> StackLimits {
        self.stack.limits()
    }

    fn secondary_stack(&self) -> Option<StackLimits> {
        self.secondary_active.then(|| self.secondary.limits())
    }

    fn current_priority(&self) -> Priority {
        self.priority
    }

    fn chain_head(&self) -> FrameAddr {
        self.head
    }

    fn set_chain_head(&mut self, head: FrameAddr) {
        self.head = head;
    }

    unsafe fn unlink(&mut self, frame: FrameAddr) {
        // Safety: ensured by the caller
        let record = unsafe { self.read_record(frame) };
        self.unlinked.push(frame);
        self.head = record.next;
    }

    fn lookup_function_table(&self, address: usize) -> Option<ImageFunctions<'_>> {
        let image = self
            .images
            .iter()
            .find(|image| (image.base..image.base + image.size).contains(&address))?;

        Some(ImageFunctions {
            base: image.base,
            table: match &image.table {
                Some(table) => FunctionTable::Sorted(table),
                None => FunctionTable::NoHandlers,
            },
        })
    }

    fn invalid_handler_detected(&mut self, report: &InvalidHandler) {
        self.detections.record(*report);
    }

    fn handler_executed(&mut self, execution: &HandlerExecution) {
        self.log.record(*execution);
    }

    fn capture_context(&mut self) -> Context {
        self.captured.clone()
    }

    unsafe fn execute_handler_for_exception(
        &mut self,
        record: &mut ExceptionRecord<'_>,
        establisher: FrameAddr,
        context: &mut Context,
        dispatcher: &mut DispatcherContext,
        handler: usize,
    ) -> RawDisposition {
        let call = HandlerCall {
            mode: HandlerMode::Exception,
            record,
            establisher,
            context,
            dispatcher,
        };
        self.execute(call, handler)
    }

    unsafe fn execute_handler_for_unwind(
        &mut self,
        record: &mut ExceptionRecord<'_>,
        establisher: FrameAddr,
        context: &mut Context,
        dispatcher: &mut DispatcherContext,
        handler: usize,
    ) -> RawDisposition {
        let call = HandlerCall {
            mode: HandlerMode::Unwind,
            record,
            establisher,
            context,
            dispatcher,
        };
        self.execute(call, handler)
    }

    unsafe fn resume(&mut self, context: &Context, raise_alert: bool) -> ! {
        panic::resume_unwind(Box::new(Transfer::Resumed {
            context: context.clone(),
            raise_alert,
        }))
    }

    fn escalate(&mut self, record: &ExceptionRecord<'_>, context: &Context, search_frames: bool) -> ! {
        panic::resume_unwind(Box::new(Transfer::Escalated {
            code: record.code,
            flags: record.flags,
            context: context.clone(),
            search_frames,
        }))
    }

    fn raise(&mut self, record: &ExceptionRecord<'_>) -> ! {
        panic::resume_unwind(Box::new(Transfer::Raised {
            code: record.code,
            flags: record.flags,
            chain: record.chain().map(|record| record.code).collect(),
        }))
    }
}

// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Unwinding the frame chain towards a target frame.

use crate::frame::ChainWalker;
use crate::{
    Context, DispatcherContext, ExceptionCode, ExceptionFlags, ExceptionRecord, Fault, FrameAddr,
    HandlerExecution, HandlerMode, Platform, UnwindDisposition,
};

/// How an unwind ended, if it did not fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unwound {
    /// Reached the requested target frame.
    Target,
    /// Unwound every record because [`FrameAddr::CHAIN_END`] was requested as the target.
    ChainEnd,
    /// Ran off the end of the chain during an exit unwind, or without ever meeting the target.
    Exhausted,
}

/// Unwinds the calling thread's frame chain up to `target`, running every frame's handler in
/// unwind mode and unlinking its record, then resumes execution at the caller with
/// `return_value` in the return value register.
///
/// Without a `target` every registered frame is unwound (an *exit unwind*) and the exception is
/// then escalated through [`Platform::escalate`]; the same happens if `target` is never found.
/// Passing [`FrameAddr::CHAIN_END`] as the target unwinds every frame and resumes locally
/// instead. If `target_ip` is given along with a `target`, execution resumes there.
///
/// When no `record` is supplied a generic [`ExceptionCode::UNWIND`] record is used.
///
/// A target below the current frame, a record outside of the stack or an invalid handler
/// disposition raise a new non-continuable exception chained to `record`.
pub fn unwind<P: Platform + ?Sized>(
    platform: &mut P,
    target: Option<FrameAddr>,
    target_ip: Option<usize>,
    record: Option<&mut ExceptionRecord<'_>>,
    return_value: usize,
) -> ! {
    let mut context = platform.capture_context();

    let mut local;
    let record = match record {
        Some(record) => record,
        None => {
            local = ExceptionRecord::new(ExceptionCode::UNWIND, ExceptionFlags::empty(), context.ip);
            &mut local
        }
    };

    let unwound = unwind_frames(
        platform,
        target,
        target_ip,
        record,
        &mut context,
        return_value,
    );

    match unwound {
        // Safety: every frame between the caller and the captured context's stack pointer that
        // registered a handler has been unwound and unlinked
        Ok(Unwound::Target | Unwound::ChainEnd) => unsafe { platform.resume(&context, false) },
        Ok(Unwound::Exhausted) => {
            log::debug!("unwind exhausted the frame chain, escalating {:?}", record.code);
            platform.escalate(record, &context, false)
        }
        Err(fault) => {
            log::error!("{fault} while unwinding {:?}", record.code);
            let fault = fault.record(record);
            platform.raise(&fault)
        }
    }
}

pub(crate) fn unwind_frames<P: Platform + ?Sized>(
    platform: &mut P,
    target: Option<FrameAddr>,
    target_ip: Option<usize>,
    record: &mut ExceptionRecord<'_>,
    context: &mut Context,
    return_value: usize,
) -> Result<Unwound, Fault> {
    let config = platform.config();

    record.flags |= if target.is_some() {
        ExceptionFlags::UNWINDING
    } else {
        ExceptionFlags::UNWINDING | ExceptionFlags::EXIT_UNWIND
    };

    context.set_sp(config.growth.pop(context.sp(), config.unwind_argument_bytes));
    context.set_return_value(return_value);
    if let (Some(_), Some(ip)) = (target, target_ip) {
        context.ip = ip;
    }

    let mut walker = ChainWalker::new(platform);
    let mut frame = platform.chain_head();
    while !frame.is_chain_end() {
        if Some(frame) == target {
            return Ok(Unwound::Target);
        }

        if let Some(target) = target.filter(|target| !target.is_chain_end()) {
            // going further would only move away from the target
            if config.growth.is_older(frame, target) {
                return Err(Fault::InvalidUnwindTarget { target, frame });
            }
        }

        walker
            .check(platform, frame)
            .map_err(|invalid| Fault::BadStack(invalid.frame))?;

        // Safety: `check` verified the record is aligned and within the active stack
        let handler = unsafe { platform.read_record(frame) }.handler;

        let mut dispatcher = DispatcherContext::new();
        log::trace!("unwinding {frame} through handler {handler:#x}");
        // Safety: the handler was read from the frame's own record
        let disposition = unsafe {
            platform.execute_handler_for_unwind(record, frame, context, &mut dispatcher, handler)
        };
        log::trace!("handler {handler:#x} returned {disposition:?}");
        platform.handler_executed(&HandlerExecution {
            mode: HandlerMode::Unwind,
            establisher: frame,
            handler,
            disposition,
        });

        match UnwindDisposition::try_from(disposition)? {
            UnwindDisposition::ContinueSearch => {}
            UnwindDisposition::CollidedUnwind => {
                log::debug!(
                    "unwind collided at {frame}, continuing from {}",
                    dispatcher.registration
                );
                frame = dispatcher.registration;
                continue;
            }
        }

        // Safety: `frame` was checked above
        let next = unsafe { platform.read_record(frame) }.next;
        // Safety: see above
        unsafe { platform.unlink(frame) };
        frame = next;
    }

    if target == Some(FrameAddr::CHAIN_END) {
        Ok(Unwound::ChainEnd)
    } else {
        Ok(Unwound::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::emulate::{EmulatedPlatform, Transfer, catch};
    use crate::{FrameRecord, Priority, RawDisposition};

    const A: usize = 0xa0;
    const B: usize = 0xb0;
    const C: usize = 0xc0;
    const D: usize = 0xd0;

    /// Builds the chain `[A, B, C, D]` with `A` at the head.
    fn chain_abcd(platform: &mut EmulatedPlatform) -> [FrameAddr; 4] {
        let d = platform.push_frame(D);
        let c = platform.push_frame(C);
        let b = platform.push_frame(B);
        let a = platform.push_frame(A);
        platform.on_all(RawDisposition::CONTINUE_SEARCH);
        [a, b, c, d]
    }

    fn resumed(transfer: Transfer) -> Context {
        match transfer {
            Transfer::Resumed {
                context,
                raise_alert,
            } => {
                assert!(!raise_alert);
                context
            }
            other => panic!("expected execution to resume, got {other:?}"),
        }
    }

    #[test_log::test]
    fn unwind_to_target() {
        let mut platform = EmulatedPlatform::new(8);
        let [a, b, ..] = chain_abcd(&mut platform);
        platform.on(A, |_, call| {
            assert!(call.record.flags.contains(ExceptionFlags::UNWINDING));
            assert!(!call.record.flags.contains(ExceptionFlags::EXIT_UNWIND));
            assert_eq!(call.record.code, ExceptionCode::UNWIND);
            assert_eq!(call.context.return_value(), 42);
            RawDisposition::CONTINUE_SEARCH
        });
        let captured = platform.captured_context().clone();

        let transfer = catch(|| {
            unwind(&mut platform, Some(b), None, None, 42);
        })
        .unwrap_err();

        let context = resumed(transfer);
        assert_eq!(context.return_value(), 42);
        assert_eq!(context.sp(), captured.sp() + 4 * size_of::<usize>());
        assert_eq!(context.ip, captured.ip);

        assert_eq!(platform.unwind_trace(), [a]);
        assert_eq!(platform.unlinked(), [a]);
        assert_eq!(platform.chain_head(), b);
        assert!(platform.exception_trace().is_empty());
    }

    #[test]
    fn target_ip_overrides_resume_address() {
        let mut platform = EmulatedPlatform::new(8);
        let [_, _, c, _] = chain_abcd(&mut platform);

        let transfer = catch(|| {
            unwind(&mut platform, Some(c), Some(0x4000), None, 0);
        })
        .unwrap_err();
        assert_eq!(resumed(transfer).ip, 0x4000);
    }

    #[test]
    fn caller_record_is_passed_to_handlers() {
        let mut platform = EmulatedPlatform::new(8);
        let [_, b, ..] = chain_abcd(&mut platform);
        platform.on(A, |_, call| {
            assert_eq!(call.record.code, ExceptionCode(0xE000_0001));
            assert_eq!(call.record.parameters(), &[7]);
            RawDisposition::CONTINUE_SEARCH
        });

        let mut record = ExceptionRecord::with_parameters(
            ExceptionCode(0xE000_0001),
            ExceptionFlags::empty(),
            0x1000,
            &[7],
        )
        .unwrap();
        let mut context = platform.capture_context();
        let unwound = unwind_frames(&mut platform, Some(b), None, &mut record, &mut context, 1);

        assert_eq!(unwound, Ok(Unwound::Target));
        assert_eq!(record.flags, ExceptionFlags::UNWINDING);
    }

    #[test_log::test]
    fn exit_unwind_escalates() {
        let mut platform = EmulatedPlatform::new(8);
        let frames = chain_abcd(&mut platform);
        platform.on(C, |_, call| {
            assert!(call.record.flags.contains(ExceptionFlags::EXIT_UNWIND));
            RawDisposition::CONTINUE_SEARCH
        });

        let transfer = catch(|| {
            unwind(&mut platform, None, None, None, 0);
        })
        .unwrap_err();

        let Transfer::Escalated {
            code,
            flags,
            search_frames,
            ..
        } = transfer
        else {
            panic!("expected escalation, got {transfer:?}");
        };
        assert_eq!(code, ExceptionCode::UNWIND);
        assert_eq!(flags, ExceptionFlags::UNWINDING | ExceptionFlags::EXIT_UNWIND);
        assert!(!search_frames);

        assert_eq!(platform.unwind_trace(), frames);
        assert_eq!(platform.unlinked(), frames);
        assert!(platform.chain_head().is_chain_end());
    }

    #[test]
    fn chain_end_target_resumes() {
        let mut platform = EmulatedPlatform::new(8);
        let frames = chain_abcd(&mut platform);

        let transfer = catch(|| {
            unwind(&mut platform, Some(FrameAddr::CHAIN_END), None, None, 5);
        })
        .unwrap_err();

        assert_eq!(resumed(transfer).return_value(), 5);
        assert_eq!(platform.unwind_trace(), frames);
        assert!(platform.chain_head().is_chain_end());
    }

    #[test]
    fn missing_target_escalates() {
        let mut platform = EmulatedPlatform::new(8);
        let frames = chain_abcd(&mut platform);
        // older than every frame but never registered
        let target = FrameAddr::new(platform.stack_limits().high + 0x100);

        let mut record = ExceptionRecord::new(ExceptionCode::UNWIND, ExceptionFlags::empty(), 0);
        let mut context = platform.capture_context();
        let unwound = unwind_frames(&mut platform, Some(target), None, &mut record, &mut context, 0);

        assert_eq!(unwound, Ok(Unwound::Exhausted));
        assert_eq!(platform.unwind_trace(), frames);
    }

    #[test_log::test]
    fn target_below_current_frame_raises() {
        let mut platform = EmulatedPlatform::new(8);
        let [a, ..] = chain_abcd(&mut platform);
        let target = FrameAddr::new(a.get() - FrameRecord::SIZE);

        let transfer = catch(|| {
            unwind(&mut platform, Some(target), None, None, 0);
        })
        .unwrap_err();

        assert_eq!(
            transfer,
            Transfer::Raised {
                code: ExceptionCode::INVALID_UNWIND_TARGET,
                flags: ExceptionFlags::NONCONTINUABLE,
                chain: vec![ExceptionCode::INVALID_UNWIND_TARGET, ExceptionCode::UNWIND],
            }
        );
        assert!(platform.unwind_trace().is_empty());
        assert!(platform.unlinked().is_empty());
    }

    #[test]
    fn bad_stack_raises() {
        let mut platform = EmulatedPlatform::new(8);
        let [a, b, ..] = chain_abcd(&mut platform);
        let bogus = FrameAddr::new(b.get() + 1);
        platform.write_record(a, FrameRecord::new(bogus, A));

        let mut record = ExceptionRecord::new(ExceptionCode::UNWIND, ExceptionFlags::empty(), 0);
        let mut context = platform.capture_context();
        let unwound = unwind_frames(&mut platform, None, None, &mut record, &mut context, 0);

        assert_eq!(unwound, Err(Fault::BadStack(bogus)));
        assert_eq!(platform.unwind_trace(), [a]);
        assert_eq!(platform.unlinked(), [a]);
    }

    #[test_log::test]
    fn self_referencing_record_is_unwound_once() {
        let mut platform = EmulatedPlatform::new(8);
        let a = platform.push_frame(A);
        platform.write_record(a, FrameRecord::new(a, A));
        platform.on_all(RawDisposition::CONTINUE_SEARCH);

        let mut record = ExceptionRecord::new(ExceptionCode::UNWIND, ExceptionFlags::empty(), 0);
        let mut context = platform.capture_context();
        let unwound = unwind_frames(&mut platform, None, None, &mut record, &mut context, 0);

        assert_eq!(unwound, Err(Fault::BadStack(a)));
        assert_eq!(platform.unwind_trace(), [a]);
        assert_eq!(platform.unlinked(), [a]);
    }

    #[test]
    fn invalid_disposition_raises() {
        let mut platform = EmulatedPlatform::new(8);
        let [a, ..] = chain_abcd(&mut platform);
        platform.on(A, |_, _| RawDisposition::NESTED_EXCEPTION);

        let transfer = catch(|| {
            unwind(&mut platform, None, None, None, 0);
        })
        .unwrap_err();

        let Transfer::Raised { code, chain, .. } = transfer else {
            panic!("expected a raised fault, got {transfer:?}");
        };
        assert_eq!(code, ExceptionCode::INVALID_DISPOSITION);
        assert_eq!(chain.len(), 2);
        // the handler ran but its frame was not unlinked
        assert_eq!(platform.unwind_trace(), [a]);
        assert!(platform.unlinked().is_empty());
    }

    #[test_log::test]
    fn collided_unwind_continues_from_reported_frame() {
        let mut platform = EmulatedPlatform::new(8);
        let [a, _, c, d] = chain_abcd(&mut platform);
        // A's handler started an unwind of its own that tore down A and B before running
        // into this one
        platform.on(A, move |platform, call| {
            platform.set_chain_head(c);
            call.dispatcher.registration = c;
            RawDisposition::COLLIDED_UNWIND
        });

        let transfer = catch(|| {
            unwind(&mut platform, Some(d), None, None, 0);
        })
        .unwrap_err();

        resumed(transfer);
        assert_eq!(platform.unwind_trace(), [a, c]);
        assert_eq!(platform.unlinked(), [c]);
        assert_eq!(platform.chain_head(), d);
    }

    #[test_log::test]
    fn nested_unwind_collides_with_running_handler() {
        let mut platform = EmulatedPlatform::new(8);
        platform.set_collision_guards(true);
        let [a, b, c, _] = chain_abcd(&mut platform);
        // A's cleanup starts an unwind of its own; it runs into the unwind that is executing A
        // and finishes that one's work before resuming
        platform.on(A, move |platform, _| unwind(platform, Some(c), None, None, 7));

        let transfer = catch(|| {
            unwind(&mut platform, None, None, None, 0);
        })
        .unwrap_err();

        assert_eq!(resumed(transfer).return_value(), 7);
        assert_eq!(platform.unwind_trace(), [a, b]);
        assert_eq!(platform.unlinked(), [b]);
        assert_eq!(platform.chain_head(), c);

        let collided = platform
            .dispatch_log()
            .iter()
            .filter(|execution| execution.disposition == RawDisposition::COLLIDED_UNWIND)
            .count();
        assert_eq!(collided, 1);
    }

    #[test]
    fn collided_frame_is_retested_against_target() {
        let mut platform = EmulatedPlatform::new(8);
        let [a, _, c, _] = chain_abcd(&mut platform);
        platform.on(A, move |_, call| {
            call.dispatcher.registration = c;
            RawDisposition::COLLIDED_UNWIND
        });

        let mut record = ExceptionRecord::new(ExceptionCode::UNWIND, ExceptionFlags::empty(), 0);
        let mut context = platform.capture_context();
        let unwound = unwind_frames(&mut platform, Some(c), None, &mut record, &mut context, 0);

        assert_eq!(unwound, Ok(Unwound::Target));
        assert_eq!(platform.unwind_trace(), [a]);
        assert!(platform.unlinked().is_empty());
    }

    #[test]
    fn unwinds_through_secondary_stack() {
        let mut platform = EmulatedPlatform::new(8);
        let b = platform.push_secondary_frame(B);
        let a = platform.push_secondary_frame(A);
        platform.set_secondary_active(true);
        platform.set_priority(Priority::DISPATCH);
        platform.on_all(RawDisposition::CONTINUE_SEARCH);

        let mut record = ExceptionRecord::new(ExceptionCode::UNWIND, ExceptionFlags::empty(), 0);
        let mut context = platform.capture_context();
        let target = Some(FrameAddr::CHAIN_END);
        let unwound = unwind_frames(&mut platform, target, None, &mut record, &mut context, 0);

        assert_eq!(unwound, Ok(Unwound::ChainEnd));
        assert_eq!(platform.unlinked(), [a, b]);
    }

    #[test]
    fn secondary_stack_is_not_trusted_at_low_priority() {
        let mut platform = EmulatedPlatform::new(8);
        platform.push_frame(C);
        let b = platform.push_secondary_frame(B);
        platform.set_secondary_active(true);
        platform.on_all(RawDisposition::CONTINUE_SEARCH);

        let mut record = ExceptionRecord::new(ExceptionCode::UNWIND, ExceptionFlags::empty(), 0);
        let mut context = platform.capture_context();
        let unwound = unwind_frames(&mut platform, None, None, &mut record, &mut context, 0);

        assert_eq!(unwound, Err(Fault::BadStack(b)));
        assert!(platform.unwind_trace().is_empty());
    }

    proptest! {
        #[test]
        fn unwinds_exactly_the_frames_above_the_target(len in 1usize..16, target_at in 0usize..16) {
            prop_assume!(target_at < len);
            let mut platform = EmulatedPlatform::new(16);
            let mut frames: Vec<_> = (0..len).map(|i| platform.push_frame(0x1000 + i)).collect();
            frames.reverse();
            platform.on_all(RawDisposition::CONTINUE_SEARCH);

            let target = frames[target_at];
            let mut record = ExceptionRecord::new(ExceptionCode::UNWIND, ExceptionFlags::empty(), 0);
            let mut context = platform.capture_context();
            let unwound = unwind_frames(&mut platform, Some(target), None, &mut record, &mut context, 9);

            prop_assert_eq!(unwound, Ok(Unwound::Target));
            prop_assert_eq!(context.return_value(), 9);
            prop_assert_eq!(platform.unwind_trace(), &frames[..target_at]);
            prop_assert_eq!(platform.unlinked(), &frames[..target_at]);
            prop_assert_eq!(platform.chain_head(), target);
        }
    }
}

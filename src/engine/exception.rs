//! Exception pausing: decides, per unwinding exception, whether the thread
//! should stop.

use crate::engine::ThreadExecutionEngine;
use crate::engine::pause::{PauseReason, PauseVerdict};
use crate::engine::step::HookAction;
use crate::runtime::{FrameId, RuntimeHookProvider};

impl<R: RuntimeHookProvider> ThreadExecutionEngine<R> {
    /// Runtime event: an exception is unwinding out of `frame`.
    ///
    /// The same exception unwinds through every enclosing frame in turn; the
    /// handled-exceptions table makes sure one (frame, value) pair pauses at
    /// most once.
    pub fn on_exception_unwind(&self, frame: FrameId, value: R::Value) -> HookAction {
        let (pause_on_exceptions, ignore_caught, is_worker, skip_breakpoints) = {
            let opts = self.options.borrow();
            (
                opts.pause_on_exceptions,
                opts.ignore_caught_exceptions,
                opts.is_worker,
                opts.skip_breakpoints,
            )
        };

        if !pause_on_exceptions {
            return HookAction::Continue;
        }

        // Inside a client evaluation only pause when the evaluation asked
        // for exception visibility; outside, honor the global skip flag.
        match self.client_eval.get() {
            Some(flags) if !flags.report_exceptions => return HookAction::Continue,
            None if skip_breakpoints => return HookAction::Continue,
            _ => {}
        }

        // Interface-not-found probes are thrown and swallowed by native glue
        // constantly on non-worker targets; pausing on them is pure noise.
        if !is_worker && self.runtime.is_interface_not_found_error(&value) {
            return HookAction::Continue;
        }

        if self
            .handled_frame_exceptions
            .borrow()
            .get(&frame)
            .is_some_and(|values| values.contains(&value))
        {
            return HookAction::Continue;
        }

        if ignore_caught && self.exception_will_be_caught(frame) {
            return HookAction::Continue;
        }

        if self.sources.is_frame_blackboxed(frame) {
            return HookAction::Continue;
        }

        // Mark the value handled for this frame and every older one before
        // pausing, so the continued unwind stays silent.
        let chain = self.frame_chain(frame);
        {
            let mut handled = self.handled_frame_exceptions.borrow_mut();
            for id in chain {
                handled.entry(id).or_default().push(value.clone());
            }
        }

        match self.pause_and_respond(Some(frame), PauseReason::Exception { value }, None) {
            PauseVerdict::Terminate => HookAction::Terminate,
            _ => HookAction::Continue,
        }
    }

    /// Whether any enclosing frame's current position sits inside a catch
    /// scope that would swallow the exception.
    fn exception_will_be_caught(&self, frame: FrameId) -> bool {
        self.frame_chain(frame)
            .into_iter()
            .any(|id| self.runtime.frame_in_catch_scope(id))
    }

    /// `frame` and all of its callers, youngest first.
    fn frame_chain(&self, frame: FrameId) -> Vec<FrameId> {
        let mut chain = Vec::new();
        let mut next = Some(frame);
        while let Some(id) = next {
            chain.push(id);
            next = self.runtime.frame(id).and_then(|snap| snap.older);
        }
        chain
    }
}

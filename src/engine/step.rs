//! Stepping: synthesizing enter-frame/step/pop hook state for a requested
//! stepping mode and reacting to the runtime events that state enables.

use crate::engine::ThreadExecutionEngine;
use crate::engine::error::Error;
use crate::engine::event::EventBreakpointId;
use crate::engine::pause::{FrameFinished, PauseReason, PauseReasonKind, PauseVerdict};
use crate::runtime::{Completion, FrameId, Reaction, RuntimeHookProvider};
use crate::weak_error;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Granularity requested for the next pause.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SteppingMode {
    /// Stop at the next eligible breakpoint position.
    Break,
    /// Single statement, stepping into calls.
    Step,
    /// Step over calls within the current frame.
    Next,
    /// Run until the current frame finishes.
    Finish,
    /// Re-invoke the frame's callee from scratch.
    Restart,
}

/// Client resume request payload: which stepping mode, and optionally which
/// pause-scoped frame to step relative to (defaults to the youngest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeLimit {
    pub mode: SteppingMode,
    #[serde(default)]
    pub frame: Option<FrameId>,
}

impl ResumeLimit {
    pub fn new(mode: SteppingMode) -> Self {
        Self { mode, frame: None }
    }
}

/// Immutable context the stepping hooks are evaluated against. Hook state
/// carries this value instead of closing over the engine.
#[derive(Debug, Clone)]
pub(crate) struct SteppingContext<V> {
    pub mode: SteppingMode,
    pub start_frame: Option<FrameId>,
    /// Completion of an already-popped frame, attached to the eventual pause.
    pub completion: Option<Completion<V>>,
}

/// The engine-global enter-frame hook, at most one at a time.
#[derive(Debug, Clone)]
pub(crate) enum EnterFrameHook<V> {
    /// Stepping into new frames (mode step/restart).
    Stepping(SteppingContext<V>),
    /// One-shot interrupt armed by `interrupt("onNext")`.
    InterruptOnNext,
    /// Temporary trap between a "pre"/"post" notification pair, holding the
    /// hook it displaced.
    EventTrap {
        event: EventBreakpointId,
        saved: Box<Option<EnterFrameHook<V>>>,
    },
}

/// Per-frame step/pop hook state.
#[derive(Debug, Clone)]
pub(crate) struct FrameHooks<V> {
    pub on_step: Option<SteppingContext<V>>,
    /// Record promise reactions on every step so async step targets can be
    /// recovered after the frame suspends.
    pub track_reactions: bool,
    pub on_pop: Option<SteppingContext<V>>,
}

impl<V> Default for FrameHooks<V> {
    fn default() -> Self {
        Self {
            on_step: None,
            track_reactions: false,
            on_pop: None,
        }
    }
}

/// What the runtime should do with the execution that fired a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Keep executing the debuggee.
    Continue,
    /// Abort the current debuggee execution (engine torn down or the frame
    /// is being replaced).
    Terminate,
    /// The frame was re-invoked; its prior execution is abandoned.
    Restarted,
}

impl<V> From<Completion<V>> for FrameFinished<V> {
    fn from(completion: Completion<V>) -> Self {
        match completion {
            Completion::Return(v) | Completion::Yield(v) | Completion::Await(v) => {
                FrameFinished::Return(v)
            }
            Completion::Throw(v) => FrameFinished::Throw(v),
        }
    }
}

impl<R: RuntimeHookProvider> ThreadExecutionEngine<R> {
    /// Install stepping hooks for a resume request carrying a resume limit.
    pub(crate) fn handle_resume_limit(&self, limit: ResumeLimit) -> Result<(), Error> {
        let frame = match limit.frame {
            Some(frame) => {
                let valid = self
                    .session
                    .borrow()
                    .as_ref()
                    .is_some_and(|s| s.is_valid_frame_handle(frame));
                if !valid {
                    return Err(Error::FrameNotOnStack(frame));
                }
                Some(frame)
            }
            None => self
                .session
                .borrow()
                .as_ref()
                .and_then(|s| s.frames().first().copied()),
        };

        let Some(frame) = frame else {
            // Paused without a frame (immediate interrupt before any script
            // ran): pause on the next script to execute.
            self.set_enter_frame_hook(Some(EnterFrameHook::Stepping(SteppingContext {
                mode: SteppingMode::Step,
                start_frame: None,
                completion: None,
            })));
            return Ok(());
        };

        if limit.mode == SteppingMode::Restart {
            let snap = self
                .runtime
                .frame(frame)
                .ok_or(Error::FrameNotFound(frame))?;
            // Restart is only legal for plain synchronous calls; anything
            // else is a silent no-op.
            if !snap.is_restartable() {
                return Ok(());
            }
            self.requested_frame_restart.set(Some(frame));
        }

        self.attach_stepping_hooks(frame, limit.mode, None);
        Ok(())
    }

    /// Synthesize and install the hook set for `mode`, starting at `frame`.
    pub(crate) fn attach_stepping_hooks(
        &self,
        frame: FrameId,
        mut mode: SteppingMode,
        completion: Option<Completion<R::Value>>,
    ) {
        // Stepping out of a frame that already reported its pop behaves like
        // step-over in the parent.
        if mode == SteppingMode::Finish && self.reported_pops.borrow().contains(&frame) {
            mode = SteppingMode::Next;
        }

        let step_frame = self.next_step_frame(frame);
        if step_frame.is_none() {
            // No frames left to watch: pause on the next script to execute.
            mode = SteppingMode::Step;
        }

        let ctx = SteppingContext {
            mode,
            start_frame: Some(frame),
            completion,
        };

        if matches!(mode, SteppingMode::Step | SteppingMode::Restart) {
            self.set_enter_frame_hook(Some(EnterFrameHook::Stepping(ctx.clone())));
        }

        if let Some(step_frame) = step_frame {
            let mut hooks = FrameHooks::default();

            if matches!(mode, SteppingMode::Step | SteppingMode::Break | SteppingMode::Next) {
                let has_script = self
                    .runtime
                    .frame(step_frame)
                    .is_some_and(|s| s.script.is_some());
                if has_script && !self.sources.is_frame_blackboxed(step_frame) {
                    hooks.on_step = Some(ctx.clone());
                }
            }
            if mode != SteppingMode::Restart {
                hooks.track_reactions = true;
            }
            hooks.on_pop = Some(ctx);

            let observe_step = hooks.on_step.is_some() || hooks.track_reactions;
            self.frame_hooks.borrow_mut().insert(step_frame, hooks);
            self.runtime.observe_frame(step_frame, observe_step, true);
        }
    }

    /// The frame whose step events the engine should watch next.
    ///
    /// A frame that already popped steps in its caller, or - across an await
    /// boundary - in the frame its pending promise feeds into. Restarted
    /// frames are skipped over transparently.
    pub(crate) fn next_step_frame(&self, frame: FrameId) -> Option<FrameId> {
        let mut candidate = if self.reported_pops.borrow().contains(&frame) {
            let snap = self.runtime.frame(frame)?;
            snap.older.or_else(|| self.async_parent_frame(frame))
        } else {
            Some(frame)
        };

        while let Some(id) = candidate {
            let snap = self.runtime.frame(id)?;
            snap.script?;
            if self.restarted_frames.borrow().contains(&id) {
                candidate = snap.older;
                continue;
            }
            return Some(id);
        }
        None
    }

    /// Walk promise-reaction chains upward to the first frame that resumes
    /// when this suspended frame's promise resolves.
    fn async_parent_frame(&self, frame: FrameId) -> Option<FrameId> {
        let promise = self.runtime.async_promise(frame)?;
        let cached = self.promise_reactions.borrow().get(&promise).cloned();
        let mut reactions = match cached {
            Some(reactions) => reactions,
            None => self.runtime.promise_reactions(promise),
        };

        // Any number of intermediate promises may sit between this frame and
        // the awaiting one; unwind them all.
        loop {
            match reactions.first() {
                Some(&Reaction::Promise(promise)) => {
                    reactions = self.runtime.promise_reactions(promise)
                }
                Some(&Reaction::Frame(frame)) => return Some(frame),
                _ => return None,
            }
        }
    }

    /// Memoize the reactions of the frame's promise. Reaction lists shrink
    /// once the runtime starts resolving them, so keep the longest seen.
    fn cache_promise_reactions(&self, frame: FrameId) {
        let Some(promise) = self.runtime.async_promise(frame) else {
            return;
        };
        let reactions = self.runtime.promise_reactions(promise);
        if reactions.is_empty() {
            return;
        }
        let mut memo = self.promise_reactions.borrow_mut();
        match memo.get(&promise) {
            Some(existing) if existing.len() >= reactions.len() => {}
            _ => {
                memo.insert(promise, reactions);
            }
        }
    }

    /// Drop the step/pop hooks of every watched frame, including a frame
    /// left suspended at an await/yield boundary.
    pub(crate) fn clear_stepping_hooks(&self) {
        if let Some(frame) = self.suspended_frame.take() {
            self.frame_hooks.borrow_mut().remove(&frame);
            self.runtime.observe_frame(frame, false, false);
        }
        let watched: Vec<FrameId> = self.frame_hooks.borrow_mut().drain().map(|(id, _)| id).collect();
        for frame in watched {
            self.runtime.observe_frame(frame, false, false);
        }
    }

    /// Replace the engine-global enter-frame hook, keeping the runtime's
    /// delivery toggle in sync.
    pub(crate) fn set_enter_frame_hook(&self, hook: Option<EnterFrameHook<R::Value>>) {
        let enabled = hook.is_some();
        self.enter_frame_hook.replace(hook);
        self.runtime.observe_enter_frame(enabled);
    }

    /// Runtime event: a new frame was pushed.
    pub fn on_enter_frame(&self, frame: FrameId) -> HookAction {
        let hook = self.enter_frame_hook.borrow().clone();
        match hook {
            None => HookAction::Continue,
            Some(EnterFrameHook::Stepping(_)) => {
                if self.requested_frame_restart.get().is_some() {
                    // The entering call is being replaced by a restart.
                    return HookAction::Terminate;
                }
                if self.sources.is_frame_blackboxed(frame) {
                    return HookAction::Continue;
                }
                // Continue forward until the new frame reaches a valid step
                // target.
                let ctx = SteppingContext {
                    mode: SteppingMode::Next,
                    start_frame: None,
                    completion: None,
                };
                self.frame_hooks.borrow_mut().insert(
                    frame,
                    FrameHooks {
                        on_step: Some(ctx.clone()),
                        track_reactions: false,
                        on_pop: Some(ctx),
                    },
                );
                self.runtime.observe_frame(frame, true, true);
                HookAction::Continue
            }
            Some(EnterFrameHook::InterruptOnNext) => {
                self.set_enter_frame_hook(None);
                match self.pause_and_respond(
                    Some(frame),
                    PauseReason::Interrupted { on_next: true },
                    None,
                ) {
                    PauseVerdict::Terminate => HookAction::Terminate,
                    _ => HookAction::Continue,
                }
            }
            Some(EnterFrameHook::EventTrap { event, saved }) => {
                if self.sources.is_frame_blackboxed(frame) {
                    return HookAction::Continue;
                }
                // First JS frame of the instrumented call: put the displaced
                // hook back and pause here.
                self.set_enter_frame_hook(*saved);
                match self.pause_on_event_breakpoint(frame, event) {
                    PauseVerdict::Terminate => HookAction::Terminate,
                    _ => HookAction::Continue,
                }
            }
        }
    }

    /// Runtime event: a watched frame reached a new bytecode offset.
    pub fn on_frame_step(&self, frame: FrameId) -> HookAction {
        let (track_reactions, ctx) = {
            let hooks = self.frame_hooks.borrow();
            match hooks.get(&frame) {
                None => return HookAction::Continue,
                Some(hooks) => (hooks.track_reactions, hooks.on_step.clone()),
            }
        };

        if track_reactions {
            self.cache_promise_reactions(frame);
        }

        let Some(ctx) = ctx else {
            return HookAction::Continue;
        };
        if !self.is_valid_step_stop(frame, ctx.start_frame) {
            return HookAction::Continue;
        }

        let finished = ctx.completion.map(FrameFinished::from);
        match self.pause_and_respond(Some(frame), PauseReason::ResumeLimit, finished) {
            PauseVerdict::Terminate => HookAction::Terminate,
            _ => HookAction::Continue,
        }
    }

    /// Continue unless the offset is a breakpoint-eligible position outside
    /// blackboxed code and the engine has moved since the prior pause; pause
    /// only in a new frame or at a statement start.
    fn is_valid_step_stop(&self, frame: FrameId, start_frame: Option<FrameId>) -> bool {
        let meta = self.runtime.offset_meta(frame);
        if !meta.is_breakpoint
            || self.sources.is_frame_blackboxed(frame)
            || !self.has_moved(frame, PauseReasonKind::ResumeLimit)
        {
            return false;
        }
        start_frame != Some(frame) || meta.is_step_start
    }

    /// Runtime event: a watched frame finished (or suspended).
    pub fn on_frame_pop(&self, frame: FrameId, completion: Completion<R::Value>) -> HookAction {
        let ctx = {
            let hooks = self.frame_hooks.borrow();
            match hooks.get(&frame).and_then(|h| h.on_pop.clone()) {
                None => return HookAction::Continue,
                Some(ctx) => ctx,
            }
        };

        if self.requested_frame_restart.get() == Some(frame) {
            return self.restart_frame(frame);
        }

        // Leaving an async/generator frame at an await/yield boundary is not
        // a real pop. Remember the frame so its hooks are cleared on the
        // next pause, and stop watching for new frames.
        if ctx.mode != SteppingMode::Finish && completion.is_suspension() {
            self.suspended_frame.set(Some(frame));
            self.set_enter_frame_hook(None);
            return HookAction::Continue;
        }

        // The frame is gone; subsequent step events matter on its caller.
        self.reported_pops.borrow_mut().insert(frame);
        self.suspended_frame.set(Some(frame));

        if ctx.mode != SteppingMode::Finish && !self.sources.is_frame_blackboxed(frame) {
            let finished = Some(FrameFinished::from(completion));
            let verdict = self.pause_and_respond(Some(frame), PauseReason::ResumeLimit, finished);
            // A restart may have been requested while this pause was live.
            if self.requested_frame_restart.get() == Some(frame) {
                return self.restart_frame(frame);
            }
            return match verdict {
                PauseVerdict::Terminate => HookAction::Terminate,
                _ => HookAction::Continue,
            };
        }

        self.attach_stepping_hooks(frame, SteppingMode::Next, Some(completion));
        HookAction::Continue
    }

    /// Re-invoke the frame's callee with its original this/arguments,
    /// replacing the current execution with a fresh call.
    pub(crate) fn restart_frame(&self, frame: FrameId) -> HookAction {
        self.requested_frame_restart.set(None);
        self.prior_pause.replace(None);

        let Some(snap) = self.runtime.frame(frame) else {
            return HookAction::Continue;
        };
        if !snap.is_restartable() {
            return HookAction::Continue;
        }

        self.restarted_frames.borrow_mut().insert(frame);
        if weak_error!(self.runtime.reinvoke_frame(frame), "frame restart failed:").is_none() {
            return HookAction::Continue;
        }
        HookAction::Restarted
    }
}

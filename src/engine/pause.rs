//! Pause coordination: the thread state machine and the nested cooperative
//! loop that blocks a paused debuggee without stopping the host process.

use crate::engine::{InterruptMode, InterruptOutcome, ThreadExecutionEngine};
use crate::engine::error::Error;
use crate::runtime::{FrameId, ResolvedLocation, RuntimeHookProvider};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use strum_macros::{AsRefStr, Display, EnumString};

/// Thread actor possible states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ThreadState {
    /// Before `attach` is called.
    Detached,
    /// Default state, the thread isn't paused.
    Running,
    /// Paused on any type of breakpoint, or after a client interrupt.
    Paused,
    /// After the engine is destroyed. Terminal.
    Exited,
}

/// Why a pause happened. Exactly one reason per pause.
#[derive(Debug, Clone, PartialEq)]
pub enum PauseReason<V> {
    AlreadyPaused,
    Interrupted { on_next: bool },
    MutationBreakpoint { kind: MutationKind, message: String },
    DebuggerStatement,
    Exception { value: V },
    Xhr,
    EventBreakpoint { id: crate::engine::event::EventBreakpointId, message: String },
    /// A stepping limit was reached.
    ResumeLimit,
    /// A source-location breakpoint was hit; `condition_thrown` is set when
    /// the breakpoint condition itself threw.
    Breakpoint { condition_thrown: bool },
}

impl<V> PauseReason<V> {
    pub fn kind(&self) -> PauseReasonKind {
        match self {
            PauseReason::AlreadyPaused => PauseReasonKind::AlreadyPaused,
            PauseReason::Interrupted { .. } => PauseReasonKind::Interrupted,
            PauseReason::MutationBreakpoint { .. } => PauseReasonKind::MutationBreakpoint,
            PauseReason::DebuggerStatement => PauseReasonKind::DebuggerStatement,
            PauseReason::Exception { .. } => PauseReasonKind::Exception,
            PauseReason::Xhr => PauseReasonKind::Xhr,
            PauseReason::EventBreakpoint { .. } => PauseReasonKind::EventBreakpoint,
            PauseReason::ResumeLimit => PauseReasonKind::ResumeLimit,
            PauseReason::Breakpoint { condition_thrown: false } => PauseReasonKind::Breakpoint,
            PauseReason::Breakpoint { condition_thrown: true } => {
                PauseReasonKind::BreakpointConditionThrown
            }
        }
    }
}

/// Reason tag without its payload, used by the repause policy and diagnostics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr,
    serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "camelCase")]
pub enum PauseReasonKind {
    AlreadyPaused,
    Interrupted,
    MutationBreakpoint,
    DebuggerStatement,
    Exception,
    #[strum(serialize = "XHR")]
    Xhr,
    EventBreakpoint,
    ResumeLimit,
    Breakpoint,
    BreakpointConditionThrown,
}

/// DOM mutation flavours a mutation breakpoint can fire for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr,
    serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "camelCase")]
pub enum MutationKind {
    SubtreeModified,
    NodeRemoved,
    AttributeModified,
}

/// Frame completion data attached to a stepping pause.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameFinished<V> {
    Return(V),
    Throw(V),
}

/// Everything an observer needs to render one pause.
#[derive(Debug, Clone)]
pub struct PausedEvent<V> {
    pub reason: PauseReason<V>,
    pub frame: Option<FrameId>,
    pub location: Option<ResolvedLocation>,
    pub frame_finished: Option<FrameFinished<V>>,
}

/// Pause-scoped state, created on Running -> Paused and dropped on resume.
pub struct PauseSession {
    /// Frame the pause was reported at, if any.
    pub frame: Option<FrameId>,
    /// Live-frame registry snapshotted at pause time; handles absent from
    /// this list are stale and must not be dereferenced.
    frames: Vec<FrameId>,
    /// Resolved by `resume`, watched by the nested loop.
    pub(crate) token: Rc<Cell<bool>>,
}

impl PauseSession {
    pub fn is_valid_frame_handle(&self, frame: FrameId) -> bool {
        self.frames.contains(&frame)
    }

    pub fn frames(&self) -> &[FrameId] {
        &self.frames
    }
}

/// Memory of the previous pause, used to suppress same-spot repausing.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PriorPause {
    pub kind: PauseReasonKind,
    /// (line, column) of the pause frame, when it had one.
    pub location: Option<(u32, u32)>,
}

/// Outcome of an attempted pause, seen by the hook that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PauseVerdict {
    /// The pause was suppressed; the debuggee keeps running.
    Skipped,
    /// A full pause happened and was resumed.
    Resumed,
    /// The engine was torn down while paused; the debuggee execution that
    /// triggered the pause must not continue.
    Terminate,
}

/// Shared stack of nested pauses across every engine of one host process.
///
/// Each pause is a stack frame of the cooperative loop, so resumes are only
/// legal innermost-first.
#[derive(Clone, Default)]
pub struct NestedLoopStack {
    stack: Rc<RefCell<Vec<LoopEntry>>>,
}

struct LoopEntry {
    engine: u32,
    token: Rc<Cell<bool>>,
}

impl NestedLoopStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enter(&self, engine: u32) -> Rc<Cell<bool>> {
        let token = Rc::new(Cell::new(false));
        self.stack.borrow_mut().push(LoopEntry {
            engine,
            token: token.clone(),
        });
        token
    }

    /// Engine id of the most recently entered (innermost) pause.
    pub fn innermost(&self) -> Option<u32> {
        self.stack.borrow().last().map(|e| e.engine)
    }

    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Remove the engine's entry once its nested loop unwinds.
    pub(crate) fn leave(&self, engine: u32) {
        let mut stack = self.stack.borrow_mut();
        if let Some(idx) = stack.iter().rposition(|e| e.engine == engine) {
            stack.remove(idx);
        }
    }
}

impl<R: RuntimeHookProvider> ThreadExecutionEngine<R> {
    /// Handle a request to resume execution of the debuggee.
    ///
    /// With a resume limit the appropriate stepping hooks are installed
    /// before the thread continues; without one any lingering stepping hooks
    /// are dropped.
    pub fn resume(&self, limit: Option<crate::engine::step::ResumeLimit>) -> Result<(), Error> {
        match self.state.get() {
            ThreadState::Paused => {}
            ThreadState::Exited => return Err(Error::Exited),
            state => return Err(Error::WrongState(state)),
        }

        // Multiple nested pause loops (several debuggees paused at once) may
        // only unwind in LIFO order.
        if self.loops.innermost() != Some(self.id) {
            return Err(Error::WrongOrder);
        }

        match limit {
            Some(limit) => self.handle_resume_limit(limit)?,
            None => self.clear_stepping_hooks(),
        }

        self.do_resume();
        Ok(())
    }

    /// Handle a request to pause the debuggee.
    pub fn interrupt(&self, mode: InterruptMode) -> Result<InterruptOutcome, Error> {
        match self.state.get() {
            ThreadState::Exited => Ok(InterruptOutcome::Exited),
            ThreadState::Paused => {
                // Idempotent notification: report the existing pause, change
                // nothing.
                let event = PausedEvent {
                    reason: PauseReason::AlreadyPaused,
                    frame: self.session.borrow().as_ref().and_then(|s| s.frame),
                    location: None,
                    frame_finished: None,
                };
                crate::weak_error!(self.hooks.on_paused(&event).map_err(Error::Hook));
                Ok(InterruptOutcome::AlreadyPaused)
            }
            ThreadState::Detached => Err(Error::WrongState(ThreadState::Detached)),
            ThreadState::Running => match mode {
                // A tight loop has no synchronous stop point; arm a one-shot
                // enter-frame hook instead.
                InterruptMode::OnNext => {
                    self.set_enter_frame_hook(Some(crate::engine::step::EnterFrameHook::InterruptOnNext));
                    Ok(InterruptOutcome::Armed)
                }
                InterruptMode::Immediate => {
                    match self.pause_and_respond(
                        None,
                        PauseReason::Interrupted { on_next: false },
                        None,
                    ) {
                        PauseVerdict::Skipped => Err(Error::NotInterrupted),
                        PauseVerdict::Resumed | PauseVerdict::Terminate => {
                            Ok(InterruptOutcome::Paused)
                        }
                    }
                }
            },
        }
    }

    /// Pause the debuggee by entering a nested cooperative loop, and stay
    /// there until `resume` is invoked out-of-band.
    ///
    /// Returns [`PauseVerdict::Skipped`] when the engine is already paused:
    /// pauses never stack, the code that triggered the second pause simply
    /// keeps running.
    pub(crate) fn pause_and_respond(
        &self,
        frame: Option<FrameId>,
        reason: PauseReason<R::Value>,
        frame_finished: Option<FrameFinished<R::Value>>,
    ) -> PauseVerdict {
        let kind = reason.kind();
        let token = match self.begin_pause(frame) {
            Some(token) => token,
            None => return PauseVerdict::Skipped,
        };

        let location = frame.and_then(|f| self.sources.frame_location(f));
        let event = PausedEvent {
            reason,
            frame,
            location,
            frame_finished,
        };
        if let Err(e) = self.hooks.on_paused(&event) {
            // A broken observer must not wedge the debuggee: drop the pause
            // and keep running.
            log::warn!(target: "engine", "pause notification failed, dropping pause: {e:#}");
            self.abort_pause();
            return PauseVerdict::Skipped;
        }

        // Only an established pause counts as "we paused here" for the
        // repause suppression.
        self.prior_pause.replace(Some(PriorPause {
            kind,
            location: location.map(|l| (l.line, l.column)),
        }));

        log::debug!(target: "engine", "thread {} paused, reason: {kind}", self.id);

        // Block the calling execution context. Out-of-band work (client
        // requests, other debuggees) happens inside `spin_once`.
        while !token.get() {
            self.driver.spin_once();
        }
        self.loops.leave(self.id);

        log::debug!(target: "engine", "thread {} resumed", self.id);

        if self.state.get() == ThreadState::Exited {
            return PauseVerdict::Terminate;
        }
        PauseVerdict::Resumed
    }

    /// Running -> Paused transition. Returns the pause token, or `None` if
    /// already paused (nested-pause suppression).
    fn begin_pause(&self, frame: Option<FrameId>) -> Option<Rc<Cell<bool>>> {
        if self.state.get() == ThreadState::Paused {
            return None;
        }
        self.state.set(ThreadState::Paused);

        // Hooks are always cleared before a new pause decision is made.
        self.set_enter_frame_hook(None);
        self.requested_frame_restart.set(None);
        self.clear_stepping_hooks();

        // Rebuild the live-frame registry; handles into the previous pause's
        // stack become stale here.
        let frames = self.snapshot_live_frames();
        self.handled_frame_exceptions
            .borrow_mut()
            .retain(|id, _| frames.contains(id));

        let token = self.loops.enter(self.id);
        self.session.replace(Some(PauseSession {
            frame,
            frames,
            token: token.clone(),
        }));
        Some(token)
    }

    /// Roll a half-established pause back to Running.
    fn abort_pause(&self) {
        self.session.replace(None);
        self.loops.leave(self.id);
        self.state.set(ThreadState::Running);
    }

    /// Only resume and notify observers; no stepping hook handling.
    pub(crate) fn do_resume(&self) {
        self.state.set(ThreadState::Running);
        if let Some(session) = self.session.replace(None) {
            session.token.set(true);
        }
        self.hooks.on_resumed();
    }

    /// Collect every frame currently on the stack, youngest first.
    fn snapshot_live_frames(&self) -> Vec<FrameId> {
        let mut frames = Vec::new();
        let mut next = self.runtime.newest_frame();
        while let Some(id) = next {
            match self.runtime.frame(id) {
                Some(snap) if snap.on_stack => {
                    frames.push(id);
                    next = snap.older;
                }
                // A frame may disappear under us while the registry is being
                // rebuilt; drop the stale tail silently.
                _ => break,
            }
        }
        frames
    }

    /// Whether pausing at the frame's current position would repeat the
    /// previous pause.
    ///
    /// Revisiting the same line/column with the same pause kind (loops,
    /// recursion) is suppressed; arriving there for a different kind of
    /// pause is not. The equivalence list extends "same kind" for pairs like
    /// breakpoint-condition-thrown / breakpoint.
    pub(crate) fn has_moved(&self, frame: FrameId, new_kind: PauseReasonKind) -> bool {
        let prior = match *self.prior_pause.borrow() {
            Some(prior) => prior,
            None => return true,
        };
        let Some((prior_line, prior_column)) = prior.location else {
            return true;
        };
        let Some(location) = self.sources.frame_location(frame) else {
            return true;
        };
        if location.line != prior_line || location.column != prior_column {
            return true;
        }

        let same_kind = prior.kind == new_kind
            || self
                .repause_policy
                .borrow()
                .iter()
                .any(|&(a, b)| a == prior.kind && b == new_kind);
        !same_kind
    }

    /// Forget the prior pause when a breakpoint is added or removed at the
    /// same location: stepping must re-evaluate there from scratch.
    pub(crate) fn maybe_clear_prior_pause(&self, line: u32, column: Option<u32>) {
        let mut prior = self.prior_pause.borrow_mut();
        if let Some(PriorPause {
            location: Some((prior_line, prior_column)),
            ..
        }) = *prior
        {
            if prior_line == line && column.is_none_or(|c| c == prior_column) {
                *prior = None;
            }
        }
    }
}

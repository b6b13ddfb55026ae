//! Execution control engine for a single debuggee thread.
//!
//! [`ThreadExecutionEngine`] owns the pause state machine, the breakpoint
//! stores and the stepping hook state. It talks to the underlying runtime
//! through [`RuntimeHookProvider`] and blocks paused debuggees by driving a
//! host-supplied [`LoopDriver`] inside a nested cooperative loop.
//!
//! The engine and the runtime live on one logical thread and re-enter each
//! other through hook dispatch, so all engine state sits behind `Cell` and
//! `RefCell` and every method takes `&self`. No `RefCell` borrow is ever
//! held across a loop-driver spin.

pub mod breakpoint;
pub mod error;
pub mod event;
pub mod exception;
pub mod pause;
pub mod step;
pub mod watchpoint;
pub mod xhr;

use self::breakpoint::{BreakpointLocation, BreakpointOptions, BreakpointStore};
use self::error::Error;
use self::event::{EventBreakpointId, EventBreakpoints};
use self::pause::{
    MutationKind, NestedLoopStack, PauseReason, PauseReasonKind, PauseSession, PauseVerdict,
    PausedEvent, PriorPause, ThreadState,
};
use self::step::{EnterFrameHook, FrameHooks, HookAction};
use self::watchpoint::WatchpointMap;
use self::xhr::XhrBreakpoint;
use crate::runtime::{
    FrameId, LoopDriver, PromiseId, Reaction, RuntimeHookProvider, ScriptInfo, SourceManager,
};
use crate::weak_error;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};
use strum_macros::{AsRefStr, Display, EnumString};

static ENGINE_IDS: AtomicU32 = AtomicU32::new(1);

/// Observer of engine lifecycle events (a wire layer, a UI, a test harness).
///
/// `on_paused` runs before the nested loop starts spinning; an `Err` from it
/// drops the pause instead of wedging the debuggee.
pub trait EventHook<V> {
    fn on_paused(&self, event: &PausedEvent<V>) -> anyhow::Result<()>;
    fn on_resumed(&self);
    /// A logpoint or an event breakpoint in logging mode produced output.
    fn on_log_point(&self, frame: FrameId, message: &str);
}

/// Engine behaviour switches, settable at attach time and via `reconfigure`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineOptions {
    /// Suppress every pausing decision except explicit interrupts.
    pub skip_breakpoints: bool,
    pub pause_on_exceptions: bool,
    pub ignore_caught_exceptions: bool,
    pub should_pause_on_debugger_statement: bool,
    /// Armed event breakpoints log instead of pausing.
    pub log_event_breakpoints: bool,
    pub observe_asm_js: bool,
    pub observe_wasm: bool,
    /// Worker engines see interface-not-found exceptions for real.
    pub is_worker: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            skip_breakpoints: false,
            pause_on_exceptions: false,
            ignore_caught_exceptions: false,
            should_pause_on_debugger_statement: true,
            log_event_breakpoints: false,
            observe_asm_js: false,
            observe_wasm: false,
            is_worker: false,
        }
    }
}

/// Partial options update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconfigureOptions {
    pub skip_breakpoints: Option<bool>,
    pub pause_on_exceptions: Option<bool>,
    pub ignore_caught_exceptions: Option<bool>,
    pub should_pause_on_debugger_statement: Option<bool>,
    pub log_event_breakpoints: Option<bool>,
    pub observe_asm_js: Option<bool>,
    pub observe_wasm: Option<bool>,
    pub event_breakpoints: Option<Vec<EventBreakpointId>>,
    pub breakpoints: Option<Vec<BreakpointSpec>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointSpec {
    pub location: BreakpointLocation,
    #[serde(default)]
    pub options: BreakpointOptions,
}

/// How an interrupt request should take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "camelCase")]
pub enum InterruptMode {
    /// Pause synchronously, right now.
    Immediate,
    /// Pause the next time any frame is entered.
    OnNext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// An immediate interrupt paused and has since been resumed.
    Paused,
    /// An on-next interrupt armed its enter-frame hook.
    Armed,
    /// The thread was already paused; the existing pause was re-reported.
    AlreadyPaused,
    Exited,
}

/// Flags of an active client-evaluation scope.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClientEvalFlags {
    pub disable_breaks: bool,
    pub report_exceptions: bool,
}

/// RAII guard marking "the engine is evaluating on behalf of the client".
/// Pausing decisions and the exception filter consult the flags; the
/// previous scope is restored on drop, so scopes nest.
pub struct ClientEvaluation<'a, R: RuntimeHookProvider> {
    engine: &'a ThreadExecutionEngine<R>,
    prev: Option<ClientEvalFlags>,
}

impl<R: RuntimeHookProvider> Drop for ClientEvaluation<'_, R> {
    fn drop(&mut self) {
        self.engine.client_eval.set(self.prev);
    }
}

/// Diagnostic snapshot of the engine, serializable for bug reports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDump {
    pub state: String,
    pub options: EngineOptions,
    pub breakpoints: Vec<BreakpointLocation>,
    pub event_breakpoints: Vec<EventBreakpointId>,
    pub xhr_breakpoints: Vec<XhrBreakpoint>,
    pub nested_pause_depth: usize,
}

/// Pause, resume, stepping and breakpoint control for one debuggee thread.
pub struct ThreadExecutionEngine<R: RuntimeHookProvider> {
    pub(crate) id: u32,
    pub(crate) runtime: R,
    pub(crate) sources: Rc<dyn SourceManager>,
    pub(crate) hooks: Box<dyn EventHook<R::Value>>,
    pub(crate) driver: Box<dyn LoopDriver>,
    pub(crate) loops: NestedLoopStack,

    pub(crate) state: Cell<ThreadState>,
    pub(crate) session: RefCell<Option<PauseSession>>,
    pub(crate) prior_pause: RefCell<Option<PriorPause>>,
    /// Pause-kind pairs treated as "the same kind" by repause suppression.
    pub(crate) repause_policy: RefCell<Vec<(PauseReasonKind, PauseReasonKind)>>,
    pub(crate) options: RefCell<EngineOptions>,
    pub(crate) client_eval: Cell<Option<ClientEvalFlags>>,

    pub(crate) enter_frame_hook: RefCell<Option<EnterFrameHook<R::Value>>>,
    pub(crate) frame_hooks: RefCell<HashMap<FrameId, FrameHooks<R::Value>>>,
    /// Frame left suspended at an await/yield; its hooks are cleared on the
    /// next pause.
    pub(crate) suspended_frame: Cell<Option<FrameId>>,
    pub(crate) reported_pops: RefCell<HashSet<FrameId>>,
    pub(crate) restarted_frames: RefCell<HashSet<FrameId>>,
    pub(crate) requested_frame_restart: Cell<Option<FrameId>>,
    pub(crate) promise_reactions: RefCell<HashMap<PromiseId, Vec<Reaction>>>,

    pub(crate) breakpoints: RefCell<BreakpointStore>,
    pub(crate) handled_frame_exceptions: RefCell<HashMap<FrameId, Vec<R::Value>>>,
    pub(crate) event_breakpoints: RefCell<EventBreakpoints>,
    pub(crate) xhr_breakpoints: RefCell<Vec<XhrBreakpoint>>,
    pub(crate) watchpoints: RefCell<WatchpointMap>,
    /// URLs that get a first-line breakpoint as soon as a matching script
    /// appears.
    pub(crate) on_load_urls: RefCell<HashSet<String>>,
}

impl<R: RuntimeHookProvider> ThreadExecutionEngine<R> {
    pub fn new(
        runtime: R,
        sources: Rc<dyn SourceManager>,
        hooks: Box<dyn EventHook<R::Value>>,
        driver: Box<dyn LoopDriver>,
    ) -> Self {
        Self {
            id: ENGINE_IDS.fetch_add(1, Ordering::Relaxed),
            runtime,
            sources,
            hooks,
            driver,
            loops: NestedLoopStack::new(),
            state: Cell::new(ThreadState::Detached),
            session: RefCell::new(None),
            prior_pause: RefCell::new(None),
            repause_policy: RefCell::new(vec![
                (
                    PauseReasonKind::BreakpointConditionThrown,
                    PauseReasonKind::Breakpoint,
                ),
                (
                    PauseReasonKind::Breakpoint,
                    PauseReasonKind::BreakpointConditionThrown,
                ),
            ]),
            options: RefCell::new(EngineOptions::default()),
            client_eval: Cell::new(None),
            enter_frame_hook: RefCell::new(None),
            frame_hooks: RefCell::new(HashMap::new()),
            suspended_frame: Cell::new(None),
            reported_pops: RefCell::new(HashSet::new()),
            restarted_frames: RefCell::new(HashSet::new()),
            requested_frame_restart: Cell::new(None),
            promise_reactions: RefCell::new(HashMap::new()),
            breakpoints: RefCell::new(BreakpointStore::new()),
            handled_frame_exceptions: RefCell::new(HashMap::new()),
            event_breakpoints: RefCell::new(EventBreakpoints::default()),
            xhr_breakpoints: RefCell::new(Vec::new()),
            watchpoints: RefCell::new(WatchpointMap::default()),
            on_load_urls: RefCell::new(HashSet::new()),
        }
    }

    /// Share a nested-loop stack between engines so pauses of several
    /// debuggees enforce LIFO resume against each other.
    pub fn with_nested_loop_stack(mut self, loops: NestedLoopStack) -> Self {
        self.loops = loops;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> ThreadState {
        self.state.get()
    }

    pub fn options(&self) -> EngineOptions {
        self.options.borrow().clone()
    }

    /// Replace the pause-kind equivalence pairs used by repause suppression.
    pub fn set_repause_equivalences(&self, pairs: Vec<(PauseReasonKind, PauseReasonKind)>) {
        self.repause_policy.replace(pairs);
    }

    /// Start controlling the debuggee. Legal exactly once, from `Detached`.
    pub fn attach(&self, options: EngineOptions) -> Result<(), Error> {
        match self.state.get() {
            ThreadState::Exited => return Err(Error::Exited),
            ThreadState::Running | ThreadState::Paused => {
                return Err(Error::WrongState(self.state.get()));
            }
            ThreadState::Detached => {}
        }

        self.runtime.set_observe_asm_js(options.observe_asm_js);
        self.runtime.set_observe_wasm(options.observe_wasm);
        self.options.replace(options);

        self.runtime.enable();
        self.state.set(ThreadState::Running);
        log::debug!(target: "engine", "thread {} attached", self.id);
        Ok(())
    }

    /// Apply a partial options update. Legal in any live state, including
    /// while paused.
    pub fn reconfigure(&self, update: ReconfigureOptions) -> Result<(), Error> {
        if self.state.get() == ThreadState::Exited {
            return Err(Error::Exited);
        }

        {
            let mut opts = self.options.borrow_mut();
            if let Some(v) = update.skip_breakpoints {
                opts.skip_breakpoints = v;
            }
            if let Some(v) = update.pause_on_exceptions {
                opts.pause_on_exceptions = v;
            }
            if let Some(v) = update.ignore_caught_exceptions {
                opts.ignore_caught_exceptions = v;
            }
            if let Some(v) = update.should_pause_on_debugger_statement {
                opts.should_pause_on_debugger_statement = v;
            }
            if let Some(v) = update.log_event_breakpoints {
                opts.log_event_breakpoints = v;
            }
            if let Some(v) = update.observe_asm_js {
                opts.observe_asm_js = v;
                self.runtime.set_observe_asm_js(v);
            }
            if let Some(v) = update.observe_wasm {
                opts.observe_wasm = v;
                self.runtime.set_observe_wasm(v);
            }
        }

        if let Some(ids) = update.event_breakpoints {
            self.set_active_event_breakpoints(ids.into_iter().collect());
        }
        if let Some(breakpoints) = update.breakpoints {
            for bp in breakpoints {
                self.set_breakpoint(bp.location, bp.options)?;
            }
        }
        Ok(())
    }

    /// `logEventBreakpoints` toggle; returns the value now in effect.
    pub fn toggle_event_logging(&self, log_events: bool) -> bool {
        self.options.borrow_mut().log_event_breakpoints = log_events;
        log_events
    }

    /// Arm first-line breakpoints for sources that have not loaded yet.
    pub fn set_breakpoint_on_load(&self, urls: impl IntoIterator<Item = String>) {
        self.on_load_urls.replace(urls.into_iter().collect());
    }

    /// Enter a client-evaluation scope. While the guard lives, pausing is
    /// suppressed when `disable_breaks` is set, and unwinding exceptions are
    /// reported only when `report_exceptions` is set.
    pub fn client_evaluation_scope(
        &self,
        disable_breaks: bool,
        report_exceptions: bool,
    ) -> ClientEvaluation<'_, R> {
        let prev = self.client_eval.get();
        self.client_eval.set(Some(ClientEvalFlags {
            disable_breaks,
            report_exceptions,
        }));
        ClientEvaluation { engine: self, prev }
    }

    /// Evaluate an expression for the engine's own use (breakpoint
    /// conditions, logpoints) with pausing suppressed.
    pub(crate) fn evaluate_guarded(
        &self,
        frame: FrameId,
        expr: &str,
    ) -> Result<R::Value, R::Value> {
        let _scope = self.client_evaluation_scope(true, false);
        self.runtime.evaluate_in_frame(frame, expr)
    }

    pub(crate) fn breaks_disabled(&self) -> bool {
        self.options.borrow().skip_breakpoints
            || self.client_eval.get().is_some_and(|flags| flags.disable_breaks)
    }

    /// Runtime event: the debuggee executed a `debugger` statement.
    pub fn on_debugger_statement(&self, frame: FrameId) -> HookAction {
        if !self.options.borrow().should_pause_on_debugger_statement
            || self.breaks_disabled()
            || self.sources.is_frame_blackboxed(frame)
            || !self.has_moved(frame, PauseReasonKind::DebuggerStatement)
            // A breakpoint at this exact position already paused (or chose
            // not to); the statement must not pause a second time.
            || self.at_breakpoint_location(frame)
        {
            return HookAction::Continue;
        }

        match self.pause_and_respond(Some(frame), PauseReason::DebuggerStatement, None) {
            PauseVerdict::Terminate => HookAction::Terminate,
            _ => HookAction::Continue,
        }
    }

    /// A DOM mutation matched an armed mutation breakpoint.
    pub fn pause_for_mutation_breakpoint(
        &self,
        kind: MutationKind,
        message: String,
    ) -> HookAction {
        if self.state.get() != ThreadState::Running || self.breaks_disabled() {
            return HookAction::Continue;
        }
        let frame = self.runtime.newest_frame();
        if let Some(frame) = frame {
            if self.sources.is_frame_blackboxed(frame) {
                return HookAction::Continue;
            }
        }

        match self.pause_and_respond(
            frame,
            PauseReason::MutationBreakpoint { kind, message },
            None,
        ) {
            PauseVerdict::Terminate => HookAction::Terminate,
            _ => HookAction::Continue,
        }
    }

    /// Runtime event: a script became known (compiled or resurrected).
    pub fn on_new_script(&self, script: &ScriptInfo) {
        self.apply_breakpoints_to_script(script);
        self.maybe_prime_first_statement(script);

        if let Some(url) = &script.url {
            if self.on_load_urls.borrow().contains(url) {
                weak_error!(
                    self.set_breakpoint(
                        BreakpointLocation {
                            anchor: breakpoint::BreakpointAnchor::Url(url.clone()),
                            line: 1,
                            column: None,
                        },
                        BreakpointOptions::default(),
                    ),
                    "on-load breakpoint:"
                );
            }
        }
    }

    pub fn dump_thread(&self) -> ThreadDump {
        ThreadDump {
            state: self.state.get().to_string(),
            options: self.options(),
            breakpoints: self.breakpoint_locations(),
            event_breakpoints: self.active_event_breakpoints(),
            xhr_breakpoints: self.xhr_breakpoints(),
            nested_pause_depth: self.loops.depth(),
        }
    }

    /// Tear the engine down. A live pause is resumed first so the nested
    /// loop unwinds; the execution that triggered it sees
    /// [`HookAction::Terminate`]. Terminal and idempotent.
    pub fn destroy(&self) {
        if self.state.get() == ThreadState::Exited {
            return;
        }
        let was_paused = self.state.get() == ThreadState::Paused;
        self.state.set(ThreadState::Exited);
        log::debug!(target: "engine", "thread {} destroyed", self.id);

        if was_paused {
            if let Some(session) = self.session.replace(None) {
                session.token.set(true);
            }
            self.hooks.on_resumed();
        }

        self.set_enter_frame_hook(None);
        self.clear_stepping_hooks();
        self.remove_all_watchpoints();
        self.remove_all_xhr_breakpoints();
        self.set_active_event_breakpoints(HashSet::new());

        self.prior_pause.replace(None);
        self.reported_pops.borrow_mut().clear();
        self.restarted_frames.borrow_mut().clear();
        self.promise_reactions.borrow_mut().clear();
        self.handled_frame_exceptions.borrow_mut().clear();
        self.on_load_urls.borrow_mut().clear();

        self.runtime.disable();
        self.runtime.remove_all_debuggees();
    }
}

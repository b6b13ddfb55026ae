//! Interfaces to the underlying execution engine.
//!
//! The control engine never owns frames, scripts or values: it observes them
//! through [`RuntimeHookProvider`] and resolves them to stable source
//! positions through [`SourceManager`]. Hosts implement these traits on top
//! of the real runtime instrumentation API (or on a mock for tests).

use std::fmt::Debug;

/// Identity of one activation record on the debuggee call stack.
///
/// A frame handle is only meaningful while the underlying frame is on the
/// stack; holders must re-check [`FrameSnapshot::on_stack`] after every
/// resume.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct FrameId(pub u64);

/// Identity of a compiled script known to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptId(pub u64);

/// Identity of a promise object, used for async stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromiseId(pub u64);

/// Identity of a source known to the source manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SourceActorId(pub u64);

/// Identity of a debuggee object observed by a watchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

/// What kind of activation a frame is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Call,
    Eval,
    Global,
    Module,
    WasmCall,
}

/// Immutable view of a frame, valid until the debuggee resumes.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub id: FrameId,
    /// False once the activation has been popped; a stale handle must not be
    /// used for anything but identity comparison.
    pub on_stack: bool,
    /// Next older (caller) frame.
    pub older: Option<FrameId>,
    pub script: Option<ScriptId>,
    /// Current bytecode offset inside `script`.
    pub offset: u64,
    pub kind: FrameKind,
    pub is_generator_function: bool,
    pub is_async_function: bool,
}

impl FrameSnapshot {
    /// A frame is restartable only if it is a plain synchronous call.
    pub fn is_restartable(&self) -> bool {
        self.kind == FrameKind::Call && !self.is_generator_function && !self.is_async_function
    }
}

/// Properties of one bytecode offset, used to validate step stops.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetMeta {
    /// The offset is an eligible breakpoint position.
    pub is_breakpoint: bool,
    /// The offset is the start of a new statement.
    pub is_step_start: bool,
}

/// Script metadata needed by the breakpoint machinery.
#[derive(Debug, Clone)]
pub struct ScriptInfo {
    pub id: ScriptId,
    pub source: SourceActorId,
    pub url: Option<String>,
    pub format: ScriptFormat,
    /// Function bodies never carry a "first statement" of their script.
    pub is_function: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFormat {
    Js,
    Wasm,
}

/// Filter for [`RuntimeHookProvider::find_scripts`].
#[derive(Debug, Clone, Copy)]
pub enum ScriptFilter<'a> {
    All,
    Url(&'a str),
    Source(SourceActorId),
}

impl ScriptFilter<'_> {
    pub fn matches(&self, script: &ScriptInfo) -> bool {
        match self {
            ScriptFilter::All => true,
            ScriptFilter::Url(url) => script.url.as_deref() == Some(*url),
            ScriptFilter::Source(source) => script.source == *source,
        }
    }
}

/// One entry of a promise reaction list.
#[derive(Debug, Clone, Copy)]
pub enum Reaction {
    /// The reaction forwards into another promise.
    Promise(PromiseId),
    /// The reaction resumes a suspended frame.
    Frame(FrameId),
    /// A host reaction the engine cannot step into.
    Opaque,
}

/// How a frame finished (or suspended) execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<V> {
    Return(V),
    Throw(V),
    Yield(V),
    Await(V),
}

impl<V> Completion<V> {
    /// Await and yield completions leave the frame suspended on the stack
    /// rather than truly popping it.
    pub fn is_suspension(&self) -> bool {
        matches!(self, Completion::Yield(_) | Completion::Await(_))
    }
}

/// Slot identifying which store entry a script breakpoint belongs to, so the
/// engine can detach one entry without touching the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointSlot(pub u32);

impl BreakpointSlot {
    /// Reserved slot for the "first statement" event breakpoint.
    pub const FIRST_STATEMENT: BreakpointSlot = BreakpointSlot(0);
}

/// Instrumentation interface of the underlying execution engine.
///
/// All methods take `&self`: the engine and the runtime live on one logical
/// thread and re-enter each other through hook dispatch, so the host side is
/// expected to use interior mutability exactly like the engine does.
pub trait RuntimeHookProvider {
    /// Exception values, completion values and evaluation results.
    type Value: Clone + PartialEq + Debug;

    fn enable(&self);
    fn disable(&self);
    fn remove_all_debuggees(&self);

    /// Youngest frame currently on the stack, if any JS is executing.
    fn newest_frame(&self) -> Option<FrameId>;
    fn frame(&self, id: FrameId) -> Option<FrameSnapshot>;
    /// Metadata for the frame's current offset.
    fn offset_meta(&self, frame: FrameId) -> OffsetMeta;

    fn find_scripts(&self, filter: ScriptFilter<'_>) -> Vec<ScriptInfo>;
    /// Offset of the first reachable statement of a top-level script.
    fn first_statement_offset(&self, script: ScriptId) -> Option<u64>;
    /// Concrete offsets matching a line/column breakpoint request.
    fn breakpoint_offsets(&self, script: ScriptId, line: u32, column: Option<u32>) -> Vec<u64>;
    /// Install an opaque breakpoint owned by `slot` at `offset`.
    fn set_breakpoint(&self, script: ScriptId, offset: u64, slot: BreakpointSlot)
        -> anyhow::Result<()>;
    /// Detach every breakpoint owned by `slot` from `script`.
    fn clear_breakpoints(&self, script: ScriptId, slot: BreakpointSlot);

    /// Toggle delivery of enter-frame events.
    fn observe_enter_frame(&self, enabled: bool);
    /// Toggle delivery of per-frame step/pop events.
    fn observe_frame(&self, frame: FrameId, step: bool, pop: bool);

    /// Evaluate an expression in a frame; `Err` carries the thrown value.
    fn evaluate_in_frame(&self, frame: FrameId, expr: &str)
        -> Result<Self::Value, Self::Value>;
    fn value_is_truthy(&self, value: &Self::Value) -> bool;
    fn render_value(&self, value: &Self::Value) -> String;
    /// Re-invoke the frame's callee with its original this/arguments.
    fn reinvoke_frame(&self, frame: FrameId) -> anyhow::Result<()>;

    /// Promise a suspended async frame is parked on.
    fn async_promise(&self, frame: FrameId) -> Option<PromiseId>;
    fn promise_reactions(&self, promise: PromiseId) -> Vec<Reaction>;

    /// Whether the frame's current offset sits inside a catch scope.
    fn frame_in_catch_scope(&self, frame: FrameId) -> bool;
    /// Host sentinel errors that are thrown and swallowed by native glue and
    /// must never pause (interface-not-found noise on non-worker targets).
    fn is_interface_not_found_error(&self, value: &Self::Value) -> bool;

    fn set_observe_asm_js(&self, observe: bool);
    fn set_observe_wasm(&self, observe: bool);

    /// Toggle the network-open observer feeding XHR breakpoints.
    fn observe_network(&self, enabled: bool);
    /// Toggle the notification bus subscription feeding event breakpoints.
    fn observe_event_notifications(&self, enabled: bool);
}

/// Resolved source position of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub source: SourceActorId,
    pub line: u32,
    pub column: u32,
}

/// Maps frames to stable source positions and holds the blackbox list.
pub trait SourceManager {
    fn frame_location(&self, frame: FrameId) -> Option<ResolvedLocation>;
    /// Blackboxed sources are skipped by every pausing decision.
    fn is_frame_blackboxed(&self, frame: FrameId) -> bool;
    /// URL of a source, when it has one (inline scripts share their page URL).
    fn source_url(&self, source: SourceActorId) -> Option<String>;
}

/// One beat of the host event loop, driven while a pause blocks.
///
/// `pause` spins this until `resume` resolves the pause token; timers, I/O
/// callbacks and other threads' pause loops all run inside `spin_once`.
pub trait LoopDriver {
    fn spin_once(&self);
}

//! Execution control for debuggee threads: pause/resume state machine,
//! stepping, breakpoints (source, XHR, event, mutation) and watchpoints.
//!
//! The crate is runtime-agnostic. A host embeds it by implementing the
//! [`runtime::RuntimeHookProvider`], [`runtime::SourceManager`] and
//! [`runtime::LoopDriver`] traits, forwarding runtime instrumentation events
//! into [`engine::ThreadExecutionEngine`]'s `on_*` entry points, and driving
//! client requests (`resume`, `interrupt`, breakpoint edits) from inside the
//! loop driver while a pause is blocking.

pub mod engine;
pub mod runtime;

pub use engine::breakpoint::{BreakpointAnchor, BreakpointLocation, BreakpointOptions};
pub use engine::error::Error;
pub use engine::event::{EventBreakpointId, EventNotification, NotificationPhase};
pub use engine::pause::{
    FrameFinished, MutationKind, NestedLoopStack, PauseReason, PauseReasonKind, PausedEvent,
    ThreadState,
};
pub use engine::step::{HookAction, ResumeLimit, SteppingMode};
pub use engine::watchpoint::WatchpointKind;
pub use engine::xhr::{OpeningRequest, RequestCause, XhrBreakpoint};
pub use engine::{
    EngineOptions, EventHook, InterruptMode, InterruptOutcome, ReconfigureOptions,
    ThreadExecutionEngine,
};

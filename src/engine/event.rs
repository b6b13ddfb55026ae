//! Event breakpoints: pausing when the runtime dispatches an instrumented
//! event (DOM events, timers, script first-statement execution).

use crate::engine::ThreadExecutionEngine;
use crate::engine::error::Error;
use crate::engine::pause::{PauseReason, PauseVerdict};
use crate::engine::step::{EnterFrameHook, HookAction};
use crate::runtime::{
    BreakpointSlot, FrameId, RuntimeHookProvider, ScriptFilter, ScriptFormat, ScriptInfo,
};
use crate::weak_error;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const FIRST_STATEMENT_ID: &str = "script.source.firstStatement";

/// Opaque descriptor of one instrumentable event, as the client names it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventBreakpointId(pub String);

impl EventBreakpointId {
    /// The pseudo-event "a script's first statement executes". Unlike the
    /// others it is implemented with script breakpoints, not the
    /// notification bus.
    pub fn first_statement() -> Self {
        Self(FIRST_STATEMENT_ID.to_string())
    }

    pub fn is_first_statement(&self) -> bool {
        self.0 == FIRST_STATEMENT_ID
    }
}

/// Phase of a two-phase notification bracketing an instrumented call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPhase {
    Pre,
    Post,
}

/// One delivery from the notification bus.
#[derive(Debug, Clone)]
pub struct EventNotification {
    pub event: EventBreakpointId,
    /// `None` for single-phase notifications that pause immediately.
    pub phase: Option<NotificationPhase>,
}

/// Armed event breakpoints and the notification-bus subscription state.
#[derive(Default)]
pub(crate) struct EventBreakpoints {
    active: HashSet<EventBreakpointId>,
    subscribed: bool,
}

impl EventBreakpoints {
    pub(crate) fn contains(&self, id: &EventBreakpointId) -> bool {
        self.active.contains(id)
    }

    fn has_first_statement(&self) -> bool {
        self.active.iter().any(EventBreakpointId::is_first_statement)
    }

    fn needs_subscription(&self) -> bool {
        self.active.iter().any(|id| !id.is_first_statement())
    }
}

impl<R: RuntimeHookProvider> ThreadExecutionEngine<R> {
    /// Arm additional event breakpoints.
    pub fn add_event_breakpoints(&self, ids: impl IntoIterator<Item = EventBreakpointId>) {
        let mut active = self.event_breakpoints.borrow().active.clone();
        active.extend(ids);
        self.set_active_event_breakpoints(active);
    }

    /// Disarm event breakpoints.
    pub fn remove_event_breakpoints(&self, ids: impl IntoIterator<Item = EventBreakpointId>) {
        let mut active = self.event_breakpoints.borrow().active.clone();
        for id in ids {
            active.remove(&id);
        }
        self.set_active_event_breakpoints(active);
    }

    /// Replace the armed set wholesale, reconciling the notification-bus
    /// subscription and the first-statement script instrumentation.
    pub fn set_active_event_breakpoints(&self, ids: HashSet<EventBreakpointId>) {
        let (first_armed, first_disarmed, subscribe, unsubscribe) = {
            let mut state = self.event_breakpoints.borrow_mut();
            let had_first = state.has_first_statement();
            let was_subscribed = state.subscribed;
            state.active = ids;
            let has_first = state.has_first_statement();
            let needs = state.needs_subscription();
            state.subscribed = needs;
            (
                has_first && !had_first,
                had_first && !has_first,
                needs && !was_subscribed,
                was_subscribed && !needs,
            )
        };

        if subscribe {
            self.runtime.observe_event_notifications(true);
        }
        if unsubscribe {
            self.runtime.observe_event_notifications(false);
        }

        if first_armed {
            for script in self.runtime.find_scripts(ScriptFilter::All) {
                self.maybe_prime_first_statement(&script);
            }
        }
        if first_disarmed {
            for script in self.runtime.find_scripts(ScriptFilter::All) {
                self.runtime
                    .clear_breakpoints(script.id, BreakpointSlot::FIRST_STATEMENT);
            }
        }
    }

    pub fn active_event_breakpoints(&self) -> Vec<EventBreakpointId> {
        self.event_breakpoints.borrow().active.iter().cloned().collect()
    }

    /// Install the first-statement breakpoint into a script, when the
    /// pseudo-event is armed and the script is an eligible top-level JS one.
    pub(crate) fn maybe_prime_first_statement(&self, script: &ScriptInfo) {
        if !self.event_breakpoints.borrow().has_first_statement() {
            return;
        }
        if script.format != ScriptFormat::Js || script.is_function {
            return;
        }
        let Some(offset) = self.runtime.first_statement_offset(script.id) else {
            return;
        };
        weak_error!(
            self.runtime
                .set_breakpoint(script.id, offset, BreakpointSlot::FIRST_STATEMENT)
                .map_err(|e| Error::Instrumentation(script.id, e)),
            "first-statement instrumentation:"
        );
    }

    /// A script breakpoint owned by the reserved first-statement slot fired.
    pub(crate) fn on_first_statement_hit(&self, frame: FrameId) -> HookAction {
        let armed = self.event_breakpoints.borrow().has_first_statement();
        if !armed {
            // Leftover instrumentation from a disarmed pseudo-event.
            return HookAction::Continue;
        }
        match self.pause_on_event_breakpoint(frame, EventBreakpointId::first_statement()) {
            PauseVerdict::Terminate => HookAction::Terminate,
            _ => HookAction::Continue,
        }
    }

    /// Runtime event: the notification bus delivered an instrumented event.
    pub fn on_event_notification(&self, notification: EventNotification) -> HookAction {
        let EventNotification { event, phase } = notification;
        if !self.event_breakpoints.borrow().contains(&event) {
            return HookAction::Continue;
        }

        match phase {
            // The instrumented call is about to run. Trap its first JS frame
            // with a temporary enter-frame hook, keeping whatever hook was
            // installed so "post" can put it back.
            Some(NotificationPhase::Pre) => {
                let saved = self.enter_frame_hook.borrow().clone();
                self.set_enter_frame_hook(Some(EnterFrameHook::EventTrap {
                    event,
                    saved: Box::new(saved),
                }));
                HookAction::Continue
            }
            // The call finished (possibly without entering any JS frame);
            // drop the trap and restore the displaced hook.
            Some(NotificationPhase::Post) => {
                let trap = matches!(
                    &*self.enter_frame_hook.borrow(),
                    Some(EnterFrameHook::EventTrap { event: trapped, .. }) if *trapped == event
                );
                if trap {
                    let saved = match self.enter_frame_hook.borrow_mut().take() {
                        Some(EnterFrameHook::EventTrap { saved, .. }) => *saved,
                        other => other,
                    };
                    self.set_enter_frame_hook(saved);
                }
                HookAction::Continue
            }
            // Single-phase: pause right here on the newest frame, if any.
            None => match self.runtime.newest_frame() {
                Some(frame) if !self.sources.is_frame_blackboxed(frame) => {
                    match self.pause_on_event_breakpoint(frame, event) {
                        PauseVerdict::Terminate => HookAction::Terminate,
                        _ => HookAction::Continue,
                    }
                }
                _ => HookAction::Continue,
            },
        }
    }

    /// Pause (or, in logging mode, report) an armed event breakpoint.
    pub(crate) fn pause_on_event_breakpoint(
        &self,
        frame: FrameId,
        event: EventBreakpointId,
    ) -> PauseVerdict {
        if !self.event_breakpoints.borrow().contains(&event) || self.breaks_disabled() {
            return PauseVerdict::Skipped;
        }

        if self.options.borrow().log_event_breakpoints {
            self.hooks.on_log_point(frame, &event.0);
            return PauseVerdict::Skipped;
        }

        let message = event.0.clone();
        self.pause_and_respond(
            Some(frame),
            PauseReason::EventBreakpoint { id: event, message },
            None,
        )
    }
}

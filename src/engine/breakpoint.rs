//! Source-location breakpoints: the persistent store, script instrumentation
//! and hit handling (conditions and logpoints included).

use crate::engine::ThreadExecutionEngine;
use crate::engine::error::Error;
use crate::engine::pause::{PauseReason, PauseReasonKind, PauseVerdict, ThreadState};
use crate::engine::step::HookAction;
use crate::runtime::{
    BreakpointSlot, FrameId, RuntimeHookProvider, ScriptFilter, ScriptFormat, ScriptInfo,
    SourceActorId,
};
use crate::weak_error;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// What a breakpoint location is anchored to. URL anchors survive reloads
/// and match scripts that appear later; source anchors bind one loaded
/// source exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakpointAnchor {
    Source(SourceActorId),
    Url(String),
}

/// Persistent key of one breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BreakpointLocation {
    pub anchor: BreakpointAnchor,
    pub line: u32,
    #[serde(default)]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BreakpointOptions {
    /// Pause only when this expression evaluates truthy in the paused frame.
    #[serde(default)]
    pub condition: Option<String>,
    /// Logpoint: report the evaluated value instead of pausing.
    #[serde(default)]
    pub log_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub location: BreakpointLocation,
    pub options: BreakpointOptions,
    pub(crate) slot: BreakpointSlot,
}

/// Breakpoints keyed by location. Insertion order is kept for diagnostics.
#[derive(Default)]
pub(crate) struct BreakpointStore {
    entries: IndexMap<BreakpointLocation, Breakpoint>,
    // Slot 0 is reserved for the first-statement event breakpoint.
    next_slot: u32,
}

impl BreakpointStore {
    pub(crate) fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            next_slot: 1,
        }
    }

    /// Insert or update an entry; returns its slot. Setting a breakpoint
    /// that already exists with equal options is idempotent.
    pub(crate) fn upsert(
        &mut self,
        location: BreakpointLocation,
        options: BreakpointOptions,
    ) -> BreakpointSlot {
        if let Some(existing) = self.entries.get_mut(&location) {
            existing.options = options;
            return existing.slot;
        }
        let slot = BreakpointSlot(self.next_slot);
        self.next_slot += 1;
        self.entries.insert(
            location.clone(),
            Breakpoint {
                location,
                options,
                slot,
            },
        );
        slot
    }

    pub(crate) fn remove(&mut self, location: &BreakpointLocation) -> Option<Breakpoint> {
        self.entries.shift_remove(location)
    }

    pub(crate) fn by_slot(&self, slot: BreakpointSlot) -> Option<&Breakpoint> {
        self.entries.values().find(|bp| bp.slot == slot)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.entries.values()
    }

    pub(crate) fn drain(&mut self) -> Vec<Breakpoint> {
        self.entries.drain(..).map(|(_, bp)| bp).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<R: RuntimeHookProvider> ThreadExecutionEngine<R> {
    /// Create or update a breakpoint and instrument every matching script.
    pub fn set_breakpoint(
        &self,
        location: BreakpointLocation,
        options: BreakpointOptions,
    ) -> Result<(), Error> {
        if self.state.get() == ThreadState::Exited {
            return Err(Error::Exited);
        }

        // Adding a breakpoint where the engine last paused must let stepping
        // pause there again.
        self.maybe_clear_prior_pause(location.line, location.column);

        let slot = self
            .breakpoints
            .borrow_mut()
            .upsert(location.clone(), options);
        log::debug!(target: "engine", "breakpoint set at {location:?}");

        for script in self.scripts_for_anchor(&location.anchor) {
            self.instrument_script(&script, &location, slot);
        }
        Ok(())
    }

    /// Remove a breakpoint and detach its instrumentation everywhere.
    pub fn remove_breakpoint(&self, location: &BreakpointLocation) {
        let Some(removed) = self.breakpoints.borrow_mut().remove(location) else {
            return;
        };
        log::debug!(target: "engine", "breakpoint removed at {location:?}");

        self.maybe_clear_prior_pause(location.line, location.column);
        for script in self.scripts_for_anchor(&location.anchor) {
            self.runtime.clear_breakpoints(script.id, removed.slot);
        }
    }

    /// Detach every breakpoint from the runtime but keep the store intact,
    /// so a later re-enable can reinstall them.
    pub fn disable_all_breakpoints(&self) {
        let store = self.breakpoints.borrow();
        for bp in store.iter() {
            for script in self.scripts_for_anchor(&bp.location.anchor) {
                self.runtime.clear_breakpoints(script.id, bp.slot);
            }
        }
    }

    /// Detach and forget every breakpoint.
    pub fn remove_all_breakpoints(&self) {
        let drained = self.breakpoints.borrow_mut().drain();
        for bp in drained {
            for script in self.scripts_for_anchor(&bp.location.anchor) {
                self.runtime.clear_breakpoints(script.id, bp.slot);
            }
        }
    }

    pub fn breakpoint_locations(&self) -> Vec<BreakpointLocation> {
        self.breakpoints
            .borrow()
            .iter()
            .map(|bp| bp.location.clone())
            .collect()
    }

    /// Reinstall every stored breakpoint that matches a newly introduced
    /// script.
    pub(crate) fn apply_breakpoints_to_script(&self, script: &ScriptInfo) {
        let matching: Vec<(BreakpointLocation, BreakpointSlot)> = self
            .breakpoints
            .borrow()
            .iter()
            .filter(|bp| self.anchor_matches_script(&bp.location.anchor, script))
            .map(|bp| (bp.location.clone(), bp.slot))
            .collect();
        for (location, slot) in matching {
            self.instrument_script(script, &location, slot);
        }
    }

    /// Install runtime breakpoints for one store entry into one script.
    /// Instrumentation failures are logged and skipped, never propagated.
    fn instrument_script(
        &self,
        script: &ScriptInfo,
        location: &BreakpointLocation,
        slot: BreakpointSlot,
    ) {
        if script.format != ScriptFormat::Js {
            return;
        }
        let offsets = self
            .runtime
            .breakpoint_offsets(script.id, location.line, location.column);
        for offset in offsets {
            weak_error!(
                self.runtime
                    .set_breakpoint(script.id, offset, slot)
                    .map_err(|e| Error::Instrumentation(script.id, e))
            );
        }
    }

    fn scripts_for_anchor(&self, anchor: &BreakpointAnchor) -> Vec<ScriptInfo> {
        match anchor {
            BreakpointAnchor::Source(source) => {
                self.runtime.find_scripts(ScriptFilter::Source(*source))
            }
            BreakpointAnchor::Url(url) => self.runtime.find_scripts(ScriptFilter::Url(url)),
        }
    }

    pub(crate) fn anchor_matches_script(
        &self,
        anchor: &BreakpointAnchor,
        script: &ScriptInfo,
    ) -> bool {
        match anchor {
            BreakpointAnchor::Source(source) => script.source == *source,
            BreakpointAnchor::Url(url) => script.url.as_deref() == Some(url.as_str()),
        }
    }

    /// Whether a stored breakpoint covers the frame's current position.
    /// Debugger statements at such positions do not pause twice.
    pub(crate) fn at_breakpoint_location(&self, frame: FrameId) -> bool {
        let Some(location) = self.sources.frame_location(frame) else {
            return false;
        };
        let store = self.breakpoints.borrow();
        let covered = store.iter().any(|bp| {
            if bp.location.line != location.line {
                return false;
            }
            if bp.location.column.is_some_and(|c| c != location.column) {
                return false;
            }
            match &bp.location.anchor {
                BreakpointAnchor::Source(source) => *source == location.source,
                BreakpointAnchor::Url(url) => {
                    self.sources.source_url(location.source).as_deref() == Some(url.as_str())
                }
            }
        });
        covered
    }

    /// Runtime event: an installed breakpoint was hit.
    pub fn on_breakpoint_hit(&self, frame: FrameId, slot: BreakpointSlot) -> HookAction {
        if slot == BreakpointSlot::FIRST_STATEMENT {
            return self.on_first_statement_hit(frame);
        }

        if self.breaks_disabled()
            || self.sources.is_frame_blackboxed(frame)
            || !self.has_moved(frame, PauseReasonKind::Breakpoint)
        {
            return HookAction::Continue;
        }

        let options = match self.breakpoints.borrow().by_slot(slot) {
            Some(bp) => bp.options.clone(),
            // The store entry was removed but a script still carries the
            // instrumentation; treat as disarmed.
            None => return HookAction::Continue,
        };

        if let Some(log_value) = &options.log_value {
            self.report_log_point(frame, log_value);
            return HookAction::Continue;
        }

        let condition_thrown = match &options.condition {
            None => false,
            Some(condition) => match self.evaluate_guarded(frame, condition) {
                Ok(value) => {
                    if !self.runtime.value_is_truthy(&value) {
                        return HookAction::Continue;
                    }
                    false
                }
                Err(_) => true,
            },
        };

        match self.pause_and_respond(
            Some(frame),
            PauseReason::Breakpoint { condition_thrown },
            None,
        ) {
            PauseVerdict::Terminate => HookAction::Terminate,
            _ => HookAction::Continue,
        }
    }

    /// Evaluate a logpoint expression and hand the rendered result to the
    /// observer. Logpoints never pause.
    fn report_log_point(&self, frame: FrameId, expr: &str) {
        let message = match self.evaluate_guarded(frame, expr) {
            Ok(value) => self.runtime.render_value(&value),
            Err(thrown) => format!("Logpoint threw: {}", self.runtime.render_value(&thrown)),
        };
        self.hooks.on_log_point(frame, &message);
    }
}

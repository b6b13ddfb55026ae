//! Shared test doubles: a scriptable mock runtime, a mock source manager, a
//! recording event hook and a scripted loop driver that plays the client's
//! role while a pause blocks.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use threadctl::engine::pause::{FrameFinished, PauseReason, PauseReasonKind, PausedEvent};
use threadctl::engine::{EngineOptions, EventHook, ThreadExecutionEngine};
use threadctl::runtime::{
    BreakpointSlot, FrameId, FrameKind, FrameSnapshot, LoopDriver, OffsetMeta, PromiseId,
    Reaction, ResolvedLocation, RuntimeHookProvider, ScriptFilter, ScriptFormat, ScriptId,
    ScriptInfo, SourceActorId, SourceManager,
};

pub type Value = String;

struct MockFrame {
    on_stack: bool,
    older: Option<FrameId>,
    script: Option<ScriptId>,
    offset: u64,
    kind: FrameKind,
    is_generator_function: bool,
    is_async_function: bool,
    meta: OffsetMeta,
    in_catch: bool,
}

#[derive(Default)]
struct RuntimeState {
    frames: HashMap<FrameId, MockFrame>,
    newest: Option<FrameId>,
    scripts: Vec<ScriptInfo>,
    first_statement: HashMap<ScriptId, u64>,
    positions: HashMap<(ScriptId, u32, Option<u32>), Vec<u64>>,
    installed: Vec<(ScriptId, u64, BreakpointSlot)>,
    fail_set_breakpoint: bool,
    enabled: bool,
    enter_frame_observed: bool,
    frames_observed: HashMap<FrameId, (bool, bool)>,
    eval_results: HashMap<String, Result<Value, Value>>,
    reinvoked: Vec<FrameId>,
    fail_reinvoke: bool,
    async_promises: HashMap<FrameId, PromiseId>,
    reactions: HashMap<PromiseId, Vec<Reaction>>,
    network_observed: bool,
    notifications_observed: bool,
    observe_asm_js: bool,
    observe_wasm: bool,
}

/// Cheap handle over shared mock state; the engine owns one clone, the test
/// keeps another to script the debuggee.
#[derive(Clone, Default)]
pub struct MockRuntime {
    state: Rc<RefCell<RuntimeState>>,
}

impl MockRuntime {
    /// Add an on-stack frame. Defaults: plain call, offset at a
    /// breakpoint-eligible statement start.
    pub fn add_frame(&self, id: u64, older: Option<u64>, script: Option<u64>) -> FrameId {
        let frame = FrameId(id);
        self.state.borrow_mut().frames.insert(
            frame,
            MockFrame {
                on_stack: true,
                older: older.map(FrameId),
                script: script.map(ScriptId),
                offset: 0,
                kind: FrameKind::Call,
                is_generator_function: false,
                is_async_function: false,
                meta: OffsetMeta {
                    is_breakpoint: true,
                    is_step_start: true,
                },
                in_catch: false,
            },
        );
        frame
    }

    pub fn set_newest(&self, id: Option<u64>) {
        self.state.borrow_mut().newest = id.map(FrameId);
    }

    pub fn drop_frame(&self, id: u64) {
        if let Some(frame) = self.state.borrow_mut().frames.get_mut(&FrameId(id)) {
            frame.on_stack = false;
        }
    }

    pub fn set_frame_async(&self, id: u64) {
        if let Some(frame) = self.state.borrow_mut().frames.get_mut(&FrameId(id)) {
            frame.is_async_function = true;
        }
    }

    pub fn set_frame_generator(&self, id: u64) {
        if let Some(frame) = self.state.borrow_mut().frames.get_mut(&FrameId(id)) {
            frame.is_generator_function = true;
        }
    }

    pub fn set_offset_meta(&self, id: u64, is_breakpoint: bool, is_step_start: bool) {
        if let Some(frame) = self.state.borrow_mut().frames.get_mut(&FrameId(id)) {
            frame.meta = OffsetMeta {
                is_breakpoint,
                is_step_start,
            };
        }
    }

    pub fn set_in_catch(&self, id: u64, in_catch: bool) {
        if let Some(frame) = self.state.borrow_mut().frames.get_mut(&FrameId(id)) {
            frame.in_catch = in_catch;
        }
    }

    pub fn add_script(&self, id: u64, source: u64, url: Option<&str>) -> ScriptInfo {
        let script = ScriptInfo {
            id: ScriptId(id),
            source: SourceActorId(source),
            url: url.map(str::to_string),
            format: ScriptFormat::Js,
            is_function: false,
        };
        self.state.borrow_mut().scripts.push(script.clone());
        script
    }

    pub fn set_first_statement(&self, script: u64, offset: u64) {
        self.state
            .borrow_mut()
            .first_statement
            .insert(ScriptId(script), offset);
    }

    pub fn set_positions(&self, script: u64, line: u32, column: Option<u32>, offsets: Vec<u64>) {
        self.state
            .borrow_mut()
            .positions
            .insert((ScriptId(script), line, column), offsets);
    }

    pub fn fail_set_breakpoint(&self, fail: bool) {
        self.state.borrow_mut().fail_set_breakpoint = fail;
    }

    pub fn set_eval(&self, expr: &str, result: Result<&str, &str>) {
        self.state.borrow_mut().eval_results.insert(
            expr.to_string(),
            result.map(str::to_string).map_err(str::to_string),
        );
    }

    pub fn set_async_promise(&self, frame: u64, promise: u64) {
        self.state
            .borrow_mut()
            .async_promises
            .insert(FrameId(frame), PromiseId(promise));
    }

    pub fn set_reactions(&self, promise: u64, reactions: Vec<Reaction>) {
        self.state
            .borrow_mut()
            .reactions
            .insert(PromiseId(promise), reactions);
    }

    pub fn installed(&self) -> Vec<(ScriptId, u64, BreakpointSlot)> {
        self.state.borrow().installed.clone()
    }

    pub fn reinvoked(&self) -> Vec<FrameId> {
        self.state.borrow().reinvoked.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.borrow().enabled
    }

    pub fn enter_frame_observed(&self) -> bool {
        self.state.borrow().enter_frame_observed
    }

    pub fn frame_observed(&self, id: u64) -> Option<(bool, bool)> {
        self.state.borrow().frames_observed.get(&FrameId(id)).copied()
    }

    pub fn network_observed(&self) -> bool {
        self.state.borrow().network_observed
    }

    pub fn notifications_observed(&self) -> bool {
        self.state.borrow().notifications_observed
    }
}

impl RuntimeHookProvider for MockRuntime {
    type Value = Value;

    fn enable(&self) {
        self.state.borrow_mut().enabled = true;
    }

    fn disable(&self) {
        self.state.borrow_mut().enabled = false;
    }

    fn remove_all_debuggees(&self) {}

    fn newest_frame(&self) -> Option<FrameId> {
        self.state.borrow().newest
    }

    fn frame(&self, id: FrameId) -> Option<FrameSnapshot> {
        let state = self.state.borrow();
        let frame = state.frames.get(&id)?;
        Some(FrameSnapshot {
            id,
            on_stack: frame.on_stack,
            older: frame.older,
            script: frame.script,
            offset: frame.offset,
            kind: frame.kind,
            is_generator_function: frame.is_generator_function,
            is_async_function: frame.is_async_function,
        })
    }

    fn offset_meta(&self, frame: FrameId) -> OffsetMeta {
        self.state
            .borrow()
            .frames
            .get(&frame)
            .map(|f| f.meta)
            .unwrap_or_default()
    }

    fn find_scripts(&self, filter: ScriptFilter<'_>) -> Vec<ScriptInfo> {
        self.state
            .borrow()
            .scripts
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect()
    }

    fn first_statement_offset(&self, script: ScriptId) -> Option<u64> {
        self.state.borrow().first_statement.get(&script).copied()
    }

    fn breakpoint_offsets(&self, script: ScriptId, line: u32, column: Option<u32>) -> Vec<u64> {
        self.state
            .borrow()
            .positions
            .get(&(script, line, column))
            .cloned()
            .unwrap_or_else(|| vec![u64::from(line)])
    }

    fn set_breakpoint(
        &self,
        script: ScriptId,
        offset: u64,
        slot: BreakpointSlot,
    ) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_set_breakpoint {
            anyhow::bail!("script is being destroyed");
        }
        state.installed.push((script, offset, slot));
        Ok(())
    }

    fn clear_breakpoints(&self, script: ScriptId, slot: BreakpointSlot) {
        self.state
            .borrow_mut()
            .installed
            .retain(|&(s, _, sl)| s != script || sl != slot);
    }

    fn observe_enter_frame(&self, enabled: bool) {
        self.state.borrow_mut().enter_frame_observed = enabled;
    }

    fn observe_frame(&self, frame: FrameId, step: bool, pop: bool) {
        self.state
            .borrow_mut()
            .frames_observed
            .insert(frame, (step, pop));
    }

    fn evaluate_in_frame(&self, _frame: FrameId, expr: &str) -> Result<Value, Value> {
        self.state
            .borrow()
            .eval_results
            .get(expr)
            .cloned()
            .unwrap_or_else(|| Ok("undefined".to_string()))
    }

    fn value_is_truthy(&self, value: &Value) -> bool {
        !matches!(value.as_str(), "" | "0" | "false" | "undefined" | "null")
    }

    fn render_value(&self, value: &Value) -> String {
        value.clone()
    }

    fn reinvoke_frame(&self, frame: FrameId) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_reinvoke {
            anyhow::bail!("frame arguments are gone");
        }
        state.reinvoked.push(frame);
        Ok(())
    }

    fn async_promise(&self, frame: FrameId) -> Option<PromiseId> {
        self.state.borrow().async_promises.get(&frame).copied()
    }

    fn promise_reactions(&self, promise: PromiseId) -> Vec<Reaction> {
        self.state
            .borrow()
            .reactions
            .get(&promise)
            .cloned()
            .unwrap_or_default()
    }

    fn frame_in_catch_scope(&self, frame: FrameId) -> bool {
        self.state
            .borrow()
            .frames
            .get(&frame)
            .is_some_and(|f| f.in_catch)
    }

    fn is_interface_not_found_error(&self, value: &Value) -> bool {
        value == "NS_ERROR_NO_INTERFACE"
    }

    fn set_observe_asm_js(&self, observe: bool) {
        self.state.borrow_mut().observe_asm_js = observe;
    }

    fn set_observe_wasm(&self, observe: bool) {
        self.state.borrow_mut().observe_wasm = observe;
    }

    fn observe_network(&self, enabled: bool) {
        self.state.borrow_mut().network_observed = enabled;
    }

    fn observe_event_notifications(&self, enabled: bool) {
        self.state.borrow_mut().notifications_observed = enabled;
    }
}

#[derive(Default)]
struct SourcesState {
    locations: HashMap<FrameId, ResolvedLocation>,
    blackboxed: HashSet<FrameId>,
    urls: HashMap<SourceActorId, String>,
}

#[derive(Clone, Default)]
pub struct MockSources {
    state: Rc<RefCell<SourcesState>>,
}

impl MockSources {
    pub fn set_location(&self, frame: u64, source: u64, line: u32, column: u32) {
        self.state.borrow_mut().locations.insert(
            FrameId(frame),
            ResolvedLocation {
                source: SourceActorId(source),
                line,
                column,
            },
        );
    }

    pub fn clear_location(&self, frame: u64) {
        self.state.borrow_mut().locations.remove(&FrameId(frame));
    }

    pub fn blackbox(&self, frame: u64) {
        self.state.borrow_mut().blackboxed.insert(FrameId(frame));
    }

    pub fn set_url(&self, source: u64, url: &str) {
        self.state
            .borrow_mut()
            .urls
            .insert(SourceActorId(source), url.to_string());
    }
}

impl SourceManager for MockSources {
    fn frame_location(&self, frame: FrameId) -> Option<ResolvedLocation> {
        self.state.borrow().locations.get(&frame).copied()
    }

    fn is_frame_blackboxed(&self, frame: FrameId) -> bool {
        self.state.borrow().blackboxed.contains(&frame)
    }

    fn source_url(&self, source: SourceActorId) -> Option<String> {
        self.state.borrow().urls.get(&source).cloned()
    }
}

/// What the recording hook saw, flattened for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Paused {
        reason: PauseReason<Value>,
        frame: Option<FrameId>,
        line: Option<u32>,
        finished: Option<FrameFinished<Value>>,
    },
    Resumed,
    Log(String),
}

#[derive(Default)]
struct HookState {
    events: RefCell<Vec<Observed>>,
    fail_next_pause: Cell<bool>,
}

#[derive(Clone, Default)]
pub struct RecordingHook {
    state: Rc<HookState>,
}

impl RecordingHook {
    pub fn events(&self) -> Vec<Observed> {
        self.state.events.borrow().clone()
    }

    pub fn paused_kinds(&self) -> Vec<PauseReasonKind> {
        self.state
            .events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Observed::Paused { reason, .. } => Some(reason.kind()),
                _ => None,
            })
            .collect()
    }

    pub fn logs(&self) -> Vec<String> {
        self.state
            .events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Observed::Log(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Make the next `on_paused` fail, simulating a broken observer.
    pub fn fail_next_pause(&self) {
        self.state.fail_next_pause.set(true);
    }
}

impl EventHook<Value> for RecordingHook {
    fn on_paused(&self, event: &PausedEvent<Value>) -> anyhow::Result<()> {
        if self.state.fail_next_pause.take() {
            anyhow::bail!("observer connection lost");
        }
        self.state.events.borrow_mut().push(Observed::Paused {
            reason: event.reason.clone(),
            frame: event.frame,
            line: event.location.map(|l| l.line),
            finished: event.frame_finished.clone(),
        });
        Ok(())
    }

    fn on_resumed(&self) {
        self.state.events.borrow_mut().push(Observed::Resumed);
    }

    fn on_log_point(&self, _frame: FrameId, message: &str) {
        self.state
            .events
            .borrow_mut()
            .push(Observed::Log(message.to_string()));
    }
}

type Action = Box<dyn FnOnce()>;

/// Loop driver fed from a queue of closures; each pause-loop spin pops and
/// runs one. Spinning with an empty queue means the test forgot to script a
/// resume, so it panics instead of hanging.
#[derive(Clone, Default)]
pub struct DriverScript {
    queue: Rc<RefCell<VecDeque<Action>>>,
}

impl DriverScript {
    pub fn push(&self, action: impl FnOnce() + 'static) {
        self.queue.borrow_mut().push_back(Box::new(action));
    }

    pub fn is_drained(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

impl LoopDriver for DriverScript {
    fn spin_once(&self) {
        let action = self.queue.borrow_mut().pop_front();
        match action {
            Some(action) => action(),
            None => panic!("pause loop spun with an empty driver script"),
        }
    }
}

pub struct Harness {
    pub runtime: MockRuntime,
    pub sources: MockSources,
    pub hook: RecordingHook,
    pub driver: DriverScript,
    pub engine: Rc<ThreadExecutionEngine<MockRuntime>>,
}

pub fn detached() -> Harness {
    let runtime = MockRuntime::default();
    let sources = MockSources::default();
    let hook = RecordingHook::default();
    let driver = DriverScript::default();
    let engine = Rc::new(ThreadExecutionEngine::new(
        runtime.clone(),
        Rc::new(sources.clone()),
        Box::new(hook.clone()),
        Box::new(driver.clone()),
    ));
    Harness {
        runtime,
        sources,
        hook,
        driver,
        engine,
    }
}

pub fn attached_with(options: EngineOptions) -> Harness {
    let harness = detached();
    harness.engine.attach(options).unwrap();
    harness
}

pub fn attached() -> Harness {
    attached_with(EngineOptions::default())
}

//! Attach/resume/interrupt state machine and nested-pause ordering.

mod common;

use common::{attached, detached, Observed};
use std::collections::HashSet;
use std::rc::Rc;
use threadctl::engine::pause::NestedLoopStack;
use threadctl::engine::{EngineOptions, InterruptMode, InterruptOutcome, ThreadExecutionEngine};
use threadctl::{Error, PauseReason, PauseReasonKind, ThreadState};

#[test]
fn attach_moves_detached_to_running() {
    let h = detached();
    assert_eq!(h.engine.state(), ThreadState::Detached);
    h.engine.attach(EngineOptions::default()).unwrap();
    assert_eq!(h.engine.state(), ThreadState::Running);
    assert!(h.runtime.is_enabled());
}

#[test]
fn attach_twice_is_a_wrong_state_error() {
    let h = attached();
    let err = h.engine.attach(EngineOptions::default()).unwrap_err();
    assert!(matches!(err, Error::WrongState(ThreadState::Running)));
}

#[test]
fn resume_on_running_is_a_wrong_state_error() {
    let h = attached();
    let err = h.engine.resume(None).unwrap_err();
    assert!(matches!(err, Error::WrongState(ThreadState::Running)));
}

#[test]
fn interrupt_on_detached_is_a_wrong_state_error() {
    let h = detached();
    let err = h.engine.interrupt(InterruptMode::Immediate).unwrap_err();
    assert!(matches!(err, Error::WrongState(ThreadState::Detached)));
}

#[test]
fn immediate_interrupt_pauses_synchronously() {
    let h = attached();
    let engine = Rc::clone(&h.engine);
    h.driver.push(move || {
        assert_eq!(engine.state(), ThreadState::Paused);
        engine.resume(None).unwrap();
    });

    let outcome = h.engine.interrupt(InterruptMode::Immediate).unwrap();
    assert_eq!(outcome, InterruptOutcome::Paused);
    assert_eq!(h.engine.state(), ThreadState::Running);
    assert_eq!(
        h.hook.events(),
        vec![
            Observed::Paused {
                reason: PauseReason::Interrupted { on_next: false },
                frame: None,
                line: None,
                finished: None,
            },
            Observed::Resumed,
        ]
    );
    assert!(h.driver.is_drained());
}

#[test]
fn on_next_interrupt_arms_and_pauses_on_the_next_frame() {
    let h = attached();
    let outcome = h.engine.interrupt(InterruptMode::OnNext).unwrap();
    assert_eq!(outcome, InterruptOutcome::Armed);
    assert_eq!(h.engine.state(), ThreadState::Running);
    assert!(h.runtime.enter_frame_observed());

    let frame = h.runtime.add_frame(1, None, None);
    h.runtime.set_newest(Some(1));
    let engine = Rc::clone(&h.engine);
    h.driver.push(move || engine.resume(None).unwrap());

    h.engine.on_enter_frame(frame);
    assert_eq!(
        h.hook.events()[0],
        Observed::Paused {
            reason: PauseReason::Interrupted { on_next: true },
            frame: Some(frame),
            line: None,
            finished: None,
        }
    );
    assert!(!h.runtime.enter_frame_observed());
}

#[test]
fn interrupt_while_paused_reports_the_existing_pause() {
    let h = attached();
    let engine = Rc::clone(&h.engine);
    h.driver.push(move || {
        let outcome = engine.interrupt(InterruptMode::Immediate).unwrap();
        assert_eq!(outcome, InterruptOutcome::AlreadyPaused);
        engine.resume(None).unwrap();
    });

    h.engine.interrupt(InterruptMode::Immediate).unwrap();
    assert_eq!(
        h.hook.paused_kinds(),
        vec![PauseReasonKind::Interrupted, PauseReasonKind::AlreadyPaused]
    );
}

#[test]
fn failing_pause_observer_drops_the_pause() {
    let h = attached();
    h.hook.fail_next_pause();
    let err = h.engine.interrupt(InterruptMode::Immediate).unwrap_err();
    assert!(matches!(err, Error::NotInterrupted));
    assert_eq!(h.engine.state(), ThreadState::Running);
    assert!(h.hook.events().is_empty());
}

#[test]
fn nested_pauses_resume_strictly_lifo() {
    let loops = NestedLoopStack::new();

    let outer = detached();
    let outer_engine = Rc::new(
        ThreadExecutionEngine::new(
            outer.runtime.clone(),
            Rc::new(outer.sources.clone()),
            Box::new(outer.hook.clone()),
            Box::new(outer.driver.clone()),
        )
        .with_nested_loop_stack(loops.clone()),
    );
    outer_engine.attach(EngineOptions::default()).unwrap();

    let inner = detached();
    let inner_engine = Rc::new(
        ThreadExecutionEngine::new(
            inner.runtime.clone(),
            Rc::new(inner.sources.clone()),
            Box::new(inner.hook.clone()),
            Box::new(inner.driver.clone()),
        )
        .with_nested_loop_stack(loops.clone()),
    );
    inner_engine.attach(EngineOptions::default()).unwrap();

    // While the outer engine's pause spins, pause the inner engine; from
    // inside the inner pause, resuming the outer one must be rejected.
    let outer_for_check = Rc::clone(&outer_engine);
    let inner_resume = Rc::clone(&inner_engine);
    inner.driver.push(move || {
        let err = outer_for_check.resume(None).unwrap_err();
        assert!(matches!(err, Error::WrongOrder));
        inner_resume.resume(None).unwrap();
    });

    let inner_trigger = Rc::clone(&inner_engine);
    let outer_resume = Rc::clone(&outer_engine);
    outer.driver.push(move || {
        inner_trigger.interrupt(InterruptMode::Immediate).unwrap();
    });
    outer.driver.push(move || outer_resume.resume(None).unwrap());

    outer_engine.interrupt(InterruptMode::Immediate).unwrap();
    assert_eq!(outer_engine.state(), ThreadState::Running);
    assert_eq!(inner_engine.state(), ThreadState::Running);
    assert_eq!(loops.depth(), 0);
}

#[test]
fn destroy_while_paused_unwinds_the_pause() {
    let h = attached();
    let frame = h.runtime.add_frame(1, None, None);
    h.runtime.set_newest(Some(1));
    h.sources.set_location(1, 1, 5, 0);

    let engine = Rc::clone(&h.engine);
    h.driver.push(move || engine.destroy());

    let action = h.engine.on_debugger_statement(frame);
    assert_eq!(action, threadctl::HookAction::Terminate);
    assert_eq!(h.engine.state(), ThreadState::Exited);
    assert!(!h.runtime.is_enabled());

    // Terminal: every later operation reports the torn-down engine, and
    // repeat destroys are no-ops.
    assert!(matches!(h.engine.resume(None), Err(Error::Exited)));
    assert!(matches!(
        h.engine.attach(EngineOptions::default()),
        Err(Error::Exited)
    ));
    h.engine.destroy();
}

#[test]
fn reconfigure_updates_only_named_options() {
    let h = attached();
    let mut update = threadctl::ReconfigureOptions::default();
    update.pause_on_exceptions = Some(true);
    update.skip_breakpoints = Some(true);
    h.engine.reconfigure(update).unwrap();

    let options = h.engine.options();
    assert!(options.pause_on_exceptions);
    assert!(options.skip_breakpoints);
    // Untouched fields keep their defaults.
    assert!(options.should_pause_on_debugger_statement);
    assert!(!options.ignore_caught_exceptions);
}

#[test]
fn dump_thread_reflects_current_configuration() {
    let h = attached();
    h.engine.set_xhr_breakpoint("/api".into(), "GET".into());
    h.engine
        .add_event_breakpoints([threadctl::EventBreakpointId("event.click".into())]);

    let dump = h.engine.dump_thread();
    assert_eq!(dump.state, "running");
    assert_eq!(dump.xhr_breakpoints.len(), 1);
    assert_eq!(
        dump.event_breakpoints.iter().cloned().collect::<HashSet<_>>(),
        HashSet::from([threadctl::EventBreakpointId("event.click".into())])
    );
}

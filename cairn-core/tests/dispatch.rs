mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cairn_core::action::builtin::SetState;
use cairn_core::action::{
    Action, ActionContext, ActionHandle, ActionInfo, ActionParam, ActionScope, Execution, Rejection,
};
use cairn_core::dispatch::{DispatchError, DispatchEvent};
use cairn_core::layer::Volume;
use cairn_core::state::{StateCell, StateRegistry};
use cairn_types::{ActionSource, ActionStatus, Variant};
use parking_lot::Mutex;

use common::*;

#[test]
fn actions_from_one_producer_run_in_posting_order() {
    let registry = StateRegistry::new();
    let counter = StateCell::builder("view::slice", 0i64)
        .register(&registry)
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    counter.changed().connect(move |change| sink.lock().push(change.value));

    let dispatcher = start_with_registry(registry);
    let context = ActionContext::new(ActionSource::Script);
    for value in 1..=50i64 {
        dispatcher
            .post(ActionHandle::new(SetState::new("view::slice", value)), &context)
            .unwrap();
    }
    context.wait_done();

    assert!(context.is_success());
    assert_eq!(*seen.lock(), (1..=50).collect::<Vec<_>>());
    assert_eq!(counter.get(), 50);
}

#[test]
fn setting_the_current_value_is_silent() {
    let registry = StateRegistry::new();
    let zoom = StateCell::builder("view::zoom", 2i64).register(&registry).unwrap();
    let notified = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&notified);
    zoom.changed().connect(move |_| {
        count.fetch_add(1, Ordering::SeqCst);
    });

    let dispatcher = start_with_registry(registry);
    run_ok(&dispatcher, "set(id=view::zoom, value=2)");
    assert_eq!(notified.load(Ordering::SeqCst), 0);
    let undo_len = dispatcher.query(|p| p.undo_buffer().undo_len()).unwrap();
    assert_eq!(undo_len, 0);

    run_ok(&dispatcher, "set(id=view::zoom, value=3)");
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn out_of_range_values_are_invalid_and_leave_state_alone() {
    let registry = StateRegistry::new();
    let level = StateCell::builder("render::level", 5i64)
        .ranged(0, 10)
        .register(&registry)
        .unwrap();

    let dispatcher = start_with_registry(registry);
    let context = run(&dispatcher, "set(id=render::level, value=25)");
    assert_eq!(context.status(), ActionStatus::Invalid);
    assert_eq!(level.get(), 5);

    let context = run(&dispatcher, "get(id=render::level)");
    assert_eq!(context.result(), Some(Variant::Int(5)));
}

#[test]
fn unknown_states_are_invalid() {
    let dispatcher = start();
    let context = run(&dispatcher, "set(id=missing::thing, value=1)");
    assert!(context.is_invalid());
    assert!(context.error_message().contains("missing::thing"));
}

#[test]
fn concurrent_producers_get_unique_provenance_ids() {
    let dispatcher = Arc::new(start());
    let mut producers = Vec::new();
    for worker in 0..4 {
        let dispatcher = Arc::clone(&dispatcher);
        producers.push(thread::spawn(move || {
            let mut ids = Vec::new();
            for n in 0..10 {
                let name = format!("w{}_{}", worker, n);
                ids.push(new_layer(&dispatcher, &name, [2, 2, 2], 0.0));
            }
            ids
        }));
    }
    let mut all: Vec<_> = producers
        .into_iter()
        .flat_map(|p| p.join().unwrap())
        .collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 40);
    assert_eq!(layer_names(&dispatcher).len(), 40);
}

#[test]
fn renamed_layers_are_no_longer_found_by_their_old_name() {
    let dispatcher = Arc::new(start());
    new_layer(&dispatcher, "skull", [4, 4, 2], 0.0);

    let renamer = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || run(&dispatcher, "rename_layer(layer=skull, name=bone)"))
    };
    let fill = run(&dispatcher, "fill_slice(layer=skull, slice=1, value=2)");
    assert!(renamer.join().unwrap().is_success());

    if !fill.is_success() {
        assert!(fill.is_invalid());
        assert_eq!(fill.error_message(), "unknown entity 'skull'");
    }
    assert_eq!(layer_names(&dispatcher), vec!["bone".to_string()]);

    let late = run(&dispatcher, "fill_slice(layer=skull, slice=1, value=2)");
    assert!(late.is_invalid());
    assert_eq!(late.error_message(), "unknown entity 'skull'");
}

#[test]
fn duplicate_layer_names_are_rejected() {
    let dispatcher = start();
    new_layer(&dispatcher, "CT", [2, 2, 2], 0.0);
    let context = run(&dispatcher, "new_layer(name=CT)");
    assert!(context.is_invalid());
    assert_eq!(layer_names(&dispatcher).len(), 1);
}

#[test]
fn copying_one_layer_twice_in_a_single_action_is_rejected() {
    let dispatcher = start();
    let a = new_layer(&dispatcher, "a", [1, 1, 1], 0.0);

    let twice = run(&dispatcher, "copy_layers(layers=[a,a])");
    assert!(twice.is_invalid());
    assert!(twice.error_message().contains("listed twice"));

    let aliased = run(&dispatcher, &format!("copy_layers(layers=[a,#{}])", a));
    assert!(aliased.is_invalid());
    assert_eq!(layer_names(&dispatcher), vec!["a"]);
}

#[test]
fn deleting_one_layer_twice_in_a_single_action_is_rejected() {
    let dispatcher = start();
    new_layer(&dispatcher, "a", [1, 1, 1], 0.0);
    let context = run(&dispatcher, "delete_layers(layers=[a,a])");
    assert!(context.is_invalid());
    assert_eq!(layer_names(&dispatcher), vec!["a"]);
}

#[test]
fn layer_identity_cells_are_locked_against_set() {
    let dispatcher = start();
    let pid = new_layer(&dispatcher, "a", [1, 1, 1], 0.0);
    new_layer(&dispatcher, "b", [1, 1, 1], 0.0);

    let id = run(&dispatcher, "set(id=layer_1::provenance_id, value=999)");
    assert!(id.is_invalid());
    assert!(id.error_message().contains("locked"));
    assert_eq!(layer_provenance(&dispatcher, "a"), Some(pid));

    let name = run(&dispatcher, "set(id=layer_1::name, value=b)");
    assert!(name.is_invalid());
    assert_eq!(layer_names(&dispatcher), vec!["a", "b"]);

    run_ok(&dispatcher, "set(id=layer_1::opacity, value=0.5)");
    let opacity = run_ok(&dispatcher, "get(id=layer_1::opacity)");
    assert_eq!(opacity.result(), Some(Variant::Double(0.5)));
}

#[test]
fn busy_layers_are_unavailable_until_the_worker_finishes() {
    let dispatcher = start();
    new_layer(&dispatcher, "big", [64, 64, 64], 1.0);
    let events = dispatcher.subscribe();

    let smooth_context = ActionContext::new(ActionSource::Script);
    let fill_context = ActionContext::new(ActionSource::Script);
    dispatcher
        .post(action("smooth(layer=big, iterations=20)"), &smooth_context)
        .unwrap();
    dispatcher
        .post(action("fill_slice(layer=big, slice=0, value=3)"), &fill_context)
        .unwrap();

    fill_context.wait_done();
    if fill_context.is_unavailable() {
        let notifier = fill_context
            .resource_notifier()
            .expect("unavailable actions carry a notifier");
        assert!(notifier.wait_timeout(Duration::from_secs(60)));
    }
    smooth_context.wait_done();
    assert!(smooth_context.is_success(), "{}", smooth_context.error_message());

    let done = wait_for_event(&events, Duration::from_secs(5), |e| {
        matches!(e, DispatchEvent::DeferredDone { tag: "smooth", .. })
    });
    assert!(matches!(
        done,
        DispatchEvent::DeferredDone {
            status: ActionStatus::Success,
            ..
        }
    ));

    let retry = run(&dispatcher, "fill_slice(layer=big, slice=0, value=3)");
    assert!(retry.is_success());
}

#[test]
fn batched_actions_see_the_layer_held_by_an_earlier_worker() {
    let dispatcher = start();
    new_layer(&dispatcher, "big", [32, 32, 32], 1.0);
    let events = dispatcher.subscribe();

    let context = ActionContext::new(ActionSource::Script);
    dispatcher
        .post_many(
            vec![
                action("smooth(layer=big, iterations=5)"),
                action("fill_slice(layer=big, slice=0, value=3)"),
            ],
            &context,
        )
        .unwrap();
    context.wait_done();

    let fill = wait_for_event(&events, Duration::from_secs(5), |e| {
        matches!(e, DispatchEvent::PostAction { tag: "fill_slice", .. })
    });
    assert!(matches!(
        fill,
        DispatchEvent::PostAction {
            status: ActionStatus::Unavailable,
            ..
        }
    ));
}

#[test]
fn interrupted_workers_roll_back() {
    let dispatcher = start();
    new_layer(&dispatcher, "big", [96, 96, 96], 0.0);
    run_ok(&dispatcher, "fill_slice(layer=big, slice=10, value=8)");
    let before = layer_data(&dispatcher, "big").unwrap();
    let undo_before = dispatcher.query(|p| p.undo_buffer().undo_len()).unwrap();
    let events = dispatcher.subscribe();

    let context = ActionContext::new(ActionSource::Script);
    dispatcher
        .post(action("smooth(layer=big, iterations=20)"), &context)
        .unwrap();
    wait_for_event(&events, Duration::from_secs(5), |e| {
        matches!(e, DispatchEvent::ProgressBegin { .. })
    });
    dispatcher.interrupt_workers();
    context.wait_done();

    assert!(context.is_error());
    assert!(context.error_message().contains("interrupted"));
    assert_eq!(layer_data(&dispatcher, "big").unwrap(), before);
    let undo_after = dispatcher.query(|p| p.undo_buffer().undo_len()).unwrap();
    assert_eq!(undo_after, undo_before);
}

#[test]
fn every_action_is_bracketed_by_pre_and_post_events() {
    let dispatcher = start();
    let events = dispatcher.subscribe();
    run_ok(&dispatcher, "new_layer(name=a, dims=[2,2,2])");
    run(&dispatcher, "rename_layer(layer=nothing, name=b)");

    let received: Vec<_> = events.try_iter().collect();
    let tags: Vec<_> = received
        .iter()
        .filter_map(|e| match e {
            DispatchEvent::PreAction { tag, .. } => Some(("pre", *tag)),
            DispatchEvent::PostAction { tag, .. } => Some(("post", *tag)),
            _ => None,
        })
        .collect();
    assert_eq!(
        tags,
        vec![
            ("pre", "new_layer"),
            ("post", "new_layer"),
            ("pre", "rename_layer"),
            ("post", "rename_layer"),
        ]
    );
}

#[test]
fn waiting_from_the_owner_thread_is_refused() {
    let dispatcher = Arc::new(start());
    let inner = Arc::clone(&dispatcher);
    let result = dispatcher
        .query(move |_| {
            let context = ActionContext::new(ActionSource::Script);
            inner.post_and_wait(action("get(id=anything)"), &context)
        })
        .unwrap();
    assert_eq!(result, Err(DispatchError::OwnerThread));
}

#[test]
fn posts_after_shutdown_fail() {
    let dispatcher = start();
    run_ok(&dispatcher, "new_layer(name=a, dims=[2,2,2])");
    dispatcher.shutdown().unwrap();
    assert!(!dispatcher.is_busy());

    let context = ActionContext::new(ActionSource::Script);
    let result = dispatcher.post(action("new_layer(name=b)"), &context);
    assert_eq!(result, Err(DispatchError::Closed));
    assert!(context.is_error());
    assert!(context.is_done());
}

#[test]
fn completion_counters_advance() {
    let dispatcher = start();
    assert!(dispatcher.last_action_completed().is_none());
    run_ok(&dispatcher, "new_layer(name=a, dims=[2,2,2])");
    run(&dispatcher, "new_layer(name=a, dims=[2,2,2])");
    assert_eq!(dispatcher.completed_count(), 2);
    assert!(dispatcher.last_action_completed().is_some());
    assert!(!dispatcher.is_busy());
}

static HALF_FINISHED_INFO: ActionInfo = ActionInfo {
    tag: "half_finished",
    alias: "half",
    description: "Creates a layer, then panics.",
    params: &[],
};

#[derive(Debug)]
struct HalfFinished;

impl Action for HalfFinished {
    fn info(&self) -> &'static ActionInfo {
        &HALF_FINISHED_INFO
    }

    fn params(&self) -> Vec<(&'static str, ActionParam)> {
        Vec::new()
    }

    fn validate(&mut self, _scope: &ActionScope<'_>) -> Result<(), Rejection> {
        Ok(())
    }

    fn execute(&mut self, scope: &mut ActionScope<'_>) -> Result<Execution, String> {
        let pid = scope.output_provenance_id(0)?;
        let id = scope
            .layers_mut()?
            .insert("orphan", Volume::new([1, 1, 1], 0.0), pid)
            .map_err(|e| e.to_string())?;
        scope.track_created(id)?;
        panic!("ran out of voxels");
    }
}

#[test]
fn a_panicking_action_fails_alone_and_the_queue_keeps_draining() {
    let dispatcher = start();
    new_layer(&dispatcher, "a", [1, 1, 1], 0.0);

    let context = run_handle(&dispatcher, ActionHandle::new(HalfFinished), ActionSource::Script);
    assert!(context.is_done());
    assert!(context.is_error());
    assert!(context.error_message().contains("ran out of voxels"));
    assert_eq!(layer_names(&dispatcher), vec!["a"]);

    run_ok(&dispatcher, "new_layer(name=b, dims=[1,1,1])");
    assert_eq!(layer_names(&dispatcher), vec!["a", "b"]);
    assert!(!dispatcher.is_busy());
}

#[test]
fn oversized_layers_are_invalid() {
    let dispatcher = start();
    let context = run(&dispatcher, "new_layer(name=big, dims=[4294967296,4294967296,2])");
    assert!(context.is_invalid());
    assert!(context.error_message().contains("exceed"));

    run_ok(&dispatcher, "new_layer(name=small, dims=[2,2,2])");
    assert_eq!(layer_names(&dispatcher), vec!["small"]);
}

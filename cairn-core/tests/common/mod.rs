#![allow(dead_code)]
//! Test harness utilities for cairn-core integration tests.

use std::time::{Duration, Instant};

use cairn_core::action::{ActionContext, ActionContextHandle, ActionFactory, ActionHandle};
use cairn_core::config::Config;
use cairn_core::dispatch::{DispatchEvent, Dispatcher};
use cairn_core::project::Project;
use cairn_core::state::StateRegistry;
use cairn_types::{ActionSource, ProvenanceId};
use crossbeam_channel::Receiver;

/// Dispatcher over an empty project with the embedded defaults.
pub fn start() -> Dispatcher {
    start_with(Project::new(&Config::embedded()))
}

/// Dispatcher whose live registry already holds the caller's cells.
pub fn start_with_registry(registry: StateRegistry) -> Dispatcher {
    start_with(Project::with_registry(registry, &Config::embedded()))
}

pub fn start_with(project: Project) -> Dispatcher {
    Dispatcher::start(project, &Config::embedded()).expect("dispatcher should start")
}

pub fn action(command: &str) -> ActionHandle {
    ActionFactory::with_builtins()
        .create(command)
        .unwrap_or_else(|e| panic!("bad command {:?}: {}", command, e))
}

/// Post `command` as a script action and wait for it.
pub fn run(dispatcher: &Dispatcher, command: &str) -> ActionContextHandle {
    run_handle(dispatcher, action(command), ActionSource::Script)
}

pub fn run_handle(
    dispatcher: &Dispatcher,
    handle: ActionHandle,
    source: ActionSource,
) -> ActionContextHandle {
    let context = ActionContext::new(source);
    dispatcher
        .post_and_wait(handle, &context)
        .expect("post_and_wait should not fail");
    context
}

/// Like [`run`], panicking with the reported error unless it succeeded.
pub fn run_ok(dispatcher: &Dispatcher, command: &str) -> ActionContextHandle {
    let context = run(dispatcher, command);
    assert!(
        context.is_success(),
        "{} failed: {} ({})",
        command,
        context.error_message(),
        context.status()
    );
    context
}

/// Create a layer and return its provenance id.
pub fn new_layer(dispatcher: &Dispatcher, name: &str, dims: [usize; 3], value: f64) -> ProvenanceId {
    let command = format!(
        "new_layer(name={}, dims=[{},{},{}], value={})",
        name, dims[0], dims[1], dims[2], value
    );
    let context = run_ok(dispatcher, &command);
    context.output_provenance_ids()[0]
}

pub fn layer_names(dispatcher: &Dispatcher) -> Vec<String> {
    dispatcher
        .query(|project| project.layers().iter().map(|(_, l)| l.name()).collect())
        .expect("query should run")
}

/// Voxel data of the named live layer.
pub fn layer_data(dispatcher: &Dispatcher, name: &str) -> Option<Vec<f32>> {
    let name = name.to_string();
    dispatcher
        .query(move |project| {
            let layers = project.layers();
            layers
                .find_by_name(&name)
                .and_then(|id| layers.get(id))
                .map(|layer| layer.volume().data().to_vec())
        })
        .expect("query should run")
}

pub fn layer_provenance(dispatcher: &Dispatcher, name: &str) -> Option<ProvenanceId> {
    let name = name.to_string();
    dispatcher
        .query(move |project| {
            let layers = project.layers();
            layers
                .find_by_name(&name)
                .and_then(|id| layers.get(id))
                .map(|layer| layer.provenance_id())
        })
        .expect("query should run")
}

/// Receive events until `matches` accepts one, or panic after `timeout`.
pub fn wait_for_event(
    events: &Receiver<DispatchEvent>,
    timeout: Duration,
    mut matches: impl FnMut(&DispatchEvent) -> bool,
) -> DispatchEvent {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) if matches(&event) => return event,
            Ok(_) => {}
            Err(_) => panic!("timed out waiting for dispatch event"),
        }
    }
}

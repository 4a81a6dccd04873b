mod common;

use cairn_core::action::ActionFactory;
use cairn_core::provenance::{parse_script, Replayer};
use cairn_types::{ActionSource, ProvenanceId, SandboxId, Variant};

use common::*;

#[test]
fn preset_output_ids_are_used_verbatim() {
    let dispatcher = start();
    new_layer(&dispatcher, "a", [2, 2, 2], 1.0);
    new_layer(&dispatcher, "b", [2, 2, 2], 2.0);

    let handle = action("copy_layers(layers=[a,b])")
        .with_output_provenance_ids(vec![ProvenanceId::new(7), ProvenanceId::new(8)]);
    let context = run_handle(&dispatcher, handle, ActionSource::Provenance);
    assert!(context.is_success(), "{}", context.error_message());
    assert_eq!(
        context.output_provenance_ids(),
        vec![ProvenanceId::new(7), ProvenanceId::new(8)]
    );
    assert_eq!(layer_provenance(&dispatcher, "a_copy"), Some(ProvenanceId::new(7)));
    assert_eq!(layer_provenance(&dispatcher, "b_copy"), Some(ProvenanceId::new(8)));

    // fresh ids continue above the replayed ones
    let next = new_layer(&dispatcher, "c", [1, 1, 1], 0.0);
    assert!(next.get() > 8);
}

#[test]
fn replaying_without_enough_preset_ids_fails() {
    let dispatcher = start();
    new_layer(&dispatcher, "a", [2, 2, 2], 1.0);
    new_layer(&dispatcher, "b", [2, 2, 2], 2.0);

    let handle =
        action("copy_layers(layers=[a,b])").with_output_provenance_ids(vec![ProvenanceId::new(7)]);
    let context = run_handle(&dispatcher, handle, ActionSource::Provenance);
    assert!(context.is_error());
    assert_eq!(layer_names(&dispatcher), vec!["a", "b"]);
}

#[test]
fn layers_can_be_referenced_by_provenance_id() {
    let dispatcher = start();
    let pid = new_layer(&dispatcher, "scan", [2, 2, 2], 0.0);
    run_ok(&dispatcher, &format!("fill_slice(layer=#{}, slice=0, value=6)", pid));
    let data = layer_data(&dispatcher, "scan").unwrap();
    assert_eq!(&data[..4], &[6.0; 4]);
}

#[test]
fn trail_replays_into_an_empty_sandbox() {
    let dispatcher = start();
    new_layer(&dispatcher, "a", [4, 4, 3], 0.0);
    new_layer(&dispatcher, "unrelated", [1, 1, 1], 0.0);
    run_ok(&dispatcher, "fill_slice(layer=a, slice=1, value=2)");
    run_ok(&dispatcher, "smooth(layer=a, iterations=2)");
    let copy = run_ok(&dispatcher, "copy_layers(layers=[a], suffix=_final)");
    let target = copy.output_provenance_ids()[0];
    assert_eq!(copy.result(), Some(Variant::List(vec![Variant::Str("a_final".into())])));

    let script = dispatcher
        .query(move |p| p.provenance().export_script(target))
        .unwrap();
    assert!(!script.contains("unrelated"));
    let steps = parse_script(&script).unwrap();
    assert_eq!(steps.len(), 4);
    assert_eq!(steps.last().unwrap().outputs, vec![target]);

    let sandbox = run_ok(&dispatcher, "create_sandbox(empty=true)");
    let sandbox = match sandbox.result() {
        Some(Variant::Int(id)) => SandboxId::new(id as u32),
        other => panic!("unexpected sandbox result {:?}", other),
    };
    let records_before = dispatcher.query(|p| p.provenance().len()).unwrap();

    let produced = Replayer::new(ActionFactory::with_builtins())
        .replay(&dispatcher, &steps, Some(sandbox))
        .unwrap();
    assert!(produced.contains(&target));

    let (live, replayed) = dispatcher
        .query(move |p| {
            let read = |layers: &cairn_core::layer::LayerStore| {
                layers
                    .find_by_provenance(target)
                    .and_then(|id| layers.get(id))
                    .map(|l| (l.name(), l.volume().data().to_vec()))
            };
            (read(p.layers()), p.workspace(Some(sandbox)).and_then(read))
        })
        .unwrap();
    assert_eq!(live, replayed);
    assert_eq!(dispatcher.query(|p| p.provenance().len()).unwrap(), records_before);

    run_ok(&dispatcher, &format!("delete_sandbox(id={})", sandbox));
    assert!(dispatcher.query(|p| p.sandbox_ids()).unwrap().is_empty());
}

#[test]
fn records_resolve_placeholders_to_input_ids() {
    let dispatcher = start();
    let pid = new_layer(&dispatcher, "a", [2, 2, 2], 0.0);
    run_ok(&dispatcher, "rename_layer(layer=a, name=renamed)");
    run_ok(&dispatcher, "fill_slice(layer=renamed, slice=0, value=1)");

    let records = dispatcher
        .query(|p| p.provenance().records().cloned().collect::<Vec<_>>())
        .unwrap();
    // renames do not change data
    assert_eq!(records.len(), 2);
    let fill = &records[1];
    assert_eq!(fill.inputs, vec![pid]);
    assert!(fill.action.contains("layer=${0}"));
    assert!(fill.resolved_action().contains(&format!("layer=#{}", pid)));
}

#[test]
fn recorded_signal_fires_for_live_actions_only() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let dispatcher = start();
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    dispatcher
        .query(move |p| {
            p.provenance().recorded().connect(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        })
        .unwrap();

    new_layer(&dispatcher, "a", [1, 1, 1], 0.0);
    let handle = action("new_layer(name=b, dims=[1,1,1])")
        .with_output_provenance_ids(vec![ProvenanceId::new(50)]);
    assert!(run_handle(&dispatcher, handle, ActionSource::Provenance).is_success());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn literal_placeholder_text_survives_export_and_replay() {
    let dispatcher = start();
    let a = new_layer(&dispatcher, "a", [2, 2, 1], 1.0);
    let copy = run_ok(&dispatcher, "copy_layers(layers=[a], suffix='_${0}')");
    let target = copy.output_provenance_ids()[0];
    assert_eq!(layer_names(&dispatcher), vec!["a", "a_${0}"]);

    let script = dispatcher
        .query(move |p| p.provenance().export_script(target))
        .unwrap();
    assert!(
        script.contains(&format!("copy_layers(layers=[#{}], suffix='_${{0}}')", a)),
        "{}",
        script
    );

    let sandbox = run_ok(&dispatcher, "create_sandbox(empty=true)");
    let sandbox = match sandbox.result() {
        Some(Variant::Int(id)) => SandboxId::new(id as u32),
        other => panic!("unexpected sandbox result {:?}", other),
    };
    let steps = parse_script(&script).unwrap();
    Replayer::new(ActionFactory::with_builtins())
        .replay(&dispatcher, &steps, Some(sandbox))
        .unwrap();
    let replayed = dispatcher
        .query(move |p| {
            p.workspace(Some(sandbox))
                .map(|layers| layers.iter().map(|(_, l)| l.name()).collect::<Vec<_>>())
        })
        .unwrap();
    assert_eq!(replayed, Some(vec!["a".to_string(), "a_${0}".to_string()]));
}

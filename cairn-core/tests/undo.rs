mod common;

use cairn_core::config::Config;
use cairn_core::project::Project;
use cairn_types::ActionStatus;

use common::*;

#[test]
fn undo_restores_a_filled_slice_and_redo_reapplies_it() {
    let dispatcher = start();
    let created = new_layer(&dispatcher, "CT", [3, 3, 4], 0.0);
    let fill = run_ok(&dispatcher, "fill_slice(layer=CT, slice=2, value=5)");
    let filled = fill.output_provenance_ids()[0];
    assert_ne!(filled, created);

    let after_fill = layer_data(&dispatcher, "CT").unwrap();
    assert!(after_fill[18..27].iter().all(|v| *v == 5.0));
    assert_eq!(layer_provenance(&dispatcher, "CT"), Some(filled));

    let undo = run_ok(&dispatcher, "undo");
    assert_eq!(
        undo.result().and_then(|v| v.as_str().map(str::to_string)),
        Some("fill_slice".to_string())
    );
    assert!(layer_data(&dispatcher, "CT").unwrap().iter().all(|v| *v == 0.0));
    assert_eq!(layer_provenance(&dispatcher, "CT"), Some(created));

    run_ok(&dispatcher, "redo");
    assert_eq!(layer_data(&dispatcher, "CT").unwrap(), after_fill);
    assert_eq!(layer_provenance(&dispatcher, "CT"), Some(filled));
}

#[test]
fn undoing_a_deletion_brings_the_layer_back_in_place() {
    let dispatcher = start();
    new_layer(&dispatcher, "a", [2, 2, 2], 1.0);
    let b = new_layer(&dispatcher, "b", [2, 2, 2], 2.0);
    new_layer(&dispatcher, "c", [2, 2, 2], 3.0);

    run_ok(&dispatcher, "delete_layers(layers=[b])");
    assert_eq!(layer_names(&dispatcher), vec!["a", "c"]);

    run_ok(&dispatcher, "undo");
    assert_eq!(layer_names(&dispatcher), vec!["a", "b", "c"]);
    assert_eq!(layer_provenance(&dispatcher, "b"), Some(b));
    assert_eq!(layer_data(&dispatcher, "b").unwrap(), vec![2.0; 8]);

    let key = dispatcher
        .query(|p| {
            let layers = p.layers();
            layers
                .find_by_name("b")
                .and_then(|id| layers.get(id))
                .map(|l| l.key().to_string())
        })
        .unwrap();
    assert_eq!(key.as_deref(), Some("layer_2"));
}

#[test]
fn undoing_creation_removes_the_layer_and_retracts_its_record() {
    let dispatcher = start();
    let pid = new_layer(&dispatcher, "a", [2, 2, 2], 0.0);
    assert_eq!(dispatcher.query(|p| p.provenance().records().count()).unwrap(), 1);

    run_ok(&dispatcher, "undo");
    assert!(layer_names(&dispatcher).is_empty());
    let (active, trail) = dispatcher
        .query(move |p| (p.provenance().records().count(), p.provenance().trail(pid).len()))
        .unwrap();
    assert_eq!(active, 0);
    assert_eq!(trail, 0);

    run_ok(&dispatcher, "redo");
    assert_eq!(layer_names(&dispatcher), vec!["a"]);
    assert_eq!(dispatcher.query(|p| p.provenance().records().count()).unwrap(), 1);
}

#[test]
fn renames_undo_through_the_state_cell() {
    let dispatcher = start();
    new_layer(&dispatcher, "before", [1, 1, 1], 0.0);
    run_ok(&dispatcher, "rename_layer(layer=before, name=after)");
    assert_eq!(layer_names(&dispatcher), vec!["after"]);
    run_ok(&dispatcher, "undo");
    assert_eq!(layer_names(&dispatcher), vec!["before"]);
}

#[test]
fn a_new_action_clears_redo() {
    let dispatcher = start();
    new_layer(&dispatcher, "a", [1, 1, 1], 0.0);
    run_ok(&dispatcher, "undo");
    assert_eq!(dispatcher.query(|p| p.undo_buffer().redo_len()).unwrap(), 1);

    new_layer(&dispatcher, "c", [1, 1, 1], 0.0);
    let redo = run(&dispatcher, "redo");
    assert_eq!(redo.status(), ActionStatus::Invalid);
    assert_eq!(redo.error_message(), "Redo list is empty");
    assert_eq!(layer_names(&dispatcher), vec!["c"]);
}

#[test]
fn undo_with_empty_history_is_invalid() {
    let dispatcher = start();
    let context = run(&dispatcher, "undo");
    assert!(context.is_invalid());
    assert_eq!(context.error_message(), "Undo list is empty");
}

#[test]
fn history_depth_comes_from_config() {
    let config = Config::from_toml_str("[undo]\ndepth = 2\n").unwrap();
    let dispatcher = start_with(Project::new(&config));
    for name in ["a", "b", "c", "d"] {
        new_layer(&dispatcher, name, [1, 1, 1], 0.0);
    }
    assert_eq!(dispatcher.query(|p| p.undo_buffer().undo_len()).unwrap(), 2);
    run_ok(&dispatcher, "undo");
    run_ok(&dispatcher, "undo");
    assert!(run(&dispatcher, "undo").is_invalid());
    assert_eq!(layer_names(&dispatcher), vec!["a", "b"]);
}

#[test]
fn undo_waits_for_busy_layers() {
    let dispatcher = start();
    new_layer(&dispatcher, "big", [48, 48, 48], 1.0);
    run_ok(&dispatcher, "fill_slice(layer=big, slice=0, value=2)");

    let context = cairn_core::action::ActionContext::new(cairn_types::ActionSource::Script);
    dispatcher
        .post_many(vec![action("smooth(layer=big, iterations=4)"), action("undo")], &context)
        .unwrap();
    context.wait_done();

    let messages = context.messages();
    assert!(
        messages.iter().any(|m| m.text.contains("is waiting for worker")),
        "undo should have been turned down: {:?}",
        messages
    );
}

#[test]
fn sandboxed_actions_leave_history_alone() {
    let dispatcher = start();
    new_layer(&dispatcher, "a", [2, 2, 2], 0.0);
    let sandbox = run_ok(&dispatcher, "create_sandbox");
    let id = match sandbox.result() {
        Some(cairn_types::Variant::Int(id)) => id,
        other => panic!("unexpected sandbox result {:?}", other),
    };

    let before = dispatcher
        .query(|p| (p.undo_buffer().undo_len(), p.provenance().len()))
        .unwrap();
    run_ok(&dispatcher, &format!("fill_slice(layer=a, slice=1, value=4, sandbox={})", id));
    let after = dispatcher
        .query(|p| (p.undo_buffer().undo_len(), p.provenance().len()))
        .unwrap();
    assert_eq!(before, after);
    assert!(layer_data(&dispatcher, "a").unwrap().iter().all(|v| *v == 0.0));

    let undo = run(&dispatcher, &format!("undo(sandbox={})", id));
    assert!(undo.is_invalid());
}

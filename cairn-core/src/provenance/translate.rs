use cairn_types::ProvenanceId;

use crate::action::{format_params, parser, ActionParam, Rejection};
use crate::layer::{LayerId, LayerStore};

/// Layer references of one action resolved against a workspace.
#[derive(Debug, Clone, Default)]
pub(crate) struct Translation {
    pub(crate) refs: Vec<(&'static str, Vec<LayerId>)>,
    /// Provenance ids of the referenced layers, one per non-empty
    /// reference, in parameter order.
    pub(crate) inputs: Vec<ProvenanceId>,
}

fn is_empty_reference(reference: &str) -> bool {
    let trimmed = reference.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("<none>")
}

/// Resolve `name` or `#provenance_id` to a layer.
pub fn resolve_reference(layers: &LayerStore, reference: &str) -> Option<LayerId> {
    let trimmed = reference.trim();
    match trimmed.strip_prefix('#') {
        Some(number) => number
            .parse::<i64>()
            .ok()
            .and_then(|pid| layers.find_by_provenance(ProvenanceId::new(pid))),
        None => layers.find_by_name(trimmed),
    }
}

pub(crate) fn translate(
    params: &[(&'static str, ActionParam)],
    layers: &LayerStore,
) -> Result<Translation, Rejection> {
    let mut translation = Translation::default();
    for (name, param) in params {
        let references: Vec<&str> = match param {
            ActionParam::Value(_) => continue,
            ActionParam::Layer(reference) => vec![reference.as_str()],
            ActionParam::LayerList(references) => references.iter().map(String::as_str).collect(),
        };
        let mut ids = Vec::with_capacity(references.len());
        for reference in references {
            if is_empty_reference(reference) {
                continue;
            }
            let id = resolve_reference(layers, reference)
                .ok_or_else(|| Rejection::invalid(format!("unknown entity '{}'", reference)))?;
            if let Some(layer) = layers.get(id) {
                translation.inputs.push(layer.provenance_id());
            }
            ids.push(id);
        }
        translation.refs.push((*name, ids));
    }
    Ok(translation)
}

/// Command string with each layer reference replaced by a `${n}`
/// placeholder indexing the record's input provenance ids.
pub(crate) fn export_provenance_string(
    tag: &str,
    params: &[(&'static str, ActionParam)],
) -> String {
    let mut next = 0usize;
    format_params(tag, params, |reference| {
        if is_empty_reference(reference) {
            return parser::quote_if_needed("");
        }
        let placeholder = format!("${{{}}}", next);
        next += 1;
        placeholder
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Volume;
    use crate::state::StateRegistry;
    use cairn_types::Variant;

    fn layers() -> LayerStore {
        let mut layers = LayerStore::new(StateRegistry::new());
        layers
            .insert("CT", Volume::new([1, 1, 1], 0.0), ProvenanceId::new(3))
            .unwrap();
        layers
            .insert("mask", Volume::new([1, 1, 1], 0.0), ProvenanceId::new(4))
            .unwrap();
        layers
    }

    #[test]
    fn references_resolve_by_name_or_provenance_id() {
        let layers = layers();
        let params = vec![
            ("a", ActionParam::Layer("CT".into())),
            ("b", ActionParam::LayerList(vec!["#4".into(), "".into(), "<none>".into()])),
            ("n", ActionParam::Value(Variant::Int(2))),
        ];
        let translation = translate(&params, &layers).unwrap();
        assert_eq!(
            translation.inputs,
            vec![ProvenanceId::new(3), ProvenanceId::new(4)]
        );
        assert_eq!(translation.refs[1].1.len(), 1);
    }

    #[test]
    fn unknown_reference_is_invalid() {
        let layers = layers();
        let params = vec![("a", ActionParam::Layer("missing".into()))];
        let err = translate(&params, &layers).unwrap_err();
        assert_eq!(err.reason(), "unknown entity 'missing'");
        assert!(translate(&[("a", ActionParam::Layer("#99".into()))], &layers).is_err());
    }

    #[test]
    fn export_uses_placeholders_in_reference_order() {
        let params = vec![
            ("a", ActionParam::Layer("CT".into())),
            ("b", ActionParam::LayerList(vec!["mask".into(), "".into()])),
            ("value", ActionParam::Value(Variant::Double(1.5))),
        ];
        assert_eq!(
            export_provenance_string("op", &params),
            "op(a=${0}, b=[${1},''], value=1.5)"
        );
    }
}

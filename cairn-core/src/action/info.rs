/// Expected type of one action parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    Int,
    Double,
    Text,
    /// Any scalar; typed by the receiving state cell.
    Value,
    /// Reference to one layer by name or `#provenance_id`.
    Layer,
    /// Bracketed list of layer references.
    LayerList,
}

impl ParamKind {
    pub fn name(self) -> &'static str {
        match self {
            ParamKind::Bool => "bool",
            ParamKind::Int => "int",
            ParamKind::Double => "double",
            ParamKind::Text => "text",
            ParamKind::Value => "value",
            ParamKind::Layer => "layer",
            ParamKind::LayerList => "layer list",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    /// `None` makes the parameter required.
    pub default: Option<&'static str>,
    pub description: &'static str,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            default: None,
            description,
        }
    }

    pub const fn optional(
        name: &'static str,
        kind: ParamKind,
        default: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            default: Some(default),
            description,
        }
    }
}

/// Static description of an action kind: its script tag, alias and
/// parameters.
#[derive(Debug)]
pub struct ActionInfo {
    pub tag: &'static str,
    pub alias: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
}

impl ActionInfo {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn usage(&self) -> String {
        let mut out = format!("{} (alias: {})\n  {}\n", self.tag, self.alias, self.description);
        for p in self.params {
            match p.default {
                Some(default) => out.push_str(&format!(
                    "  {}: {} = {}  {}\n",
                    p.name,
                    p.kind.name(),
                    default,
                    p.description
                )),
                None => out.push_str(&format!(
                    "  {}: {} (required)  {}\n",
                    p.name,
                    p.kind.name(),
                    p.description
                )),
            }
        }
        out
    }
}

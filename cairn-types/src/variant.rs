use serde::{Deserialize, Serialize};

/// Dynamically typed value used for action parameters and state import/export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    List(Vec<Variant>),
}

impl Variant {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Bool(_) => "bool",
            Variant::Int(_) => "int",
            Variant::Double(_) => "double",
            Variant::Str(_) => "string",
            Variant::List(_) => "list",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Bool(b) => write!(f, "{}", b),
            Variant::Int(i) => write!(f, "{}", i),
            Variant::Double(d) => write!(f, "{}", d),
            Variant::Str(s) => f.write_str(s),
            Variant::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::Str(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::Str(v)
    }
}

/// A value type that can live in a state cell.
///
/// Conversions return `None` instead of a partially converted value, so a
/// failed import never touches the cell.
pub trait StateValue: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    fn to_variant(&self) -> Variant;
    fn from_variant(v: &Variant) -> Option<Self>;
    fn to_state_string(&self) -> String;
    fn from_state_string(s: &str) -> Option<Self>;
}

impl StateValue for bool {
    fn to_variant(&self) -> Variant {
        Variant::Bool(*self)
    }

    fn from_variant(v: &Variant) -> Option<Self> {
        match v {
            Variant::Bool(b) => Some(*b),
            Variant::Int(0) => Some(false),
            Variant::Int(1) => Some(true),
            Variant::Str(s) => Self::from_state_string(s),
            _ => None,
        }
    }

    fn to_state_string(&self) -> String {
        self.to_string()
    }

    fn from_state_string(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }
}

impl StateValue for i64 {
    fn to_variant(&self) -> Variant {
        Variant::Int(*self)
    }

    fn from_variant(v: &Variant) -> Option<Self> {
        match v {
            Variant::Int(i) => Some(*i),
            Variant::Double(d) if d.fract() == 0.0 && d.is_finite() => Some(*d as i64),
            Variant::Str(s) => Self::from_state_string(s),
            _ => None,
        }
    }

    fn to_state_string(&self) -> String {
        self.to_string()
    }

    fn from_state_string(s: &str) -> Option<Self> {
        s.trim().parse().ok()
    }
}

impl StateValue for f64 {
    fn to_variant(&self) -> Variant {
        Variant::Double(*self)
    }

    fn from_variant(v: &Variant) -> Option<Self> {
        match v {
            Variant::Double(d) => Some(*d),
            Variant::Int(i) => Some(*i as f64),
            Variant::Str(s) => Self::from_state_string(s),
            _ => None,
        }
    }

    fn to_state_string(&self) -> String {
        self.to_string()
    }

    fn from_state_string(s: &str) -> Option<Self> {
        s.trim().parse::<f64>().ok().filter(|d| d.is_finite())
    }
}

impl StateValue for String {
    fn to_variant(&self) -> Variant {
        Variant::Str(self.clone())
    }

    fn from_variant(v: &Variant) -> Option<Self> {
        match v {
            Variant::List(_) => None,
            other => Some(other.to_string()),
        }
    }

    fn to_state_string(&self) -> String {
        self.clone()
    }

    fn from_state_string(s: &str) -> Option<Self> {
        Some(s.to_string())
    }
}

impl StateValue for Vec<String> {
    fn to_variant(&self) -> Variant {
        Variant::List(self.iter().cloned().map(Variant::Str).collect())
    }

    fn from_variant(v: &Variant) -> Option<Self> {
        match v {
            Variant::List(items) => items
                .iter()
                .map(|item| match item {
                    Variant::List(_) => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            Variant::Str(s) => Self::from_state_string(s),
            _ => None,
        }
    }

    fn to_state_string(&self) -> String {
        format!("[{}]", self.join(","))
    }

    fn from_state_string(s: &str) -> Option<Self> {
        let inner = s.trim().strip_prefix('[')?.strip_suffix(']')?;
        if inner.trim().is_empty() {
            return Some(Vec::new());
        }
        Some(inner.split(',').map(|item| item.trim().to_string()).collect())
    }
}

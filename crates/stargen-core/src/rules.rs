//! Rule kind and extension property metadata.

use crate::target::AttrValue;
use serde::Deserialize;

/// A rule type recognized by the host: the name plus the merge/match
/// metadata the BUILD writer needs.
#[derive(Debug, Clone, Default)]
pub struct RuleKind {
    pub name: String,
    /// Label of the `.bzl` file the rule is loaded from, if any.
    pub load_from: Option<String>,
    /// Match an existing rule of this kind regardless of name.
    pub match_any: bool,
    /// Attributes used to match existing rules.
    pub match_attrs: Vec<String>,
    /// Attributes that keep an otherwise-empty rule alive.
    pub non_empty_attrs: Vec<String>,
    pub mergeable_attrs: Vec<String>,
    pub resolve_attrs: Vec<String>,
}

/// The value shapes an extension property can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Strings,
    Bool,
    Number,
}

impl PropertyType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "[]string" | "strings" => Some(Self::Strings),
            "bool" => Some(Self::Bool),
            "number" => Some(Self::Number),
            _ => None,
        }
    }
}

/// A directive-tunable property declared by an extension.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub ty: PropertyType,
    pub default: AttrValue,
}

impl Property {
    pub fn new(name: &str, ty: PropertyType, default: AttrValue) -> Self {
        Self {
            name: name.to_string(),
            ty,
            default,
        }
    }
}

//! JSON intermediate representation of a loadable module.
//!
//! A module defines named nodes, imports other modules by source name and
//! exports a subset of its definitions:
//!
//! ```json
//! { "kind": "module",
//!   "import": { "std": "./std.json" },
//!   "define": { "beh": { "kind": "instr", "op": "end", "imm": "commit" } },
//!   "export": ["beh"] }
//! ```
//!
//! A node is either a bare integer (a fixnum) or an object tagged by `kind`.

use crate::virtual_machine::errors::LoadError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Module {
    /// Local alias -> module source.
    #[serde(default)]
    pub import: BTreeMap<String, String>,
    #[serde(default)]
    pub define: BTreeMap<String, Node>,
    #[serde(default)]
    pub export: Vec<String>,
}

impl Module {
    pub fn from_json(text: &str) -> Result<Module, LoadError> {
        serde_json::from_str(text).map_err(|e| LoadError::Json(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Module, LoadError> {
        serde_json::from_value(value).map_err(|e| LoadError::Json(e.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Node {
    /// Range-checked by the loader.
    Fixnum(i64),
    Object(Box<Object>),
}

impl Node {
    pub fn object(&self) -> Option<&Object> {
        match self {
            Node::Object(obj) => Some(obj),
            Node::Fixnum(_) => None,
        }
    }

    pub fn form(&self) -> Option<&Form> {
        self.object().map(|obj| &obj.form)
    }

    /// `pair`, `dict`, `quad` and `instr` nodes occupy a ROM quad of their own.
    pub fn is_quad(&self) -> bool {
        matches!(
            self.form(),
            Some(Form::Pair { .. } | Form::Dict { .. } | Form::Quad { .. } | Form::Instr { .. })
        )
    }

    /// Name of the local definition this node aliases, if it is a bare
    /// local reference.
    pub fn local_alias(&self) -> Option<&str> {
        match self.form()? {
            Form::Ref { module: None, name } => Some(name),
            Form::Type {
                name: Some(name),
                module: None,
                arity: None,
            } if builtin_type(name).is_none() => Some(name),
            _ => None,
        }
    }

    pub fn debug(&self) -> Option<&DebugInfo> {
        self.object().and_then(|obj| obj.debug.as_ref())
    }
}

/// A tagged node with optional source position.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Object {
    #[serde(flatten)]
    pub form: Form,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Form {
    Literal {
        value: String,
    },
    Ref {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
        name: String,
    },
    /// A builtin type by `name`, an imported or local type by `name`, or a
    /// new custom type of the given `arity`.
    Type {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arity: Option<i64>,
    },
    Pair {
        head: Node,
        tail: Node,
    },
    Dict {
        key: Node,
        value: Node,
        next: Node,
    },
    Quad {
        t: Node,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<Node>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        z: Option<Node>,
    },
    Instr {
        op: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        imm: Option<Imm>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        k: Option<Node>,
        /// `if` true branch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        t: Option<Node>,
        /// `if` false branch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        f: Option<Node>,
    },
    /// Produced by some front ends; never loadable.
    Symbol {
        #[serde(default)]
        name: String,
    },
}

impl Form {
    pub fn kind(&self) -> &'static str {
        match self {
            Form::Literal { .. } => "literal",
            Form::Ref { .. } => "ref",
            Form::Type { .. } => "type",
            Form::Pair { .. } => "pair",
            Form::Dict { .. } => "dict",
            Form::Quad { .. } => "quad",
            Form::Instr { .. } => "instr",
            Form::Symbol { .. } => "symbol",
        }
    }
}

/// An instruction immediate: a sub-op label or a value node.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Imm {
    Label(String),
    Node(Node),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DebugInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
}

impl fmt::Display for DebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.src.as_deref().unwrap_or("?"))?;
        if let Some(start) = self.start {
            write!(f, ":{}", start)?;
            if let Some(end) = self.end {
                write!(f, "-{}", end)?;
            }
        }
        Ok(())
    }
}

/// Builtin type names accepted by `{"kind": "type", "name": ...}`.
pub fn builtin_type(name: &str) -> Option<crate::virtual_machine::any::Any> {
    use crate::virtual_machine::any::*;
    match name {
        "fixnum" => Some(FIXNUM_T),
        "actor" => Some(ACTOR_T),
        "proxy" => Some(PROXY_T),
        "stub" => Some(STUB_T),
        "instr" => Some(INSTR_T),
        "pair" => Some(PAIR_T),
        "dict" => Some(DICT_T),
        "type" => Some(TYPE_T),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_nodes() {
        let module = Module::from_value(json!({
            "kind": "module",
            "import": { "std": "./std.json" },
            "define": {
                "k": { "kind": "instr", "op": "end", "imm": "commit" },
                "beh": {
                    "kind": "instr", "op": "push",
                    "imm": { "kind": "pair", "head": 1, "tail": { "kind": "literal", "value": "nil" } },
                    "k": { "kind": "ref", "name": "k" },
                    "debug": { "src": "beh.asm", "start": 4, "end": 9 }
                }
            },
            "export": ["beh"]
        }))
        .unwrap();

        assert_eq!(module.import["std"], "./std.json");
        let beh = &module.define["beh"];
        assert!(beh.is_quad());
        assert_eq!(beh.debug().unwrap().to_string(), "beh.asm:4-9");
        let Some(Form::Instr { op, imm, k, .. }) = beh.form() else {
            panic!("not an instr: {:?}", beh);
        };
        assert_eq!(op, "push");
        assert!(matches!(imm, Some(Imm::Node(node)) if node.is_quad()));
        assert_eq!(k.as_ref().and_then(Node::local_alias), Some("k"));
        assert!(matches!(
            module.define["k"].form(),
            Some(Form::Instr { imm: Some(Imm::Label(label)), .. }) if label == "commit"
        ));
    }

    #[test]
    fn type_nodes_alias_unless_builtin() {
        let custom: Node = serde_json::from_value(json!({"kind": "type", "name": "point"})).unwrap();
        let builtin: Node = serde_json::from_value(json!({"kind": "type", "name": "pair"})).unwrap();
        let fresh: Node = serde_json::from_value(json!({"kind": "type", "arity": 2})).unwrap();
        assert_eq!(custom.local_alias(), Some("point"));
        assert_eq!(builtin.local_alias(), None);
        assert_eq!(fresh.local_alias(), None);
    }

    #[test]
    fn unknown_kind_is_malformed() {
        let err = Module::from_json(r#"{"define": {"x": {"kind": "bogus"}}}"#).unwrap_err();
        assert!(matches!(err, LoadError::Json(_)));
    }
}

//! Input/output contracts for directives and tool bindings.
//!
//! A `Schema` is an ordered list of named, typed parameters. Records are
//! `serde_json::Value` objects; unknown fields are tolerated.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-level type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    /// Check whether a JSON value inhabits this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_required() -> bool {
    true
}

/// A single named parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Param {
    /// A required parameter
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            description: None,
        }
    }

    /// An optional parameter
    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Ordered list of parameters with unique names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    params: Vec<Param>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, replacing any existing one with the same name in place
    pub fn with(mut self, param: Param) -> Self {
        match self.params.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => *existing = param,
            None => self.params.push(param),
        }
        self
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Validate a record against this schema, returning every violation found
    pub fn validate(&self, record: &Value) -> Vec<String> {
        let Some(fields) = record.as_object() else {
            return vec![format!("expected an object, got {}", json_kind(record))];
        };

        let mut violations = Vec::new();
        for param in &self.params {
            match fields.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    violations.push(format!("missing required field `{}`", param.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.param_type.accepts(value) => {
                    violations.push(format!(
                        "field `{}` should be {}, got {}",
                        param.name,
                        param.param_type,
                        json_kind(value)
                    ));
                }
                Some(_) => {}
            }
        }
        violations
    }

    /// Bind-time check of a tool's input schema against a directive's input schema.
    ///
    /// Everything the tool requires must be declared by the directive with the
    /// same type, and shared fields must agree on type.
    pub fn input_problems(directive: &Schema, tool: &Schema) -> Vec<String> {
        let mut problems = Vec::new();
        for param in &tool.params {
            match directive.get(&param.name) {
                None if param.required => problems.push(format!(
                    "tool requires input `{}` the directive does not declare",
                    param.name
                )),
                None => {}
                Some(declared) if !types_agree(declared.param_type, param.param_type) => {
                    problems.push(format!(
                        "input `{}` is {} in the directive but {} in the tool",
                        param.name, declared.param_type, param.param_type
                    ))
                }
                Some(_) => {}
            }
        }
        problems
    }

    /// Bind-time check of a tool's output schema against a directive's output schema.
    ///
    /// Every output the directive expects must be produced by the tool with the
    /// same type, and guaranteed if the directive requires it.
    pub fn output_problems(directive: &Schema, tool: &Schema) -> Vec<String> {
        let mut problems = Vec::new();
        for expected in &directive.params {
            match tool.get(&expected.name) {
                None => problems.push(format!("tool does not produce output `{}`", expected.name)),
                Some(produced) if !types_agree(expected.param_type, produced.param_type) => {
                    problems.push(format!(
                        "output `{}` is {} in the directive but {} in the tool",
                        expected.name, expected.param_type, produced.param_type
                    ))
                }
                Some(produced) if expected.required && !produced.required => problems.push(format!(
                    "output `{}` is required by the directive but optional in the tool",
                    expected.name
                )),
                Some(_) => {}
            }
        }
        problems
    }
}

fn types_agree(a: ParamType, b: ParamType) -> bool {
    a == b || a == ParamType::Any || b == ParamType::Any
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl FromIterator<Param> for Schema {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        iter.into_iter().fold(Schema::new(), Schema::with)
    }
}

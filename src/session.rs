//! Per-virtual-user state.
//!
//! A [`Session`] is created when a virtual user starts, mutated by feeds and
//! checks while its chain runs, and dropped when the user finishes. Sessions are
//! owned by exactly one user task and are never shared.

use std::{borrow::Cow, collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;

/// A typed session value.
///
/// Values are rendered to text explicitly when a template needs them; only
/// scalars can be rendered, structured JSON must be extracted further first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Json(serde_json::Value),
}

impl Value {
    /// Text form used for template substitution.
    pub fn render(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Null => Some(Cow::Borrowed("null")),
            Self::Bool(b) => Some(Cow::Owned(b.to_string())),
            Self::Int(i) => Some(Cow::Owned(i.to_string())),
            Self::Float(f) => Some(Cow::Owned(f.to_string())),
            Self::Str(s) => Some(Cow::Borrowed(s)),
            Self::Json(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(json) => write!(f, "{json}"),
            other => f.write_str(&other.render().unwrap_or_default()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Self::Str(s),
            structured => Self::Json(structured),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Key/value context of one virtual user.
#[derive(Debug, Clone, Default)]
pub struct Session {
    user: u64,
    vars: HashMap<String, Value>,
}

impl Session {
    pub fn new(user: u64) -> Self {
        Self {
            user,
            vars: HashMap::new(),
        }
    }

    /// Id of the virtual user owning this session.
    pub fn user(&self) -> u64 {
        self.user
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Renders a variable for substitution, failing if it is absent or structured.
    pub fn render_var(&self, name: &str) -> Result<Cow<'_, str>, TemplateError> {
        let value = self
            .vars
            .get(name)
            .ok_or_else(|| TemplateError::Missing(name.to_owned()))?;
        value
            .render()
            .ok_or_else(|| TemplateError::NotScalar(name.to_owned()))
    }

    /// Merges every field of a feeder record into the session.
    pub fn extend<'a>(&mut self, fields: impl IntoIterator<Item = (&'a String, &'a Value)>) {
        for (name, value) in fields {
            self.vars.insert(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_numbers_keep_their_type() {
        assert_eq!(Value::from(json!(42)), Value::Int(42));
        assert_eq!(Value::from(json!(1.5)), Value::Float(1.5));
        assert_eq!(Value::from(json!("x")), Value::Str("x".into()));
        assert!(matches!(Value::from(json!({"a": 1})), Value::Json(_)));
    }

    #[test]
    fn scalars_render_structured_values_do_not() {
        let mut session = Session::new(7);
        session.set("id", 3_i64);
        session.set("name", "Mario");
        session.set("tags", Value::from(json!(["a", "b"])));

        assert_eq!(session.render_var("id").unwrap(), "3");
        assert_eq!(session.render_var("name").unwrap(), "Mario");
        assert_eq!(
            session.render_var("tags").unwrap_err(),
            TemplateError::NotScalar("tags".into())
        );
        assert_eq!(
            session.render_var("nope").unwrap_err(),
            TemplateError::Missing("nope".into())
        );
    }

    #[test]
    fn sessions_are_independent() {
        let mut a = Session::new(1);
        let b = Session::new(2);
        a.set("token", "abc");

        assert!(a.contains("token"));
        assert!(!b.contains("token"));
        assert_eq!(a.user(), 1);
        assert_eq!(b.user(), 2);
    }
}

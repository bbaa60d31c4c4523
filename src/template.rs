use std::fmt;

use crate::{error::TemplateError, session::Session};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Var(String),
}

/// A string with `{{variable}}` placeholders, parsed once and rendered per request.
///
/// Whitespace inside the braces is ignored. An opening `{{` with no closing
/// `}}` is kept as literal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let parts = parse(&source);
        Self { source, parts }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of every variable the template references, in order of appearance.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            Part::Var(name) => Some(name.as_str()),
            Part::Literal(_) => None,
        })
    }

    pub fn is_static(&self) -> bool {
        self.variables().next().is_none()
    }

    pub fn render(&self, session: &Session) -> Result<String, TemplateError> {
        self.render_with(session, |out, text| out.push_str(text))
    }

    /// Renders a JSON document: substituted text is escaped as the contents of a
    /// JSON string, so quotes, backslashes and control characters stay valid.
    ///
    /// The template keeps control of quoting. `"name": "{{name}}"` yields a
    /// string and `"id": {{id}}` a number.
    pub fn render_json(&self, session: &Session) -> Result<String, TemplateError> {
        self.render_with(session, |out, text| {
            let quoted = serde_json::Value::from(text).to_string();
            out.push_str(&quoted[1..quoted.len() - 1]);
        })
    }

    fn render_with(
        &self,
        session: &Session,
        substitute: impl Fn(&mut String, &str),
    ) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Var(name) => substitute(&mut out, &session.render_var(name)?),
            }
        }
        Ok(out)
    }
}

fn parse(source: &str) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = source;

    while let Some(open) = rest.find("{{") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            break;
        };
        literal.push_str(&rest[..open]);
        if !literal.is_empty() {
            parts.push(Part::Literal(std::mem::take(&mut literal)));
        }
        parts.push(Part::Var(after_open[..close].trim().to_owned()));
        rest = &after_open[close + 2..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    parts
}

impl From<&str> for Template {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Template {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        let mut s = Session::new(0);
        s.set("id", 12_i64);
        s.set("name", "Zelda");
        s
    }

    #[test]
    fn substitutes_variables() {
        let t = Template::new("/videogame/{{id}}?q={{ name }}");
        assert_eq!(t.render(&session()).unwrap(), "/videogame/12?q=Zelda");
        assert_eq!(t.variables().collect::<Vec<_>>(), ["id", "name"]);
    }

    #[test]
    fn static_text_is_untouched() {
        let t = Template::new("Video game deleted");
        assert!(t.is_static());
        assert_eq!(t.render(&Session::new(0)).unwrap(), "Video game deleted");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let t = Template::new("Bearer {{jwtToken}}");
        assert_eq!(
            t.render(&session()).unwrap_err(),
            TemplateError::Missing("jwtToken".into())
        );
    }

    #[test]
    fn unterminated_placeholder_stays_literal() {
        let t = Template::new("{\"a\": {{id}}, \"b\": \"{{oops\"}");
        assert_eq!(t.render(&session()).unwrap(), "{\"a\": 12, \"b\": \"{{oops\"}");
    }

    #[test]
    fn json_body_template() {
        let t = Template::new("{\"id\": {{id}}, \"name\": \"{{name}}\"}");
        let body = t.render(&session()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["id"], 12);
        assert_eq!(json["name"], "Zelda");
    }

    #[test]
    fn json_rendering_escapes_substituted_text() {
        let mut s = session();
        s.set("name", "The \"Best\" \\ Game\n");
        let t = Template::new("{\"id\": {{id}}, \"name\": \"{{name}}\"}");

        assert!(serde_json::from_str::<serde_json::Value>(&t.render(&s).unwrap()).is_err());
        let json: serde_json::Value = serde_json::from_str(&t.render_json(&s).unwrap()).unwrap();
        assert_eq!(json["id"], 12);
        assert_eq!(json["name"], "The \"Best\" \\ Game\n");
    }
}

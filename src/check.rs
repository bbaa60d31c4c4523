//! Response checks: find a value, optionally validate it, optionally save it.
//!
//! All checks of a step are evaluated before anything is written to the
//! session, so a failed step leaves the session as it was.

use regex::Regex;

use crate::{
    error::StepError,
    http::Response,
    session::{Session, Value},
    template::Template,
};

/// Where in the response to look.
#[derive(Debug, Clone)]
pub enum Extractor {
    /// A dotted path into the JSON body, e.g. `token` or `items[0].name`.
    JsonPath(String),
    /// The first match of a pattern in the body. When the pattern has capture
    /// groups, the first group is extracted instead of the whole match.
    Regex(Regex),
    /// The whole body as a string.
    Body,
    Header(String),
    Status,
}

/// How to validate what was found. Expected values are templates.
#[derive(Debug, Clone)]
pub enum Expectation {
    Is(Template),
    IsNot(Template),
    Contains(Template),
    Matches(Regex),
}

#[derive(Debug, Clone)]
pub struct Check {
    pub extractor: Extractor,
    pub expectation: Option<Expectation>,
    pub save_as: Option<String>,
}

impl Check {
    fn new(extractor: Extractor) -> Self {
        Self {
            extractor,
            expectation: None,
            save_as: None,
        }
    }

    pub fn json_path(path: impl Into<String>) -> Self {
        Self::new(Extractor::JsonPath(path.into()))
    }

    pub fn regex(pattern: Regex) -> Self {
        Self::new(Extractor::Regex(pattern))
    }

    pub fn body() -> Self {
        Self::new(Extractor::Body)
    }

    pub fn header(name: impl Into<String>) -> Self {
        Self::new(Extractor::Header(name.into()))
    }

    pub fn status() -> Self {
        Self::new(Extractor::Status)
    }

    pub fn is(mut self, expected: impl Into<Template>) -> Self {
        self.expectation = Some(Expectation::Is(expected.into()));
        self
    }

    pub fn is_not(mut self, unexpected: impl Into<Template>) -> Self {
        self.expectation = Some(Expectation::IsNot(unexpected.into()));
        self
    }

    pub fn contains(mut self, needle: impl Into<Template>) -> Self {
        self.expectation = Some(Expectation::Contains(needle.into()));
        self
    }

    pub fn matches(mut self, pattern: Regex) -> Self {
        self.expectation = Some(Expectation::Matches(pattern));
        self
    }

    pub fn save_as(mut self, name: impl Into<String>) -> Self {
        self.save_as = Some(name.into());
        self
    }

    fn target(&self) -> String {
        match &self.extractor {
            Extractor::JsonPath(path) => format!("json path `{path}`"),
            Extractor::Regex(pattern) => format!("pattern `{pattern}`"),
            Extractor::Body => "body".to_owned(),
            Extractor::Header(name) => format!("header `{name}`"),
            Extractor::Status => "status".to_owned(),
        }
    }

    fn extract(&self, response: &Response) -> Result<Value, StepError> {
        let missing = |reason: &str| StepError::Extraction {
            target: self.target(),
            reason: reason.to_owned(),
        };
        match &self.extractor {
            Extractor::Body => Ok(Value::Str(response.body.clone())),
            Extractor::Status => Ok(Value::from(response.status)),
            Extractor::Regex(pattern) => pattern
                .captures(&response.body)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
                .map(|found| Value::from(found.as_str()))
                .ok_or_else(|| missing("no match in body")),
            Extractor::Header(name) => response
                .headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(Value::from)
                .ok_or_else(|| missing("header not present")),
            Extractor::JsonPath(path) => {
                let segments = parse_path(path).ok_or_else(|| missing("invalid path"))?;
                let json = response
                    .json()
                    .map_err(|_| missing("body is not valid JSON"))?;
                match lookup(&json, &segments) {
                    Some(serde_json::Value::Null) | None => Err(missing("path not found")),
                    Some(found) => Ok(Value::from(found.clone())),
                }
            }
        }
    }

    fn validate(&self, actual: &Value, session: &Session) -> Result<(), StepError> {
        let Some(expectation) = &self.expectation else {
            return Ok(());
        };
        let actual_text = actual.to_string();
        let (expected, ok) = match expectation {
            Expectation::Is(t) => {
                let e = t.render(session)?;
                let ok = actual_text == e;
                (e, ok)
            }
            Expectation::IsNot(t) => {
                let e = t.render(session)?;
                let ok = actual_text != e;
                (format!("not {e}"), ok)
            }
            Expectation::Contains(t) => {
                let e = t.render(session)?;
                let ok = actual_text.contains(&e);
                (format!("contains {e}"), ok)
            }
            Expectation::Matches(pattern) => (format!("matches {pattern}"), pattern.is_match(&actual_text)),
        };
        if ok {
            Ok(())
        } else {
            Err(StepError::Assertion {
                target: self.target(),
                expected,
                actual: actual_text,
            })
        }
    }
}

/// Runs every check against the response and, if all pass, stores the saved values.
///
/// Unless a status check is declared, the status must be 2xx or 304.
pub fn apply(checks: &[Check], response: &Response, session: &mut Session) -> Result<(), StepError> {
    let explicit_status = checks.iter().any(|c| matches!(c.extractor, Extractor::Status));
    if !explicit_status && !((200..300).contains(&response.status) || response.status == 304) {
        return Err(StepError::Assertion {
            target: "status".to_owned(),
            expected: "2xx or 304".to_owned(),
            actual: response.status.to_string(),
        });
    }

    let mut saves = Vec::new();
    for check in checks {
        let value = check.extract(response)?;
        check.validate(&value, session)?;
        if let Some(name) = &check.save_as {
            saves.push((name.clone(), value));
        }
    }
    for (name, value) in saves {
        session.set(name, value);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    if path.is_empty() {
        return None;
    }
    let mut segments = Vec::new();
    for part in path.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            segments.push(Segment::Key(key.to_owned()));
        } else if rest.is_empty() {
            return None;
        }
        while !rest.is_empty() {
            let close = rest.find(']')?;
            let index = rest.get(1..close)?.trim().parse().ok()?;
            segments.push(Segment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return None;
            }
        }
    }
    Some(segments)
}

fn lookup<'a>(json: &'a serde_json::Value, segments: &[Segment]) -> Option<&'a serde_json::Value> {
    segments.iter().try_fold(json, |node, segment| match segment {
        Segment::Key(key) => node.get(key.as_str()),
        Segment::Index(i) => node.get(*i),
    })
}

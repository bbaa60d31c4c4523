//! HTTP protocol settings and the request step.

use std::{path::Path, time::Duration};

use reqwest::{
    Client, Method,
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use typed_builder::TypedBuilder;

use crate::{
    check::Check,
    error::{EngineError, StepError, TemplateError},
    session::Session,
    template::Template,
};

/// Settings shared by every request of a run.
#[derive(Debug, Clone, TypedBuilder)]
pub struct HttpProtocol {
    /// Prefix for every relative request path.
    #[builder(setter(into))]
    pub base_url: String,
    #[builder(default, setter(strip_option, into))]
    pub accept: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub content_type: Option<String>,
    /// Extra headers sent with every request.
    #[builder(default)]
    pub headers: Vec<(String, String)>,
    /// Limit for a whole request, connect to last body byte.
    #[builder(default = Duration::from_secs(60))]
    pub timeout: Duration,
}

impl HttpProtocol {
    /// Builds the client shared by every virtual user of a run.
    pub fn client(&self) -> Result<Client, EngineError> {
        let mut defaults = HeaderMap::new();
        if let Some(accept) = &self.accept {
            defaults.insert(ACCEPT, header_value(ACCEPT.as_str(), accept)?);
        }
        if let Some(content_type) = &self.content_type {
            defaults.insert(CONTENT_TYPE, header_value(CONTENT_TYPE.as_str(), content_type)?);
        }
        for (name, value) in &self.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| EngineError::InvalidHeader { name: name.clone() })?;
            defaults.insert(header, header_value(name, value)?);
        }

        Ok(Client::builder()
            .default_headers(defaults)
            .timeout(self.timeout)
            .build()?)
    }

    /// Joins the base URL and a rendered path. Absolute URLs are used as is.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        match (self.base_url.ends_with('/'), path.starts_with('/')) {
            (true, true) => format!("{}{}", self.base_url, &path[1..]),
            (false, false) if !path.is_empty() => format!("{}/{}", self.base_url, path),
            _ => format!("{}{}", self.base_url, path),
        }
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, EngineError> {
    HeaderValue::from_str(value).map_err(|_| EngineError::InvalidHeader {
        name: name.to_owned(),
    })
}

/// A captured response, body fully read.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl Response {
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// One HTTP step: a request template plus the checks applied to its response.
///
/// ```rust
/// use stampede::{check::Check, http::Request};
///
/// let delete = Request::delete("Delete game - {{name}}", "/videogame/{{id}}")
///     .bearer("jwtToken")
///     .check(Check::body().is("Video game deleted"));
/// assert_eq!(delete.name().source(), "Delete game - {{name}}");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    name: Template,
    method: Method,
    path: Template,
    headers: Vec<(String, Template)>,
    body: Option<Template>,
    json_body: bool,
    checks: Vec<Check>,
}

impl Request {
    pub fn new(method: Method, name: impl Into<Template>, path: impl Into<Template>) -> Self {
        Self {
            name: name.into(),
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            json_body: false,
            checks: Vec::new(),
        }
    }

    pub fn get(name: impl Into<Template>, path: impl Into<Template>) -> Self {
        Self::new(Method::GET, name, path)
    }

    pub fn post(name: impl Into<Template>, path: impl Into<Template>) -> Self {
        Self::new(Method::POST, name, path)
    }

    pub fn put(name: impl Into<Template>, path: impl Into<Template>) -> Self {
        Self::new(Method::PUT, name, path)
    }

    pub fn delete(name: impl Into<Template>, path: impl Into<Template>) -> Self {
        Self::new(Method::DELETE, name, path)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<Template>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sends `Authorization: Bearer <value of session variable>`.
    pub fn bearer(self, variable: &str) -> Self {
        self.header(AUTHORIZATION.as_str(), format!("Bearer {{{{{variable}}}}}"))
    }

    pub fn body(mut self, body: impl Into<Template>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Renders the body as a JSON document: substituted values are escaped so a
    /// quote or backslash in a session value cannot break the document.
    pub fn as_json(mut self) -> Self {
        self.json_body = true;
        self
    }

    /// Uses the contents of a template file as the body.
    ///
    /// Values are substituted as raw text unless [`Request::as_json`] is set.
    pub fn body_file(self, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let template = std::fs::read_to_string(path)?;
        Ok(self.body(template))
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn name(&self) -> &Template {
        &self.name
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Renders the request against the session and sends it. Exactly one attempt.
    pub async fn send(
        &self,
        client: &Client,
        protocol: &HttpProtocol,
        session: &Session,
    ) -> Result<Response, StepError> {
        let url = protocol.url(&self.path.render(session)?);
        let mut request = client.request(self.method.clone(), url);
        for (name, value) in &self.headers {
            let invalid = || TemplateError::InvalidHeader { name: name.clone() };
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let value = HeaderValue::from_str(&value.render(session)?).map_err(|_| invalid())?;
            request = request.header(header, value);
        }
        if let Some(body) = &self.body {
            let body = if self.json_body {
                body.render_json(session)?
            } else {
                body.render(session)?
            };
            request = request.body(body);
        }

        let transport = |source: reqwest::Error| {
            if source.is_timeout() {
                StepError::Timeout {
                    timeout: protocol.timeout,
                    source,
                }
            } else {
                StepError::Network(source)
            }
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(transport)?;
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol(base: &str) -> HttpProtocol {
        HttpProtocol::builder()
            .base_url(base)
            .accept("application/json")
            .content_type("application/json")
            .build()
    }

    #[test]
    fn joins_base_url_and_path() {
        let p = protocol("https://videogamedb.uk/api");
        assert_eq!(p.url("/videogame/3"), "https://videogamedb.uk/api/videogame/3");
        assert_eq!(p.url("videogame"), "https://videogamedb.uk/api/videogame");

        let p = protocol("http://localhost:8080/");
        assert_eq!(p.url("/authenticate"), "http://localhost:8080/authenticate");
        assert_eq!(p.url("http://elsewhere/x"), "http://elsewhere/x");
    }

    #[test]
    fn bearer_reads_the_session_variable() {
        let request = Request::get("Who am I", "/me").bearer("jwtToken");
        let (name, value) = &request.headers[0];
        assert_eq!(name, "authorization");
        assert_eq!(value.source(), "Bearer {{jwtToken}}");
    }

    #[test]
    fn rejects_invalid_default_headers() {
        let p = HttpProtocol::builder()
            .base_url("http://localhost")
            .headers(vec![("bad header".into(), "x".into())])
            .build();
        assert!(matches!(p.client(), Err(EngineError::InvalidHeader { .. })));
    }

    #[tokio::test]
    async fn missing_variable_fails_before_sending() {
        let p = protocol("http://127.0.0.1:9");
        let client = p.client().unwrap();
        let request = Request::get("Get game", "/videogame/{{id}}");

        let err = request.send(&client, &p, &Session::new(0)).await.unwrap_err();
        assert!(matches!(err, StepError::Template(_)));
    }

    #[tokio::test]
    async fn unsendable_header_value_is_a_template_error() {
        let p = protocol("http://127.0.0.1:9");
        let client = p.client().unwrap();
        let mut session = Session::new(0);
        session.set("jwtToken", "abc\ndef");

        let err = Request::get("Who am I", "/me")
            .bearer("jwtToken")
            .send(&client, &p, &session)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::Template(TemplateError::InvalidHeader { ref name }) if name == "authorization"
        ));
        assert_eq!(err.kind(), crate::error::ErrorKind::Template);
    }
}

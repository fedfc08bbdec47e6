//! Directive dispatch
//!
//! A leaf starting with `$name:` asks the handler registered under `name` to
//! produce its value. Handlers either resolve the [`DirectiveContext`] or hand
//! it back unresolved, in which case it is retried on a later pass.
//!
//! Content loaders are handlers whose only job is to fetch raw content; the
//! [`LoaderDirective`] adapter decides from the content type whether to parse
//! it as JSON or YAML, keep it as text, or pass it through untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::path::ArrayPath;
use crate::tree::Evaluation;
use crate::value::Value;

/// The state of one directive invocation
#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveContext {
    /// Registered handler name
    pub strategy: String,
    /// Argument after the marker, placeholders already substituted
    pub expression: String,
    /// Leaf the result will be written to
    pub path: ArrayPath,
    pub sympath: String,
    pub resolved: bool,
    pub value: Option<Value>,
}

impl DirectiveContext {
    pub fn new(strategy: impl Into<String>, expression: impl Into<String>, path: ArrayPath) -> Self {
        let sympath = path.join();
        Self {
            strategy: strategy.into(),
            expression: expression.into(),
            path,
            sympath,
            resolved: false,
            value: None,
        }
    }

    /// Set the result and mark the directive resolved
    pub fn resolve(&mut self, value: impl Into<Value>) -> &mut Self {
        self.value = Some(value.into());
        self.resolved = true;
        self
    }

    /// Consuming form of [`DirectiveContext::resolve`]
    pub fn resolved_with(mut self, value: impl Into<Value>) -> Self {
        self.resolve(value);
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

/// Trait for directive handler implementations
#[async_trait]
pub trait DirectiveHandler: Send + Sync {
    /// Name used after `$` in templates
    fn strategy(&self) -> &str;

    /// Resolve the context, return it unresolved to retry next pass, or fail.
    ///
    /// Handlers in one batch run concurrently and must not rely on each
    /// other's results.
    async fn handle(
        &self,
        context: DirectiveContext,
        tree: &Value,
        evaluation: &Evaluation,
    ) -> Result<DirectiveContext>;
}

/// A simple function-based directive
pub struct FnDirective<F>
where
    F: Fn(DirectiveContext, &Value) -> Result<DirectiveContext> + Send + Sync,
{
    strategy: String,
    func: F,
}

impl<F> FnDirective<F>
where
    F: Fn(DirectiveContext, &Value) -> Result<DirectiveContext> + Send + Sync,
{
    /// Create a new function-based directive
    pub fn new(strategy: impl Into<String>, func: F) -> Self {
        Self {
            strategy: strategy.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> DirectiveHandler for FnDirective<F>
where
    F: Fn(DirectiveContext, &Value) -> Result<DirectiveContext> + Send + Sync,
{
    fn strategy(&self) -> &str {
        &self.strategy
    }

    async fn handle(
        &self,
        context: DirectiveContext,
        tree: &Value,
        _evaluation: &Evaluation,
    ) -> Result<DirectiveContext> {
        (self.func)(context, tree)
    }
}

/// Handlers keyed by strategy name
#[derive(Clone, Default)]
pub struct DirectiveRegistry {
    handlers: IndexMap<String, Arc<dyn DirectiveHandler>>,
}

impl std::fmt::Debug for DirectiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

impl DirectiveRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in content loaders
    pub fn with_builtins(base_dir: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new();
        registry.add(Arc::new(LoaderDirective::new(FileLoader::new(base_dir))));

        #[cfg(feature = "http")]
        {
            registry.add(Arc::new(LoaderDirective::new(HttpLoader::new("http"))));
            registry.add(Arc::new(LoaderDirective::new(HttpLoader::new("https"))));
        }

        registry
    }

    /// Register a handler, replacing any with the same strategy
    pub fn add(&mut self, handler: Arc<dyn DirectiveHandler>) {
        let strategy = handler.strategy().to_string();
        if self.handlers.insert(strategy.clone(), handler).is_some() {
            log::warn!("Replaced existing directive handler '{}'", strategy);
        }
    }

    pub fn remove(&mut self, strategy: &str) -> Result<()> {
        match self.handlers.shift_remove(strategy) {
            Some(_) => Ok(()),
            None => Err(Error::registration(format!(
                "Directive '{}' does not exist",
                strategy
            ))),
        }
    }

    pub fn get(&self, strategy: &str) -> Option<&Arc<dyn DirectiveHandler>> {
        self.handlers.get(strategy)
    }

    pub fn contains(&self, strategy: &str) -> bool {
        self.handlers.contains_key(strategy)
    }

    /// Registered strategies in registration order
    pub fn strategies(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Run the handler registered for `context.strategy`
    pub async fn dispatch(
        &self,
        context: DirectiveContext,
        tree: &Value,
        evaluation: &Evaluation,
    ) -> Result<DirectiveContext> {
        let handler = self.handlers.get(&context.strategy).ok_or_else(|| {
            Error::handler_not_found(&context.strategy, Some(context.sympath.clone()))
        })?;

        let sympath = context.sympath.clone();
        handler
            .handle(context, tree, evaluation)
            .await
            .map_err(|e| match e.path {
                Some(_) => e,
                None => e.with_path(sympath),
            })
    }
}

/// Raw content as fetched by a loader
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Bytes(Vec<u8>),
    Text(String),
    /// Already structured; passed through as-is
    Structured(Value),
}

/// What a [`ContentLoader`] returns
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    /// MIME type, e.g. `application/json` or `text/plain; charset=utf-8`
    pub content_type: String,
    pub body: Body,
}

impl Content {
    pub fn new(content_type: impl Into<String>, body: Body) -> Self {
        Self {
            content_type: content_type.into(),
            body,
        }
    }
}

/// A source of raw content addressed by the directive argument
#[async_trait]
pub trait ContentLoader: Send + Sync {
    fn strategy(&self) -> &str;

    async fn load(&self, argument: &str) -> Result<Content>;
}

/// Adapts a [`ContentLoader`] into a [`DirectiveHandler`]
pub struct LoaderDirective<L> {
    loader: L,
}

impl<L: ContentLoader> LoaderDirective<L> {
    pub fn new(loader: L) -> Self {
        Self { loader }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }
}

#[async_trait]
impl<L: ContentLoader> DirectiveHandler for LoaderDirective<L> {
    fn strategy(&self) -> &str {
        self.loader.strategy()
    }

    async fn handle(
        &self,
        mut context: DirectiveContext,
        _tree: &Value,
        _evaluation: &Evaluation,
    ) -> Result<DirectiveContext> {
        let content = self.loader.load(&context.expression).await?;
        log::trace!(
            "Loaded {} via '{}' for '{}'",
            content.content_type,
            self.loader.strategy(),
            context.sympath
        );
        context.resolve(interpret_content(content)?);
        Ok(context)
    }
}

/// Turn loaded content into a tree value according to its content type
pub fn interpret_content(content: Content) -> Result<Value> {
    let essence = content
        .content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match (essence.as_str(), content.body) {
        (_, Body::Structured(value)) => Ok(value),
        ("application/json", body) => {
            let text = body_text(body, &essence)?;
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| Error::content_parse(&essence, e.to_string()))?;
            Ok(Value::from(json))
        }
        (ct, body) if is_yaml(ct) => {
            let text = body_text(body, &essence)?;
            serde_yaml::from_str(&text).map_err(|e| Error::content_parse(&essence, e.to_string()))
        }
        (ct, body) if ct.starts_with("text/") => Ok(Value::String(body_text(body, &essence)?)),
        (_, Body::Text(text)) => Ok(Value::String(text)),
        (_, Body::Bytes(bytes)) => Ok(Value::Bytes(bytes)),
    }
}

fn is_yaml(content_type: &str) -> bool {
    matches!(
        content_type,
        "application/yaml" | "application/x-yaml" | "text/yaml" | "text/x-yaml"
    )
}

fn body_text(body: Body, content_type: &str) -> Result<String> {
    match body {
        Body::Text(text) => Ok(text),
        Body::Bytes(bytes) => {
            String::from_utf8(bytes).map_err(|e| Error::content_parse(content_type, e.to_string()))
        }
        Body::Structured(value) => Ok(value.to_string()),
    }
}

/// Loads files relative to a base directory (strategy `file`)
///
/// The content type comes from the file extension unless the argument ends
/// with a `?type=json|yaml|text|binary` hint.
#[derive(Debug, Clone)]
pub struct FileLoader {
    strategy: String,
    base_dir: PathBuf,
}

impl Default for FileLoader {
    fn default() -> Self {
        Self::new(PathBuf::new())
    }
}

impl FileLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            strategy: "file".to_string(),
            base_dir: base_dir.into(),
        }
    }

    /// Register under a different strategy name
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

fn type_hint(hint: &str) -> Option<&'static str> {
    match hint {
        "json" => Some("application/json"),
        "yaml" | "yml" => Some("application/yaml"),
        "text" => Some("text/plain"),
        "binary" => Some("application/octet-stream"),
        _ => None,
    }
}

#[async_trait]
impl ContentLoader for FileLoader {
    fn strategy(&self) -> &str {
        &self.strategy
    }

    async fn load(&self, argument: &str) -> Result<Content> {
        let (relative, hint) = match argument.rsplit_once("?type=") {
            Some((path, hint)) => (path, Some(hint)),
            None => (argument, None),
        };
        let file_path = self.base_dir.join(relative);

        let metadata = tokio::fs::metadata(&file_path)
            .await
            .map_err(|_| Error::file_not_found(relative))?;
        if !metadata.is_file() {
            return Err(Error::not_a_file(relative));
        }

        let content_type = match hint {
            Some(hint) => type_hint(hint)
                .ok_or_else(|| {
                    Error::directive_failed(
                        &self.strategy,
                        format!("Unknown type hint '{}'", hint),
                    )
                    .with_help("Use ?type=json, ?type=yaml, ?type=text or ?type=binary")
                })?
                .to_string(),
            None => mime_guess::from_path(&file_path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        };

        let bytes = tokio::fs::read(&file_path).await?;
        Ok(Content::new(content_type, Body::Bytes(bytes)))
    }
}

/// Fetches content over HTTP(S) (strategies `http` and `https`)
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpLoader {
    scheme: String,
    timeout: std::time::Duration,
}

#[cfg(feature = "http")]
impl HttpLoader {
    /// `scheme` is both the strategy name and the scheme prepended to bare hosts
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            timeout: std::time::Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Accepts `example.com/x`, `//example.com/x` and full `http(s)://` URLs
    pub fn normalize_url(&self, argument: &str) -> Result<String> {
        if argument.starts_with("http://") || argument.starts_with("https://") {
            return Ok(argument.to_string());
        }

        let clean = argument.strip_prefix("//").unwrap_or(argument);
        if clean.trim().is_empty() || clean.starts_with('/') {
            return Err(Error::directive_failed(
                &self.scheme,
                format!("Invalid URL '{}'", argument),
            ));
        }
        Ok(format!("{}://{}", self.scheme, clean))
    }
}

#[cfg(feature = "http")]
fn http_fetch(url: &str, timeout: std::time::Duration) -> Result<Content> {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();
    let agent: ureq::Agent = config.into();

    let response = agent.get(url).call().map_err(|e| match &e {
        ureq::Error::StatusCode(code) => {
            Error::http_request_failed(url, Some(*code), format!("HTTP {}", code))
        }
        ureq::Error::Timeout(kind) => {
            Error::http_request_failed(url, None, format!("Request timeout: {:?}", kind))
        }
        ureq::Error::Io(io_err) => {
            Error::http_request_failed(url, None, format!("Connection error: {}", io_err))
        }
        _ => Error::http_request_failed(url, None, e.to_string()),
    })?;

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let bytes = response
        .into_body()
        .read_to_vec()
        .map_err(|e| Error::http_request_failed(url, None, e.to_string()))?;

    Ok(Content::new(content_type, Body::Bytes(bytes)))
}

#[cfg(feature = "http")]
#[async_trait]
impl ContentLoader for HttpLoader {
    fn strategy(&self) -> &str {
        &self.scheme
    }

    async fn load(&self, argument: &str) -> Result<Content> {
        let url = self.normalize_url(argument)?;
        let timeout = self.timeout;
        log::debug!("Fetching {}", url);

        tokio::task::spawn_blocking(move || http_fetch(&url, timeout))
            .await
            .map_err(|e| Error::internal(format!("HTTP worker failed: {}", e)))?
    }
}


#[cfg(all(test, feature = "http"))]
mod http_loader_tests {
    use super::*;
    use crate::error::{DirectiveErrorKind, ErrorKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_url() {
        let loader = HttpLoader::new("https");
        assert_eq!(loader.normalize_url("example.com/a").unwrap(), "https://example.com/a");
        assert_eq!(loader.normalize_url("//example.com/a").unwrap(), "https://example.com/a");
        assert_eq!(
            loader.normalize_url("http://localhost:1234/a").unwrap(),
            "http://localhost:1234/a"
        );
        assert!(loader.normalize_url("///nohost").is_err());
        assert!(loader.normalize_url("").is_err());
    }

    #[tokio::test]
    async fn test_http_loader_fetches_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/config.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"key": "value", "number": 42}"#)
            .create_async()
            .await;

        let handler = LoaderDirective::new(HttpLoader::new("http"));
        let ctx = DirectiveContext::new(
            "http",
            format!("{}/config.json", server.url()),
            ArrayPath::parse("remote").unwrap(),
        );
        let tree = Value::mapping();
        let result = handler.handle(ctx, &tree, &Evaluation::default()).await.unwrap();

        let value = result.value.unwrap();
        assert_eq!(value.get_path("number").unwrap(), &Value::Integer(42));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_loader_status_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let loader = HttpLoader::new("http");
        let err = loader
            .load(&format!("{}/missing", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::Directive(DirectiveErrorKind::Http {
                status: Some(404),
                ..
            })
        ));
    }
}

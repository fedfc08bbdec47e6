//! The multi-pass resolution engine
//!
//! Each pass re-evaluates the tree, orders its expression leaves by
//! dependency, fills in every placeholder it can, and runs the directives it
//! collected as one concurrent batch. Passes repeat until no expression is
//! left (success), a pass makes no progress (stall), or the pass ceiling is
//! hit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::directive::{DirectiveContext, DirectiveHandler, DirectiveRegistry};
use crate::error::{Error, Result};
use crate::expression::Piece;
use crate::graph::DependencyGraph;
use crate::path::ArrayPath;
use crate::resolver::{Environment, ResolveRequest, Resolver, ResolverChain};
use crate::template;
use crate::tree::{self, Evaluation, ExpressionLeaf, LeafMetadata};
use crate::value::Value;

/// Safety ceiling on the number of passes per render
pub const DEFAULT_MAX_PASSES: usize = 20;

/// Options for building an [`Engine`]
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Renders that need more passes than this fail
    pub max_passes: usize,
    /// Directory the `file` directive resolves relative paths against
    /// (defaults to the working directory)
    pub base_dir: Option<PathBuf>,
    /// Environment served under `env.*` (defaults to the process environment)
    pub environment: Option<Environment>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            base_dir: None,
            environment: None,
        }
    }
}

impl EngineOptions {
    /// At least one pass always runs
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }
}

/// A bundle of resolvers and directives registered as a unit
#[derive(Clone, Default)]
pub struct Module {
    pub resolvers: Vec<Arc<dyn Resolver>>,
    pub directives: Vec<Arc<dyn DirectiveHandler>>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn with_directive(mut self, directive: Arc<dyn DirectiveHandler>) -> Self {
        self.directives.push(directive);
        self
    }

    fn validate(&self) -> Result<()> {
        for resolver in &self.resolvers {
            validate_name("Resolver", resolver.name())?;
        }
        for directive in &self.directives {
            validate_name("Directive", directive.strategy())?;
        }
        Ok(())
    }
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::registration(format!("{} name '{}' is invalid", what, name))
            .with_help("Names must be non-empty and use only letters, digits, '_' and '-'"))
    }
}

/// How the previous pass went, for stall detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    FirstRun,
    /// At least one directive resolved
    DirectivesProcessed,
    NoDirectivesProcessed,
}

/// A rendered tree plus how it got there
#[derive(Debug, Clone, PartialEq)]
pub struct RenderReport {
    pub value: Value,
    /// Passes run, including the final one that found nothing left to do
    pub passes: usize,
    /// Directive invocations across all passes
    pub directives_dispatched: usize,
}

/// What one pass managed to do for a single expression leaf
enum LeafOutcome {
    Value(Value),
    Directive(DirectiveContext),
    Unresolved,
}

/// Resolves templates into fully materialized trees
#[derive(Debug, Clone)]
pub struct Engine {
    resolvers: ResolverChain,
    directives: DirectiveRegistry,
    options: EngineOptions,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with the built-in resolvers and the `file` directive
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    /// An engine with the built-ins configured by `options`
    pub fn with_options(options: EngineOptions) -> Self {
        let environment = options
            .environment
            .clone()
            .unwrap_or_else(Environment::from_process);
        let base_dir = options.base_dir.clone().unwrap_or_default();

        Self {
            resolvers: ResolverChain::with_builtins(environment),
            directives: DirectiveRegistry::with_builtins(base_dir),
            options,
        }
    }

    /// An engine with nothing registered
    pub fn bare(options: EngineOptions) -> Self {
        Self {
            resolvers: ResolverChain::new(),
            directives: DirectiveRegistry::new(),
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn resolvers(&self) -> &ResolverChain {
        &self.resolvers
    }

    pub fn directives(&self) -> &DirectiveRegistry {
        &self.directives
    }

    /// Register a resolver at its order position
    pub fn add_resolver(&mut self, resolver: Arc<dyn Resolver>) -> Result<()> {
        validate_name("Resolver", resolver.name())?;
        self.resolvers.add(resolver);
        Ok(())
    }

    /// Remove a resolver by name; errors if none is registered
    pub fn remove_resolver(&mut self, name: &str) -> Result<()> {
        self.resolvers.remove(name)
    }

    /// Register a directive handler, replacing any with the same strategy
    pub fn add_directive(&mut self, directive: Arc<dyn DirectiveHandler>) -> Result<()> {
        validate_name("Directive", directive.strategy())?;
        self.directives.add(directive);
        Ok(())
    }

    /// Remove a directive handler; errors if none is registered
    pub fn remove_directive(&mut self, strategy: &str) -> Result<()> {
        self.directives.remove(strategy)
    }

    /// Register a module. Nothing is merged unless every entry is valid.
    pub fn add_module(&mut self, module: Module) -> Result<()> {
        self.add_modules(vec![module])
    }

    /// Register several modules. Nothing is merged unless every entry is valid.
    pub fn add_modules(&mut self, modules: Vec<Module>) -> Result<()> {
        for module in &modules {
            module.validate()?;
        }

        for module in modules {
            for resolver in module.resolvers {
                self.resolvers.add(resolver);
            }
            for directive in module.directives {
                self.directives.add(directive);
            }
        }
        Ok(())
    }

    /// Resolve every expression in `template`. The template itself is not modified.
    pub async fn render(&self, template: &Value) -> Result<Value> {
        Ok(self.render_report(template).await?.value)
    }

    /// Read a YAML or JSON template from disk and render it
    pub async fn render_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let template = template::from_file_async(path).await?;
        self.render(&template).await
    }

    /// Like [`Engine::render`], also reporting pass and directive counts
    pub async fn render_report(&self, template: &Value) -> Result<RenderReport> {
        let mut tree = template.clone();
        let mut outcome = PassOutcome::FirstRun;
        let mut previous_nodes: Option<IndexSet<String>> = None;
        let mut pending: IndexMap<String, DirectiveContext> = IndexMap::new();
        let mut directives_dispatched = 0;

        for pass in 1..=self.options.max_passes {
            let evaluation = tree::evaluate(&tree)?;
            if evaluation.has_errors() {
                return Err(Error::parse_failures(&evaluation.errors));
            }

            let graph = DependencyGraph::build(&evaluation);
            let order = graph.order()?;

            if graph.is_empty() {
                log::debug!("Pass {}: no expressions left", pass);
                return Ok(RenderReport {
                    value: tree,
                    passes: pass,
                    directives_dispatched,
                });
            }

            let nodes = graph.node_set();
            if outcome == PassOutcome::NoDirectivesProcessed && previous_nodes.as_ref() == Some(&nodes) {
                return Err(Error::dependencies_not_resolved(nodes.into_iter().collect()));
            }

            for sympath in &order {
                let Some(leaf) = evaluation.get(sympath).and_then(LeafMetadata::as_expression) else {
                    continue;
                };

                match self.resolve_leaf(&tree, &evaluation, leaf)? {
                    LeafOutcome::Value(value) => {
                        log::trace!("Resolved '{}'", sympath);
                        tree.set_at(&leaf.path, value)?;
                    }
                    LeafOutcome::Directive(context) => {
                        pending.insert(context.sympath.clone(), context);
                    }
                    LeafOutcome::Unresolved => {
                        log::trace!("'{}' has unresolved dependencies", sympath);
                    }
                }
            }

            // Carried directives whose leaf changed underneath them are dropped
            pending.retain(|sympath, _| evaluation.is_expression(sympath));
            let batch: Vec<DirectiveContext> = std::mem::take(&mut pending).into_values().collect();
            directives_dispatched += batch.len();

            log::debug!(
                "Pass {}: {} expression(s), {} directive(s) dispatched",
                pass,
                nodes.len(),
                batch.len()
            );

            let results = futures::future::try_join_all(
                batch
                    .into_iter()
                    .map(|context| self.directives.dispatch(context, &tree, &evaluation)),
            )
            .await?;

            let mut resolved = 0;
            for context in results {
                if context.resolved {
                    let value = context.value.unwrap_or_default();
                    tree.set_at(&context.path, value)?;
                    resolved += 1;
                } else {
                    log::trace!("Directive '{}' at '{}' re-queued", context.strategy, context.sympath);
                    pending.insert(context.sympath.clone(), context);
                }
            }

            outcome = if resolved > 0 {
                PassOutcome::DirectivesProcessed
            } else {
                PassOutcome::NoDirectivesProcessed
            };
            previous_nodes = Some(nodes);
        }

        let remaining = previous_nodes
            .map(|nodes| nodes.into_iter().collect())
            .unwrap_or_default();
        Err(Error::max_passes_exceeded(self.options.max_passes, remaining))
    }

    fn resolve_leaf(
        &self,
        tree: &Value,
        evaluation: &Evaluation,
        leaf: &ExpressionLeaf,
    ) -> Result<LeafOutcome> {
        let leaf_sympath = leaf.sympath();
        let branch_path = leaf.path.parent();
        let branch = branch_path.join();
        let mut values: IndexMap<&str, Value> = IndexMap::with_capacity(leaf.dependencies.len());

        for (target, target_path) in &leaf.dependencies {
            if evaluation.is_expression(target) {
                return Ok(LeafOutcome::Unresolved);
            }

            let request = ResolveRequest {
                tree,
                target,
                target_path,
                branch: &branch,
                branch_path: &branch_path,
                leaf_path: &leaf.path,
            };
            let Some(found) = self.resolvers.resolve(&request)? else {
                return Ok(LeafOutcome::Unresolved);
            };

            if found.value.is_branch() {
                return Err(Error::placeholder_is_branch(target, leaf_sympath));
            }
            if is_pending(evaluation, found.source.as_ref()) {
                return Ok(LeafOutcome::Unresolved);
            }
            values.insert(target, found.value);
        }

        let mut pieces = leaf.pieces.iter();
        let directive = match leaf.pieces.first() {
            Some(Piece::Directive(strategy)) => {
                pieces.next();
                Some(strategy)
            }
            _ => None,
        };

        // A lone placeholder keeps the type of what it references
        if directive.is_none() {
            if let [Piece::Placeholder(target)] = leaf.pieces.as_slice() {
                if let Some(value) = values.swap_remove(target.as_str()) {
                    return Ok(LeafOutcome::Value(value));
                }
            }
        }

        let mut joined = String::new();
        for piece in pieces {
            match piece {
                Piece::Content(text) => joined.push_str(text),
                Piece::Placeholder(target) => {
                    // Null contributes nothing to joined text
                    if let Some(value) = values.get(target.as_str()).filter(|v| !v.is_null()) {
                        joined.push_str(&value.to_string());
                    }
                }
                Piece::Directive(_) => {}
            }
        }

        Ok(match directive {
            Some(strategy) => {
                LeafOutcome::Directive(DirectiveContext::new(strategy, joined, leaf.path.clone()))
            }
            None => LeafOutcome::Value(Value::String(joined)),
        })
    }
}

fn is_pending(evaluation: &Evaluation, source: Option<&ArrayPath>) -> bool {
    source.is_some_and(|path| evaluation.is_expression(&path.join()))
}

/// Parse-only validation: every leaf parses and expressions form no cycle.
///
/// Runs no resolvers and dispatches no directives.
pub fn check(template: &Value) -> Result<Evaluation> {
    let evaluation = tree::evaluate(template)?;
    if evaluation.has_errors() {
        return Err(Error::parse_failures(&evaluation.errors));
    }
    DependencyGraph::build(&evaluation).order()?;
    Ok(evaluation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::FnDirective;
    use crate::error::{DirectiveErrorKind, ErrorKind};
    use crate::resolver::{FnResolver, Resolution};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> Engine {
        Engine::with_options(EngineOptions::default().with_environment(Environment::new()))
    }

    fn template(json: serde_json::Value) -> Value {
        json.into()
    }

    fn echo() -> Arc<dyn DirectiveHandler> {
        Arc::new(FnDirective::new("echo", |ctx: DirectiveContext, _: &Value| {
            let argument = ctx.expression.clone();
            Ok(ctx.resolved_with(argument))
        }))
    }

    #[tokio::test]
    async fn test_simple_reference() {
        let result = engine()
            .render(&template(serde_json::json!({ "foo": "bar", "hello": "{{foo}}" })))
            .await
            .unwrap();
        assert_eq!(result, template(serde_json::json!({ "foo": "bar", "hello": "bar" })));
    }

    #[tokio::test]
    async fn test_connection_string() {
        let result = engine()
            .render(&template(serde_json::json!({
                "host": "localhost",
                "mysql": { "port": 3306 },
                "pool": { "connection": "mysql://{{host}}:{{mysql.port}}" }
            })))
            .await
            .unwrap();
        assert_eq!(
            result.get_path("pool.connection").unwrap().as_str(),
            Some("mysql://localhost:3306")
        );
    }

    #[tokio::test]
    async fn test_chained_references_take_three_passes() {
        let report = engine()
            .render_report(&template(serde_json::json!({
                "foo": "world",
                "bar": "hello {{foo}}",
                "foobar": "hello, hello, {{bar}}"
            })))
            .await
            .unwrap();

        assert_eq!(report.passes, 3);
        assert_eq!(
            report.value,
            template(serde_json::json!({
                "foo": "world",
                "bar": "hello world",
                "foobar": "hello, hello, hello world"
            }))
        );
    }

    #[tokio::test]
    async fn test_directive_with_placeholder() {
        let mut engine = engine();
        engine.add_directive(echo()).unwrap();

        let result = engine
            .render(&template(serde_json::json!({ "leaf": "$echo:hi-{{foo}}", "foo": "there" })))
            .await
            .unwrap();
        assert_eq!(result.get_path("leaf").unwrap().as_str(), Some("hi-there"));
    }

    #[tokio::test]
    async fn test_cycle_fails() {
        let err = engine()
            .render(&template(serde_json::json!({ "a": "{{b}}", "b": "{{a}}" })))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircularReference);
    }

    #[tokio::test]
    async fn test_env_value_is_parsed() {
        let engine = Engine::with_options(
            EngineOptions::default().with_environment(Environment::new().with_var("MY_VAR", "42")),
        );
        let result = engine
            .render(&template(serde_json::json!({ "x": "{{env.MY_VAR}}" })))
            .await
            .unwrap();
        assert_eq!(result.get_path("x").unwrap(), &Value::Integer(42));
    }

    #[tokio::test]
    async fn test_env_value_in_text_is_stringified() {
        let engine = Engine::with_options(
            EngineOptions::default().with_environment(Environment::new().with_var("PORT", "8080")),
        );
        let result = engine
            .render(&template(serde_json::json!({ "url": "http://host:{{env.PORT}}/" })))
            .await
            .unwrap();
        assert_eq!(result.get_path("url").unwrap().as_str(), Some("http://host:8080/"));
    }

    #[tokio::test]
    async fn test_missing_path_stalls() {
        let report = engine()
            .render_report(&template(serde_json::json!({ "x": "{{nope.not.here}}" })))
            .await;
        let err = report.unwrap_err();

        assert_eq!(err.kind, ErrorKind::DependenciesNotResolved);
        assert_eq!(err.related, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_lower_order_resolver_wins() {
        let mut engine = engine();
        engine
            .add_resolver(Arc::new(FnResolver::new("override", 1, |req: &ResolveRequest<'_>| {
                Ok((req.target == "host").then(|| Resolution::new("from-override")))
            })))
            .unwrap();

        let result = engine
            .render(&template(serde_json::json!({ "host": "localhost", "url": "{{host}}" })))
            .await
            .unwrap();
        assert_eq!(result.get_path("url").unwrap().as_str(), Some("from-override"));
    }

    #[tokio::test]
    async fn test_absolute_resolution_wins_over_sibling() {
        let result = engine()
            .render(&template(serde_json::json!({
                "host": "root-host",
                "mysql": { "host": "db", "url": "mysql://{{host}}" }
            })))
            .await
            .unwrap();
        assert_eq!(result.get_path("mysql.url").unwrap().as_str(), Some("mysql://root-host"));
    }

    #[tokio::test]
    async fn test_relative_resolution_falls_back_to_sibling() {
        let result = engine()
            .render(&template(serde_json::json!({
                "mysql": { "user": "db", "url": "mysql://{{user}}@{{mysql.user}}" }
            })))
            .await
            .unwrap();
        assert_eq!(result.get_path("mysql.url").unwrap().as_str(), Some("mysql://db@db"));
    }

    #[tokio::test]
    async fn test_nested_key_named_like_its_placeholder() {
        let result = engine()
            .render(&template(serde_json::json!({ "host": "x", "mysql": { "host": "{{host}}" } })))
            .await
            .unwrap();
        assert_eq!(result, template(serde_json::json!({ "host": "x", "mysql": { "host": "x" } })));
    }

    #[tokio::test]
    async fn test_leaf_never_resolves_to_itself() {
        let err = engine()
            .render(&template(serde_json::json!({ "mysql": { "host": "{{host}}" } })))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DependenciesNotResolved);
        assert_eq!(err.related, vec!["mysql.host".to_string()]);
    }

    #[tokio::test]
    async fn test_colliding_symbolic_paths_fail() {
        let err = engine()
            .render(&template(serde_json::json!({
                "a": { "b": "{{c}}" },
                "a.b": "x",
                "c": "y"
            })))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPath);
        assert_eq!(err.path.as_deref(), Some("a.b"));
    }

    #[tokio::test]
    async fn test_null_joins_as_empty_text() {
        let result = engine()
            .render(&template(serde_json::json!({ "n": null, "s": "v={{n}}", "whole": "{{n}}" })))
            .await
            .unwrap();
        assert_eq!(result.get_path("s").unwrap().as_str(), Some("v="));
        assert_eq!(result.get_path("whole").unwrap(), &Value::Null);
    }

    #[tokio::test]
    async fn test_placeholder_to_branch_fails() {
        let err = engine()
            .render(&template(serde_json::json!({ "mysql": { "port": 1 }, "c": "{{mysql}}" })))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PlaceholderIsBranch);
        assert_eq!(err.path.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_unknown_directive_fails() {
        let err = engine()
            .render(&template(serde_json::json!({ "hello": "$notfound:blah" })))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::Directive(DirectiveErrorKind::HandlerNotFound { .. })
        ));
        assert_eq!(err.path.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_parse_errors_are_aggregated() {
        let err = engine()
            .render(&template(serde_json::json!({ "a": "{{x", "b": "ok", "c": "{{y" })))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.related, vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_root_must_be_mapping() {
        let err = engine().render(&Value::Sequence(vec![])).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::TreeNotObject);
    }

    #[tokio::test]
    async fn test_template_is_not_mutated() {
        let input = template(serde_json::json!({ "foo": "bar", "hello": "{{foo}}" }));
        let snapshot = input.clone();
        engine().render(&input).await.unwrap();
        assert_eq!(input, snapshot);
    }

    #[tokio::test]
    async fn test_typed_values_and_sequences() {
        let result = engine()
            .render(&template(serde_json::json!({
                "ports": [80, 443],
                "secure": "{{ports[1]}}",
                "enabled": true,
                "flags": ["{{enabled}}", "on-{{enabled}}"]
            })))
            .await
            .unwrap();
        assert_eq!(result.get_path("secure").unwrap(), &Value::Integer(443));
        assert_eq!(result.get_path("flags[0]").unwrap(), &Value::Bool(true));
        assert_eq!(result.get_path("flags[1]").unwrap().as_str(), Some("on-true"));
    }

    #[tokio::test]
    async fn test_escaped_placeholder_survives() {
        let result = engine()
            .render(&template(serde_json::json!({ "a": "\\{{b}} and {{b}}", "b": "x" })))
            .await
            .unwrap();
        assert_eq!(result.get_path("a").unwrap().as_str(), Some("\\{{b}} and x"));
    }

    #[tokio::test]
    async fn test_directive_output_is_reevaluated() {
        let mut engine = engine();
        engine
            .add_directive(Arc::new(FnDirective::new("wrap", |ctx: DirectiveContext, _: &Value| {
                let wrapped = format!("{{{{{}}}}} suffix", ctx.expression);
                Ok(ctx.resolved_with(wrapped))
            })))
            .unwrap();

        let report = engine
            .render_report(&template(serde_json::json!({ "leaf": "$wrap:foo", "foo": "there" })))
            .await
            .unwrap();
        assert_eq!(report.value.get_path("leaf").unwrap().as_str(), Some("there suffix"));
        assert_eq!(report.passes, 3);
    }

    #[tokio::test]
    async fn test_directive_can_return_structure() {
        let mut engine = engine();
        engine
            .add_directive(Arc::new(FnDirective::new("obj", |ctx: DirectiveContext, _: &Value| {
                Ok(ctx.resolved_with(serde_json::json!({ "greeting": "hi {{name}}" })))
            })))
            .unwrap();

        let result = engine
            .render(&template(serde_json::json!({ "name": "sam", "nested": "$obj:" })))
            .await
            .unwrap();
        assert_eq!(result.get_path("nested.greeting").unwrap().as_str(), Some("hi sam"));
    }

    #[tokio::test]
    async fn test_declining_directive_stalls() {
        let mut engine = engine();
        engine
            .add_directive(Arc::new(FnDirective::new("never", |ctx: DirectiveContext, _: &Value| {
                Ok(ctx)
            })))
            .unwrap();

        let err = engine
            .render(&template(serde_json::json!({ "leaf": "$never:x" })))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DependenciesNotResolved);
    }

    #[tokio::test]
    async fn test_declined_directive_is_retried_while_progressing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut engine = engine();
        engine.add_directive(echo()).unwrap();
        engine
            .add_directive(Arc::new(FnDirective::new("later", move |ctx: DirectiveContext, _: &Value| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(ctx)
                } else {
                    Ok(ctx.resolved_with("ready"))
                }
            })))
            .unwrap();

        let result = engine
            .render(&template(serde_json::json!({ "a": "$echo:one", "leaf": "$later:x" })))
            .await
            .unwrap();
        assert_eq!(result.get_path("leaf").unwrap().as_str(), Some("ready"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_runaway_directive_hits_pass_ceiling() {
        let mut engine = Engine::with_options(
            EngineOptions::default()
                .with_environment(Environment::new())
                .with_max_passes(5),
        );
        engine
            .add_directive(Arc::new(FnDirective::new("again", |ctx: DirectiveContext, _: &Value| {
                Ok(ctx.resolved_with("$again:more"))
            })))
            .unwrap();

        let err = engine
            .render(&template(serde_json::json!({ "leaf": "$again:start" })))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MaxPassesExceeded);
        assert_eq!(err.related, vec!["leaf".to_string()]);
    }

    #[tokio::test]
    async fn test_directives_in_one_pass_are_batched() {
        let mut engine = engine();
        engine.add_directive(echo()).unwrap();

        let report = engine
            .render_report(&template(serde_json::json!({
                "a": "$echo:one",
                "b": "$echo:two",
                "c": ["$echo:three"]
            })))
            .await
            .unwrap();
        assert_eq!(report.passes, 2);
        assert_eq!(report.directives_dispatched, 3);
        assert_eq!(report.value.get_path("c[0]").unwrap().as_str(), Some("three"));
    }

    #[tokio::test]
    async fn test_file_directive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("db.json"), r#"{"port": 5432}"#).unwrap();

        let engine = Engine::with_options(
            EngineOptions::default()
                .with_environment(Environment::new())
                .with_base_dir(dir.path()),
        );
        let result = engine
            .render(&template(serde_json::json!({
                "db": "$file:db.json",
                "url": "postgres://localhost:{{db.port}}"
            })))
            .await
            .unwrap();
        assert_eq!(
            result.get_path("url").unwrap().as_str(),
            Some("postgres://localhost:5432")
        );
    }

    #[tokio::test]
    async fn test_render_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        std::fs::write(&path, "name: app\ngreeting: 'hello {{name}}'\n").unwrap();

        let result = engine().render_file(&path).await.unwrap();
        assert_eq!(result.get_path("greeting").unwrap().as_str(), Some("hello app"));
    }

    #[test]
    fn test_registration_validates_names() {
        let mut engine = engine();
        let err = engine
            .add_resolver(Arc::new(FnResolver::new("bad name", 1, |_: &ResolveRequest<'_>| Ok(None))))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Registration);

        assert!(engine.remove_directive("nothere").is_err());
        assert!(engine.remove_resolver("nothere").is_err());
        engine.remove_resolver("environment").unwrap();
        assert_eq!(engine.resolvers().names(), vec!["absolute", "relative"]);
    }

    #[test]
    fn test_add_modules_is_all_or_nothing() {
        let mut engine = engine();
        let good = Module::new().with_directive(echo());
        let bad = Module::new().with_directive(Arc::new(FnDirective::new(
            "",
            |ctx: DirectiveContext, _: &Value| Ok(ctx),
        )));

        assert!(engine.add_modules(vec![good.clone(), bad]).is_err());
        assert!(!engine.directives().contains("echo"));

        engine.add_module(good).unwrap();
        assert!(engine.directives().contains("echo"));
    }

    #[test]
    fn test_check_reports_cycles_without_resolving() {
        let ok = check(&template(serde_json::json!({ "a": "{{env.NOPE}}", "b": "$file:x" })));
        assert_eq!(ok.unwrap().expression_count(), 2);

        let err = check(&template(serde_json::json!({ "a": "{{b}}", "b": "{{a}}" }))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircularReference);
    }
}

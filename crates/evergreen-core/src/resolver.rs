//! Resolver chain
//!
//! Resolvers turn a placeholder's symbolic path into a concrete value. They are
//! tried in ascending `order`; the first one that returns `Some` wins. `None`
//! means "not applicable, try the next one" and is never an error.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::path::{ArrayPath, Subpath};
use crate::value::Value;

/// Order of the built-in absolute resolver
pub const ABSOLUTE_ORDER: i32 = 10;
/// Order of the built-in relative resolver
pub const RELATIVE_ORDER: i32 = 20;
/// Order of the built-in environment resolver
pub const ENVIRONMENT_ORDER: i32 = 30;

/// Everything a resolver may look at for one placeholder
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    /// The tree as it stands in the current pass
    pub tree: &'a Value,
    /// Symbolic path named by the placeholder
    pub target: &'a str,
    /// The same path as selectors
    pub target_path: &'a ArrayPath,
    /// Symbolic path of the branch enclosing the leaf being resolved
    pub branch: &'a str,
    /// The same branch as selectors (empty for top-level leaves)
    pub branch_path: &'a ArrayPath,
    /// Location of the leaf being resolved
    pub leaf_path: &'a ArrayPath,
}

/// A value a resolver found
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub value: Value,
    /// Tree location the value was read from, if it came from the tree
    pub source: Option<ArrayPath>,
}

impl Resolution {
    /// A value that did not come from the tree
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            source: None,
        }
    }

    /// A value read from the tree at `path`
    pub fn from_tree(value: Value, path: ArrayPath) -> Self {
        Self {
            value,
            source: Some(path),
        }
    }
}

/// Trait for resolver implementations
pub trait Resolver: Send + Sync {
    /// Get the name of this resolver
    fn name(&self) -> &str;

    /// Chain position; lower runs first
    fn order(&self) -> i32;

    /// Look up the requested path.
    ///
    /// Return `Ok(None)` when the path is not something this resolver can supply.
    /// Any `Err` aborts the build.
    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Option<Resolution>>;
}

/// A simple function-based resolver
pub struct FnResolver<F>
where
    F: Fn(&ResolveRequest<'_>) -> Result<Option<Resolution>> + Send + Sync,
{
    name: String,
    order: i32,
    func: F,
}

impl<F> FnResolver<F>
where
    F: Fn(&ResolveRequest<'_>) -> Result<Option<Resolution>> + Send + Sync,
{
    /// Create a new function-based resolver
    pub fn new(name: impl Into<String>, order: i32, func: F) -> Self {
        Self {
            name: name.into(),
            order,
            func,
        }
    }
}

impl<F> Resolver for FnResolver<F>
where
    F: Fn(&ResolveRequest<'_>) -> Result<Option<Resolution>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Option<Resolution>> {
        (self.func)(request)
    }
}

/// Looks the target up from the tree root
#[derive(Debug, Clone, Default)]
pub struct AbsoluteResolver;

impl Resolver for AbsoluteResolver {
    fn name(&self) -> &str {
        "absolute"
    }

    fn order(&self) -> i32 {
        ABSOLUTE_ORDER
    }

    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Option<Resolution>> {
        found_or_none(
            request.tree.get_at(request.target_path),
            request.target_path.clone(),
        )
    }
}

/// Looks the target up inside the branch enclosing the leaf
#[derive(Debug, Clone, Default)]
pub struct RelativeResolver;

impl Resolver for RelativeResolver {
    fn name(&self) -> &str {
        "relative"
    }

    fn order(&self) -> i32 {
        RELATIVE_ORDER
    }

    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Option<Resolution>> {
        // Top-level leaves have nothing to be relative to
        if request.branch_path.is_empty() {
            return Ok(None);
        }

        let branch = request.tree.get_at(request.branch_path)?;
        found_or_none(
            branch.get_at(request.target_path),
            request.branch_path.concat(request.target_path),
        )
    }
}

fn found_or_none(lookup: Result<&Value>, source: ArrayPath) -> Result<Option<Resolution>> {
    match lookup {
        Ok(value) => Ok(Some(Resolution::from_tree(value.clone(), source))),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read-only snapshot of environment variables
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// An empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current process environment once
    pub fn from_process() -> Self {
        std::env::vars().collect()
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Resolves `env.NAME` from an injected [`Environment`]
#[derive(Debug, Clone, Default)]
pub struct EnvironmentResolver {
    environment: Environment,
}

impl EnvironmentResolver {
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }
}

impl Resolver for EnvironmentResolver {
    fn name(&self) -> &str {
        "environment"
    }

    fn order(&self) -> i32 {
        ENVIRONMENT_ORDER
    }

    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Option<Resolution>> {
        let var_name = match request.target_path.subpaths() {
            [env, Subpath::Field(name)] if env.is_named_field("env") => name,
            _ => return Ok(None),
        };

        Ok(self
            .environment
            .get(var_name)
            .map(|raw| Resolution::new(parse_env_value(raw))))
    }
}

/// Best-effort scalar parse: `42` becomes a number, `true` a boolean.
/// Anything else (including JSON objects and arrays) stays a string.
fn parse_env_value(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) if !json.is_object() && !json.is_array() => Value::from(json),
        _ => Value::String(raw.to_string()),
    }
}

/// Ordered list of resolvers
#[derive(Clone, Default)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl std::fmt::Debug for ResolverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.resolvers.iter().map(|r| (r.name(), r.order())))
            .finish()
    }
}

impl ResolverChain {
    /// Create a new empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chain with the absolute, relative and environment resolvers
    pub fn with_builtins(environment: Environment) -> Self {
        let mut chain = Self::new();
        chain.add(Arc::new(AbsoluteResolver));
        chain.add(Arc::new(RelativeResolver));
        chain.add(Arc::new(EnvironmentResolver::new(environment)));
        chain
    }

    /// Insert a resolver at its order position. Equal orders keep insertion order.
    pub fn add(&mut self, resolver: Arc<dyn Resolver>) {
        let at = self
            .resolvers
            .partition_point(|r| r.order() <= resolver.order());
        self.resolvers.insert(at, resolver);
    }

    /// Remove every resolver called `name`
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let before = self.resolvers.len();
        self.resolvers.retain(|r| r.name() != name);
        if self.resolvers.len() == before {
            return Err(Error::registration(format!(
                "Resolver '{}' does not exist",
                name
            )));
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolvers.iter().any(|r| r.name() == name)
    }

    /// Resolver names in chain order
    pub fn names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Ask each resolver in turn; first `Some` wins.
    ///
    /// A hit read from the leaf's own location is skipped: a leaf never
    /// supplies its own placeholder.
    pub fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Option<Resolution>> {
        for resolver in &self.resolvers {
            if let Some(found) = resolver.resolve(request)? {
                if found.source.as_ref() == Some(request.leaf_path) {
                    log::trace!(
                        "Resolver '{}' pointed '{}' back at its own leaf",
                        resolver.name(),
                        request.target
                    );
                    continue;
                }
                log::trace!(
                    "Resolver '{}' supplied '{}' for branch '{}'",
                    resolver.name(),
                    request.target,
                    request.branch
                );
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

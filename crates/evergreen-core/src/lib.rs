//! evergreen-core: Configuration template resolution engine
//!
//! This crate turns a template tree of literal values and expressions
//! (`{{path}}` placeholders and `$name:argument` directives) into a fully
//! materialized tree, resolving dependencies across multiple passes.
//!
//! # Example
//!
//! ```rust
//! use evergreen_core::{template, Engine};
//!
//! let yaml = r#"
//! host: localhost
//! mysql:
//!   port: 3306
//! pool:
//!   connection: "mysql://{{host}}:{{mysql.port}}"
//! "#;
//!
//! let template = template::from_yaml_str(yaml).unwrap();
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let rendered = runtime.block_on(Engine::new().render(&template)).unwrap();
//! assert_eq!(
//!     rendered.get_path("pool.connection").unwrap().as_str(),
//!     Some("mysql://localhost:3306")
//! );
//! ```

pub mod directive;
pub mod error;
pub mod expression;
pub mod graph;
pub mod path;
pub mod resolver;
pub mod template;
pub mod tree;
pub mod value;

mod engine;

pub use directive::{
    Body, Content, ContentLoader, DirectiveContext, DirectiveHandler, DirectiveRegistry,
    FileLoader, FnDirective, LoaderDirective,
};
#[cfg(feature = "http")]
pub use directive::HttpLoader;
pub use engine::{
    check, Engine, EngineOptions, Module, PassOutcome, RenderReport, DEFAULT_MAX_PASSES,
};
pub use error::{DirectiveErrorKind, Error, ErrorKind, Result};
pub use path::{ArrayPath, Subpath};
pub use resolver::{
    Environment, FnResolver, Resolution, ResolveRequest, Resolver, ResolverChain,
};
pub use value::Value;

//! Error types for evergreen
//!
//! Every failure that aborts a build is reported as a single structured
//! [`Error`]: what went wrong, which configuration leaf it concerns, and an
//! actionable help line. Temporary incompleteness (a dependency that is not
//! available yet, a directive that declined to resolve) is never an error.

use std::fmt;

/// Result type alias for evergreen operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for evergreen operations
#[derive(Debug, Clone)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Symbolic path of the offending leaf (e.g., "pool.connection")
    pub path: Option<String>,
    /// Other symbolic paths involved (stuck nodes, cycle members, failed leaves)
    pub related: Vec<String>,
    /// Actionable help message
    pub help: Option<String>,
    /// Underlying cause (as string for Clone compatibility)
    pub cause: Option<String>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// One or more leaves failed expression parsing, or a template failed to load
    Parse,
    /// The template root is not a mapping
    TreeNotObject,
    /// A symbolic or array path does not follow the path syntax
    InvalidPath,
    /// A path does not exist in the tree
    PathNotFound,
    /// Expression nodes depend on each other in a cycle
    CircularReference,
    /// A placeholder referenced a mapping or sequence
    PlaceholderIsBranch,
    /// Expression nodes stopped making progress between passes
    DependenciesNotResolved,
    /// The pass ceiling was reached before the tree converged
    MaxPassesExceeded,
    /// A directive could not be dispatched or its handler failed
    Directive(DirectiveErrorKind),
    /// A resolver, directive or module failed registration checks
    Registration,
    /// I/O error (template file unreadable, etc.)
    Io,
    /// Internal error (bug in evergreen)
    Internal,
}

/// Specific directive error categories
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveErrorKind {
    /// No handler is registered for the strategy
    HandlerNotFound { strategy: String },
    /// The handler returned an error
    Failed { strategy: String },
    /// Loaded content could not be parsed as its declared type
    ContentParse { content_type: String },
    /// File referenced by a directive does not exist
    FileNotFound { path: String },
    /// Path referenced by a directive is not a regular file
    NotAFile { path: String },
    /// HTTP request failed
    Http { url: String, status: Option<u16> },
}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            path: None,
            related: Vec::new(),
            help: None,
            cause: None,
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Parse)
        }
    }

    /// Create an aggregated error for every leaf that failed expression parsing
    pub fn parse_failures(failures: &[crate::tree::LeafParseError]) -> Self {
        let related: Vec<String> = failures.iter().map(|f| f.sympath.clone()).collect();
        let cause = failures
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("\n  ");
        Self {
            path: related.first().cloned(),
            related,
            help: Some("Close every '{{' with '}}' or escape it as '\\{{'".into()),
            cause: Some(cause),
            ..Self::new(ErrorKind::Parse)
        }
    }

    /// Create a tree-not-object error
    pub fn tree_not_object(actual: &str) -> Self {
        Self {
            help: Some("Templates must have a mapping at the root".into()),
            cause: Some(format!("Actual type: {}", actual)),
            ..Self::new(ErrorKind::TreeNotObject)
        }
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            help: Some("Paths look like 'a.b[2].c'".into()),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::InvalidPath)
        }
    }

    /// Create a path not found error
    pub fn path_not_found(path: impl Into<String>) -> Self {
        let path_str = path.into();
        Self {
            help: Some(format!("Check that '{}' exists in the template", path_str)),
            path: Some(path_str),
            ..Self::new(ErrorKind::PathNotFound)
        }
    }

    /// Create a circular reference error
    pub fn circular_reference(path: impl Into<String>, chain: Vec<String>) -> Self {
        let chain_str = chain.join(" → ");
        Self {
            path: Some(path.into()),
            related: chain,
            help: Some("Break the circular dependency by removing one of the references".into()),
            cause: Some(format!("Chain: {}", chain_str)),
            ..Self::new(ErrorKind::CircularReference)
        }
    }

    /// Create a placeholder-resolves-to-branch error
    pub fn placeholder_is_branch(placeholder: impl Into<String>, leaf: impl Into<String>) -> Self {
        let placeholder = placeholder.into();
        Self {
            path: Some(leaf.into()),
            related: vec![placeholder.clone()],
            help: Some("Placeholders must reference scalar values, not mappings or sequences".into()),
            cause: Some(format!("Offending placeholder: {}", placeholder)),
            ..Self::new(ErrorKind::PlaceholderIsBranch)
        }
    }

    /// Create an unresolved dependencies (stall) error
    pub fn dependencies_not_resolved(nodes: Vec<String>) -> Self {
        Self {
            cause: Some(format!("Stuck nodes: {}", nodes.join(", "))),
            path: nodes.first().cloned(),
            related: nodes,
            help: Some(
                "Check that every placeholder references an existing path, environment variable or registered resolver"
                    .into(),
            ),
            ..Self::new(ErrorKind::DependenciesNotResolved)
        }
    }

    /// Create a pass ceiling error
    pub fn max_passes_exceeded(max_passes: usize, nodes: Vec<String>) -> Self {
        Self {
            cause: Some(format!("Maximum number of passes reached: {}", max_passes)),
            related: nodes,
            help: Some(
                "A directive keeps producing new expressions; check its output or raise max_passes"
                    .into(),
            ),
            ..Self::new(ErrorKind::MaxPassesExceeded)
        }
    }

    /// Create a handler-not-found error
    pub fn handler_not_found(strategy: impl Into<String>, leaf: Option<String>) -> Self {
        let s = strategy.into();
        Self {
            path: leaf,
            help: Some(format!("Register a directive handler for '{}' or check for typos", s)),
            ..Self::new(ErrorKind::Directive(DirectiveErrorKind::HandlerNotFound {
                strategy: s,
            }))
        }
    }

    /// Create a directive handler failure error
    pub fn directive_failed(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        let s = strategy.into();
        Self {
            help: Some(format!("Check the '{}' directive handler implementation", s)),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Directive(DirectiveErrorKind::Failed { strategy: s }))
        }
    }

    /// Create a content parse error
    pub fn content_parse(content_type: impl Into<String>, message: impl Into<String>) -> Self {
        let ct = content_type.into();
        Self {
            help: Some(format!("Ensure the loaded content is valid {}", ct)),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Directive(DirectiveErrorKind::ContentParse {
                content_type: ct,
            }))
        }
    }

    /// Create a file not found error
    pub fn file_not_found(file_path: impl Into<String>) -> Self {
        Self {
            help: Some("Check that the file exists relative to the base directory".into()),
            ..Self::new(ErrorKind::Directive(DirectiveErrorKind::FileNotFound {
                path: file_path.into(),
            }))
        }
    }

    /// Create a not-a-file error
    pub fn not_a_file(file_path: impl Into<String>) -> Self {
        Self {
            help: Some("Directives can only load regular files".into()),
            ..Self::new(ErrorKind::Directive(DirectiveErrorKind::NotAFile {
                path: file_path.into(),
            }))
        }
    }

    /// Create an HTTP request failed error
    pub fn http_request_failed(
        url: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        let url_str = url.into();
        Self {
            help: Some(format!(
                "Check that the URL '{}' is accessible and returns valid content",
                url_str
            )),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Directive(DirectiveErrorKind::Http {
                url: url_str,
                status,
            }))
        }
    }

    /// Create a registration error
    pub fn registration(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Registration)
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Io)
        }
    }

    /// Create an internal error (bug in evergreen)
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            help: Some("This is likely a bug in evergreen. Please report it.".into()),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Internal)
        }
    }

    /// Add path context to the error
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// True for errors a resolver should treat as "not applicable"
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::PathNotFound
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Parse => write!(f, "Parse error")?,
            ErrorKind::TreeNotObject => write!(f, "Template root must be a mapping")?,
            ErrorKind::InvalidPath => write!(f, "Invalid path")?,
            ErrorKind::PathNotFound => write!(f, "Path not found")?,
            ErrorKind::CircularReference => {
                write!(f, "Could not build dependency graph: circular reference detected")?
            }
            ErrorKind::PlaceholderIsBranch => {
                write!(f, "Placeholders cannot resolve to sequences or mappings")?
            }
            ErrorKind::DependenciesNotResolved => write!(f, "Dependencies cannot be resolved")?,
            ErrorKind::MaxPassesExceeded => write!(f, "Resolution did not converge")?,
            ErrorKind::Directive(d) => match d {
                DirectiveErrorKind::HandlerNotFound { strategy } => {
                    write!(f, "No suitable directive handler found for {}", strategy)?
                }
                DirectiveErrorKind::Failed { strategy } => {
                    write!(f, "Directive '{}' failed", strategy)?
                }
                DirectiveErrorKind::ContentParse { content_type } => {
                    write!(f, "Could not parse content of type {}", content_type)?
                }
                DirectiveErrorKind::FileNotFound { path } => {
                    write!(f, "File not found: {}", path)?
                }
                DirectiveErrorKind::NotAFile { path } => write!(f, "Not a file: {}", path)?,
                DirectiveErrorKind::Http { url, status } => {
                    write!(f, "HTTP request failed: {}", url)?;
                    if let Some(s) = status {
                        write!(f, " (status {})", s)?;
                    }
                }
            },
            ErrorKind::Registration => write!(f, "Registration error")?,
            ErrorKind::Io => write!(f, "I/O error")?,
            ErrorKind::Internal => write!(f, "Internal error")?,
        }

        if let Some(path) = &self.path {
            write!(f, "\n  Path: {}", path)?;
        }

        if self.related.len() > 1 {
            write!(f, "\n  Related: {}", self.related.join(", "))?;
        }

        if let Some(cause) = &self.cause {
            write!(f, "\n  {}", cause)?;
        }

        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io(e.to_string())
    }
}

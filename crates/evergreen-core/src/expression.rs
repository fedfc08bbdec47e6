//! Expression parsing for string leaves
//!
//! Parses leaves like:
//! - `plain text` - a single content piece
//! - `{{database.host}}` - a placeholder referencing another path
//! - `mysql://{{host}}:{{mysql.port}}` - content mixed with placeholders
//! - `$file:./settings.json` - a directive followed by its argument
//! - `\{{literal}}` - an escaped placeholder, kept verbatim (backslash included)

use crate::error::{Error, Result};

/// Replaces `\{{` while the grammar runs so escaped placeholders are never tokenized
const ESCAPED_PLACEHOLDER_START: &str = "<|||";
/// Replaces the `}}` closing an escaped placeholder
const ESCAPED_PLACEHOLDER_END: &str = "|||>";

/// One typed piece of a parsed string leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    /// Literal text
    Content(String),
    /// A `{{path}}` reference (the trimmed symbolic path)
    Placeholder(String),
    /// A `$name:` directive marker (the strategy name). Always the first piece.
    Directive(String),
}

impl Piece {
    pub fn value(&self) -> &str {
        match self {
            Piece::Content(v) | Piece::Placeholder(v) | Piece::Directive(v) => v,
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, Piece::Content(_))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Piece::Placeholder(_))
    }

    pub fn is_directive(&self) -> bool {
        matches!(self, Piece::Directive(_))
    }
}

/// Parser for a single string leaf
pub struct ExpressionParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> ExpressionParser<'a> {
    /// Create a new parser for the given input
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Parse the entire input into pieces
    pub fn parse(&mut self) -> Result<Vec<Piece>> {
        let mut pieces = Vec::new();

        if let Some(directive) = self.parse_directive() {
            pieces.push(Piece::Directive(directive));
        }

        while !self.is_eof() {
            if self.check_placeholder_start() {
                pieces.push(self.parse_placeholder()?);
            } else {
                pieces.push(Piece::Content(self.collect_literal()));
            }
        }

        pieces.retain(|p| !p.value().is_empty());
        Ok(pieces)
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.pos += c.len_utf8();
        }
    }

    fn check_placeholder_start(&self) -> bool {
        self.current() == Some('{') && self.peek() == Some('{')
    }

    /// Recognize `$name:` (or `$name::`) at the very start of the input.
    ///
    /// Leaves the position untouched when no marker is present.
    fn parse_directive(&mut self) -> Option<String> {
        let rest = self.input.strip_prefix('$')?;
        let name_len = rest
            .find(|c: char| !is_directive_name_char(c))
            .unwrap_or(rest.len());
        if name_len == 0 || !rest[name_len..].starts_with(':') {
            return None;
        }

        let mut consumed = 1 + name_len + 1;
        if self.input[consumed..].starts_with(':') {
            consumed += 1;
        }
        self.pos = consumed;
        Some(rest[..name_len].to_string())
    }

    /// Collect literal text until the next placeholder or end
    fn collect_literal(&mut self) -> String {
        let mut result = String::new();

        while !self.is_eof() && !self.check_placeholder_start() {
            if let Some(c) = self.current() {
                result.push(c);
                self.advance();
            }
        }

        result
    }

    /// Parse a placeholder (starting at `{{`)
    fn parse_placeholder(&mut self) -> Result<Piece> {
        self.advance(); // {
        self.advance(); // {
        self.skip_whitespace();

        let mut path = String::new();
        while let Some(c) = self.current() {
            if is_placeholder_char(c) {
                path.push(c);
                self.advance();
            } else {
                break;
            }
        }

        self.skip_whitespace();

        match (self.current(), self.peek()) {
            (Some('}'), Some('}')) => {
                self.advance();
                self.advance();
            }
            (None, _) | (Some('}'), None) => {
                return Err(Error::parse("Unterminated placeholder: missing '}}'"));
            }
            (Some(c), _) => {
                return Err(Error::parse(format!(
                    "Invalid character '{}' in placeholder",
                    c
                )));
            }
        }

        if path.is_empty() {
            return Err(Error::parse("Empty placeholder"));
        }

        Ok(Piece::Placeholder(path))
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.current() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }
}

fn is_directive_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_placeholder_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.' | '[' | ']')
}

/// Does the string contain a complete `\{{ ... }}` sequence?
pub fn has_escaped_placeholder(input: &str) -> bool {
    match input.find("\\{{") {
        Some(start) => input[start..].contains("}}"),
        None => false,
    }
}

/// Swap every complete `\{{ ... }}` for sentinel-wrapped text the grammar ignores
pub fn escape_placeholders(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("\\{{") {
        let after = &rest[start + 3..];
        let Some(end) = after.find("}}") else {
            break;
        };
        result.push_str(&rest[..start]);
        result.push_str(ESCAPED_PLACEHOLDER_START);
        result.push_str(&after[..end]);
        result.push_str(ESCAPED_PLACEHOLDER_END);
        rest = &after[end + 2..];
    }

    result.push_str(rest);
    result
}

/// Inverse of [`escape_placeholders`]
pub fn unescape_placeholders(input: &str) -> String {
    input
        .replace(ESCAPED_PLACEHOLDER_START, "\\{{")
        .replace(ESCAPED_PLACEHOLDER_END, "}}")
}

/// Parse a string leaf into its ordered pieces
pub fn parse(input: &str) -> Result<Vec<Piece>> {
    if !has_escaped_placeholder(input) {
        return ExpressionParser::new(input).parse();
    }

    let escaped = escape_placeholders(input);
    let pieces = ExpressionParser::new(&escaped).parse()?;
    Ok(pieces
        .into_iter()
        .map(|piece| match piece {
            Piece::Content(text) => Piece::Content(unescape_placeholders(&text)),
            other => other,
        })
        .collect())
}

/// The directive name, if the pieces start with one
pub fn directive_of(pieces: &[Piece]) -> Option<&str> {
    match pieces.first() {
        Some(Piece::Directive(name)) => Some(name),
        _ => None,
    }
}

/// True if resolving these pieces needs anything beyond their literal text
pub fn is_expression(pieces: &[Piece]) -> bool {
    pieces.iter().any(|p| !p.is_content())
}

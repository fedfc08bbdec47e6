//! Loading templates from YAML and JSON and writing results back out

use std::path::Path;

use crate::error::{Error, Result};
use crate::value::Value;

/// Serialization format of a template or a rendered tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Yaml,
    Json,
}

impl Format {
    /// Pick the format from a file extension; anything that is not `.json` is YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

/// Parse a YAML template
pub fn from_yaml_str(yaml: &str) -> Result<Value> {
    serde_yaml::from_str(yaml).map_err(|e| Error::parse(format!("Invalid YAML: {}", e)))
}

/// Parse a JSON template
pub fn from_json_str(json: &str) -> Result<Value> {
    serde_json::from_str(json).map_err(|e| Error::parse(format!("Invalid JSON: {}", e)))
}

/// Parse a template in the given format
pub fn from_str(content: &str, format: Format) -> Result<Value> {
    match format {
        Format::Yaml => from_yaml_str(content),
        Format::Json => from_json_str(content),
    }
}

/// Read and parse a template file; the extension picks the format
pub fn from_file(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| read_error(path, e))?;
    from_str(&content, Format::from_path(path)).map_err(|e| e.with_path(path.display().to_string()))
}

/// Async variant of [`from_file`]
pub async fn from_file_async(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| read_error(path, e))?;
    from_str(&content, Format::from_path(path)).map_err(|e| e.with_path(path.display().to_string()))
}

fn read_error(path: &Path, e: std::io::Error) -> Error {
    Error::io(format!("Failed to read {}: {}", path.display(), e))
        .with_help("Check that the template file exists and is readable")
}

/// Serialize a tree in the given format
pub fn to_string(value: &Value, format: Format) -> Result<String> {
    match format {
        Format::Yaml => serde_yaml::to_string(value)
            .map_err(|e| Error::internal(format!("Failed to serialize YAML: {}", e))),
        Format::Json => serde_json::to_string_pretty(value)
            .map_err(|e| Error::internal(format!("Failed to serialize JSON: {}", e))),
    }
}

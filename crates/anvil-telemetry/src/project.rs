//! Build project file access.
//!
//! A build project is a TOML file whose `[properties]` table holds
//! build-wide settings. Property names are matched case-insensitively and
//! edits preserve the rest of the file's formatting and comments.

use std::path::{Path, PathBuf};

use toml_edit::{DocumentMut, Item, Value};

use crate::error::{Result, TelemetryError};

/// Table holding project properties.
pub const PROPERTIES_TABLE: &str = "properties";

/// A parsed project file that can be edited and written back.
#[derive(Debug, Clone)]
pub struct ProjectFile {
    path: PathBuf,
    document: DocumentMut,
}

impl ProjectFile {
    /// Read and parse the project file at `path`.
    pub fn parse(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let document = content
            .parse::<DocumentMut>()
            .map_err(|e| parse_error(path, e.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Evaluated value of a property, rendered as a string.
    pub fn property(&self, name: &str) -> Option<String> {
        let table = self.document.get(PROPERTIES_TABLE)?.as_table_like()?;
        table
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, item)| item.as_value())
            .and_then(render_value)
    }

    /// Set a property, reusing the spelling of an existing key if present.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        let path = self.path.clone();
        let table = self
            .document
            .entry(PROPERTIES_TABLE)
            .or_insert(toml_edit::table())
            .as_table_like_mut()
            .ok_or_else(|| parse_error(&path, format!("`{PROPERTIES_TABLE}` is not a table")))?;

        let key = table
            .iter()
            .map(|(key, _)| key)
            .find(|key| key.eq_ignore_ascii_case(name))
            .unwrap_or(name)
            .to_string();
        table.insert(&key, toml_edit::value(value));
        Ok(())
    }

    /// Write the document back to its path.
    pub fn save(&self) -> Result<()> {
        std::fs::write(&self.path, self.document.to_string())?;
        Ok(())
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.value().clone()),
        Value::Integer(i) => Some(i.value().to_string()),
        Value::Float(f) => Some(f.value().to_string()),
        Value::Boolean(b) => Some(b.value().to_string()),
        _ => None,
    }
}

fn parse_error(path: &Path, reason: String) -> TelemetryError {
    TelemetryError::ProjectParse {
        path: path.display().to_string(),
        reason,
    }
}

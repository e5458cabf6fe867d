//! Unix-like paths into JSON documents.
//!
//! `/oracle/stats/word_count` walks object keys from the document root;
//! numeric segments index into arrays. Segments use JSON-pointer escaping
//! (`~1` for `/`, `~0` for `~`), matching the diff output.

use std::fmt;

use serde_json::Value;

use crate::core::errors::{HarnessError, Result};

/// Parsed, validated path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataPath {
    raw: String,
    segments: Vec<String>,
}

impl DataPath {
    /// Parse a path. It must start with `/`.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(HarnessError::PathNotFound {
                path: raw.to_string(),
            });
        };
        let segments = rest
            .split('/')
            .map(|seg| seg.replace("~1", "/").replace("~0", "~"))
            .collect();
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn get<'a>(&self, doc: &'a Value) -> Result<&'a Value> {
        self.segments
            .iter()
            .try_fold(doc, |node, seg| child(node, seg))
            .ok_or_else(|| self.not_found())
    }

    pub fn get_mut<'a>(&self, doc: &'a mut Value) -> Result<&'a mut Value> {
        let mut node = doc;
        for seg in &self.segments {
            node = child_mut(node, seg).ok_or_else(|| self.not_found())?;
        }
        Ok(node)
    }

    /// Set the value at this path. The parent must exist; the last key is
    /// created on objects, array indices must already exist.
    pub fn set(&self, doc: &mut Value, value: Value) -> Result<()> {
        let (last, parent) = self.split_last();
        match parent.get_parent_mut(doc)? {
            Value::Object(map) => {
                map.insert(last.to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                let slot = index(last)
                    .and_then(|idx| items.get_mut(idx))
                    .ok_or_else(|| self.not_found())?;
                *slot = value;
                Ok(())
            }
            _ => Err(self.not_found()),
        }
    }

    /// Remove and return the value at this path.
    pub fn delete(&self, doc: &mut Value) -> Result<Value> {
        let (last, parent) = self.split_last();
        match parent.get_parent_mut(doc)? {
            Value::Object(map) => map.remove(last).ok_or_else(|| self.not_found()),
            Value::Array(items) => match index(last) {
                Some(idx) if idx < items.len() => Ok(items.remove(idx)),
                _ => Err(self.not_found()),
            },
            _ => Err(self.not_found()),
        }
    }

    /// True if the path resolves, including to `null`.
    #[must_use]
    pub fn exists(&self, doc: &Value) -> bool {
        self.get(doc).is_ok()
    }

    fn split_last(&self) -> (&str, ParentPath<'_>) {
        let (last, parent) = self
            .segments
            .split_last()
            .map_or(("", &[][..]), |(last, parent)| (last.as_str(), parent));
        (
            last,
            ParentPath {
                segments: parent,
                full: self,
            },
        )
    }

    fn not_found(&self) -> HarnessError {
        HarnessError::PathNotFound {
            path: self.raw.clone(),
        }
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

struct ParentPath<'a> {
    segments: &'a [String],
    full: &'a DataPath,
}

impl ParentPath<'_> {
    fn get_parent_mut<'d>(&self, doc: &'d mut Value) -> Result<&'d mut Value> {
        let mut node = doc;
        for seg in self.segments {
            node = child_mut(node, seg).ok_or_else(|| self.full.not_found())?;
        }
        Ok(node)
    }
}

fn index(seg: &str) -> Option<usize> {
    if seg.len() > 1 && seg.starts_with('0') {
        return None;
    }
    seg.parse().ok()
}

fn child<'a>(node: &'a Value, seg: &str) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => index(seg).and_then(|idx| items.get(idx)),
        _ => None,
    }
}

fn child_mut<'a>(node: &'a mut Value, seg: &str) -> Option<&'a mut Value> {
    match node {
        Value::Object(map) => map.get_mut(seg),
        Value::Array(items) => index(seg).and_then(|idx| items.get_mut(idx)),
        _ => None,
    }
}

//! Slash-delimited navigation over nested configuration mappings
//!
//! `PathAccessor` reads the loaded YAML document by paths such as
//! `/httpServer/threads/maximum`. Paths must start with `/`, must not end with
//! `/` (the root `/` excepted) and must not contain `//`.

use serde_yaml::{Mapping, Value};
use thiserror::Error;

/// Path navigation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Malformed path; a caller bug rather than a data error
    #[error("Invalid path [{0}]")]
    InvalidPath(String),

    /// `get_or_create` would have to descend into a non-mapping value
    #[error("path [{0}] isn't a mapping")]
    NotAMapping(String),
}

/// Accessor over a mapping-of-mappings rooted at `/`
#[derive(Debug, Clone, PartialEq)]
pub struct PathAccessor {
    root: Value,
}

impl Default for PathAccessor {
    fn default() -> Self {
        Self::new(Mapping::new())
    }
}

impl PathAccessor {
    /// Wrap a root mapping
    pub fn new(root: Mapping) -> Self {
        Self {
            root: Value::Mapping(root),
        }
    }

    /// Wrap a loaded document
    ///
    /// An empty document (`null`) behaves like an empty root mapping.
    pub fn from_value(value: Value) -> Result<Self, PathError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Mapping(map) => Ok(Self::new(map)),
            _ => Err(PathError::NotAMapping("/".to_string())),
        }
    }

    /// The whole backing document
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Consume the accessor, returning the backing document
    pub fn into_inner(self) -> Value {
        self.root
    }

    /// Look up the value at `path`
    ///
    /// Returns `Ok(None)` when a segment is missing or an intermediate
    /// segment is not a mapping.
    pub fn get(&self, path: &str) -> Result<Option<&Value>, PathError> {
        let segments = split_path(path)?;

        let mut current = &self.root;
        for segment in segments {
            match current {
                Value::Mapping(map) => match map.get(segment) {
                    Some(value) => current = value,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            }
        }

        Ok(Some(current))
    }

    /// Look up the value at `path`, creating missing mappings on the way
    ///
    /// The final segment is materialized with `factory` only when absent; an
    /// existing value is never overwritten.
    pub fn get_or_create<F>(&mut self, path: &str, factory: F) -> Result<&mut Value, PathError>
    where
        F: FnOnce() -> Value,
    {
        let segments = split_path(path)?;
        let last = segments.len();
        let mut factory = Some(factory);
        let mut walked = String::new();

        let mut current = &mut self.root;
        for (index, segment) in segments.into_iter().enumerate() {
            let parent = if walked.is_empty() {
                "/".to_string()
            } else {
                walked.clone()
            };
            walked.push('/');
            walked.push_str(segment);

            let map = match current {
                Value::Mapping(map) => map,
                _ => return Err(PathError::NotAMapping(parent)),
            };

            let key = Value::String(segment.to_string());
            current = if index + 1 == last {
                map.entry(key)
                    .or_insert_with(|| factory.take().map_or(Value::Null, |f| f()))
            } else {
                map.entry(key)
                    .or_insert_with(|| Value::Mapping(Mapping::new()))
            };
        }

        Ok(current)
    }

    /// Look up the value at `path`, failing with `error()` when absent
    pub fn get_or_throw<E, F>(&self, path: &str, error: F) -> Result<&Value, E>
    where
        E: From<PathError>,
        F: FnOnce() -> E,
    {
        self.get(path)?.ok_or_else(error)
    }

    /// Check whether `path` resolves to a value
    pub fn contains_path(&self, path: &str) -> Result<bool, PathError> {
        Ok(self.get(path)?.is_some())
    }
}

/// Validate `path` and split it into segments; `/` yields no segments
fn split_path(path: &str) -> Result<Vec<&str>, PathError> {
    let invalid = path.trim().is_empty()
        || !path.starts_with('/')
        || (path.len() > 1 && path.ends_with('/'))
        || path.contains("//");

    if invalid {
        return Err(PathError::InvalidPath(path.to_string()));
    }

    if path == "/" {
        return Ok(Vec::new());
    }

    Ok(path[1..].split('/').collect())
}

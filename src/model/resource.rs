//! Resources and property paths.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{ResourceId, Value};
use crate::{Error, Result};

/// One step of a property path: a map field or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Parsed form of `a.b[2].c`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PropertyPath {
    segments: SmallVec<[PathSegment; 4]>,
}

impl PropertyPath {
    pub fn parse(path: &str) -> Result<Self> {
        let mut segments = SmallVec::new();
        for part in path.split('.') {
            let (field, mut rest) = match part.find('[') {
                Some(idx) => (&part[..idx], &part[idx..]),
                None => (part, ""),
            };
            if field.is_empty() {
                return Err(Error::TypeError { expected: "property path".into(), got: format!("'{path}'") });
            }
            segments.push(PathSegment::Field(field.to_string()));
            while let Some(stripped) = rest.strip_prefix('[') {
                let end = stripped.find(']').ok_or_else(|| Error::TypeError {
                    expected: "closing ']' in property path".into(),
                    got: format!("'{path}'"),
                })?;
                let index = stripped[..end].parse::<usize>().map_err(|_| Error::TypeError {
                    expected: "list index".into(),
                    got: format!("'{}' in '{path}'", &stripped[..end]),
                })?;
                segments.push(PathSegment::Index(index));
                rest = &stripped[end + 1..];
            }
            if !rest.is_empty() {
                return Err(Error::TypeError { expected: "property path".into(), got: format!("'{path}'") });
            }
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The path without its last segment.
    pub fn parent(&self) -> Option<PropertyPath> {
        if self.segments.len() <= 1 {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                PathSegment::Field(name) if i == 0 => write!(f, "{name}")?,
                PathSegment::Field(name) => write!(f, ".{name}")?,
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

/// A concrete infrastructure object in the live graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Imported resources already exist; only user constraints may change them.
    #[serde(default)]
    pub imported: bool,
}

impl Resource {
    pub fn new(id: ResourceId) -> Self {
        Self { id, properties: BTreeMap::new(), imported: false }
    }

    pub fn imported(mut self) -> Self {
        self.imported = true;
        self
    }

    pub fn with_property(mut self, path: &str, value: impl Into<Value>) -> Self {
        // Builder form: an invalid path is a caller bug, surfaced on first read.
        let _ = self.set_property(path, value.into());
        self
    }

    /// Value at `path`, or `Null` when any step along it is missing.
    pub fn get_property(&self, path: &str) -> Result<Value> {
        let path = PropertyPath::parse(path)?;
        Ok(self.get_path(&path).cloned().unwrap_or(Value::Null))
    }

    pub fn get_path(&self, path: &PropertyPath) -> Option<&Value> {
        let mut segments = path.segments().iter();
        let mut current = match segments.next()? {
            PathSegment::Field(name) => self.properties.get(name)?,
            PathSegment::Index(_) => return None,
        };
        for seg in segments {
            current = match (seg, current) {
                (PathSegment::Field(name), Value::Map(m)) => m.get(name)?,
                (PathSegment::Index(idx), Value::List(items)) => items.get(*idx)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Whether every parent container of `path` exists.
    pub fn path_exists(&self, path: &str) -> bool {
        match PropertyPath::parse(path) {
            Ok(p) => match p.parent() {
                Some(parent) => self.get_path(&parent).is_some(),
                None => true,
            },
            Err(_) => false,
        }
    }

    /// Set the value at `path`, creating intermediate maps as needed.
    /// List indices must already exist.
    pub fn set_property(&mut self, path: &str, value: Value) -> Result<()> {
        let parsed = PropertyPath::parse(path)?;
        let slot = self.slot_mut(&parsed, path)?;
        *slot = value;
        Ok(())
    }

    /// Mutable access to the slot at `path`, creating it as `Null` when absent.
    pub fn property_mut(&mut self, path: &str) -> Result<&mut Value> {
        let parsed = PropertyPath::parse(path)?;
        self.slot_mut(&parsed, path)
    }

    fn slot_mut(&mut self, parsed: &PropertyPath, raw: &str) -> Result<&mut Value> {
        let mut segments = parsed.segments().iter();
        let Some(PathSegment::Field(first)) = segments.next() else {
            return Err(Error::TypeError { expected: "property path".into(), got: format!("'{raw}'") });
        };
        let mut current = self.properties.entry(first.clone()).or_insert(Value::Null);
        for seg in segments {
            current = match seg {
                PathSegment::Field(name) => {
                    if current.is_null() {
                        *current = Value::Map(BTreeMap::new());
                    }
                    match current {
                        Value::Map(m) => m.entry(name.clone()).or_insert(Value::Null),
                        other => {
                            return Err(Error::TypeError {
                                expected: format!("map at '{name}' in {raw}"),
                                got: other.type_name().into(),
                            });
                        }
                    }
                }
                PathSegment::Index(idx) => match current {
                    Value::List(items) => {
                        let len = items.len();
                        items.get_mut(*idx).ok_or_else(|| {
                            Error::NotFound(format!("index {idx} of {raw} (length {len})"))
                        })?
                    }
                    other => {
                        return Err(Error::TypeError {
                            expected: format!("list at [{idx}] in {raw}"),
                            got: other.type_name().into(),
                        });
                    }
                },
            };
        }
        Ok(current)
    }

    /// Remove the value at `path`. Removing a list element shifts later ones.
    pub fn remove_property(&mut self, path: &str) -> Result<Option<Value>> {
        let parsed = PropertyPath::parse(path)?;
        let Some(parent) = parsed.parent() else {
            let Some(PathSegment::Field(name)) = parsed.segments().first() else { return Ok(None) };
            return Ok(self.properties.remove(name));
        };
        let Some(last) = parsed.segments().last() else { return Ok(None) };
        let container = self.slot_mut(&parent, path)?;
        Ok(match (last, container) {
            (PathSegment::Field(name), Value::Map(m)) => m.remove(name),
            (PathSegment::Index(idx), Value::List(items)) if *idx < items.len() => Some(items.remove(*idx)),
            _ => None,
        })
    }

    /// Rewrite references to `old` inside every property value.
    pub fn replace_references(&mut self, old: &ResourceId, new: &ResourceId) -> bool {
        let mut changed = false;
        for value in self.properties.values_mut() {
            changed |= value.replace_resource_id(old, new);
        }
        changed
    }
}

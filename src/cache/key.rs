//! Cache key composition.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A primitive query parameter value.
///
/// Values of different types never compare equal, so `"1"` and `1` address
/// different entries. Floats compare by bit pattern.
#[derive(Debug, Clone)]
pub enum ParamValue {
  Str(String),
  Int(i64),
  Float(f64),
  Bool(bool),
}

impl PartialEq for ParamValue {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Self::Str(a), Self::Str(b)) => a == b,
      (Self::Int(a), Self::Int(b)) => a == b,
      (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
      (Self::Bool(a), Self::Bool(b)) => a == b,
      _ => false,
    }
  }
}

impl Eq for ParamValue {}

impl Hash for ParamValue {
  fn hash<H: Hasher>(&self, state: &mut H) {
    std::mem::discriminant(self).hash(state);
    match self {
      Self::Str(s) => s.hash(state),
      Self::Int(i) => i.hash(state),
      Self::Float(x) => x.to_bits().hash(state),
      Self::Bool(b) => b.hash(state),
    }
  }
}

impl fmt::Display for ParamValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Str(s) => write!(f, "{:?}", s),
      Self::Int(i) => write!(f, "{}", i),
      Self::Float(x) => write!(f, "{:?}", x),
      Self::Bool(b) => write!(f, "{}", b),
    }
  }
}

impl From<&str> for ParamValue {
  fn from(value: &str) -> Self {
    Self::Str(value.to_string())
  }
}

impl From<String> for ParamValue {
  fn from(value: String) -> Self {
    Self::Str(value)
  }
}

impl From<i64> for ParamValue {
  fn from(value: i64) -> Self {
    Self::Int(value)
  }
}

impl From<u32> for ParamValue {
  fn from(value: u32) -> Self {
    Self::Int(i64::from(value))
  }
}

impl From<f64> for ParamValue {
  fn from(value: f64) -> Self {
    Self::Float(value)
  }
}

impl From<bool> for ParamValue {
  fn from(value: bool) -> Self {
    Self::Bool(value)
  }
}

/// Query parameters attached to a cached lookup.
///
/// Entries are kept sorted by name, so insertion order never affects the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
    self.0.insert(name.into(), value.into());
    self
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Display for Params {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, (name, value)) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str("&")?;
      }
      write!(f, "{}={}", name, value)?;
    }
    Ok(())
  }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(
      iter
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    )
  }
}

/// Composite key addressing one cache entry.
///
/// The resource type is kept as its own field so type-wide clears match it
/// exactly instead of by string prefix (`event` never clears `events`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  resource_type: String,
  id: Option<String>,
  params: Option<Params>,
}

impl CacheKey {
  /// Compose a key. Empty parameter sets are treated as absent.
  pub fn new(resource_type: &str, id: Option<&str>, params: Option<&Params>) -> Self {
    Self {
      resource_type: resource_type.to_string(),
      id: id.map(String::from),
      params: params.filter(|p| !p.is_empty()).cloned(),
    }
  }

  pub fn resource_type(&self) -> &str {
    &self.resource_type
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.resource_type)?;
    if let Some(id) = &self.id {
      write!(f, ":{}", id)?;
    }
    if let Some(params) = &self.params {
      write!(f, "?{}", params)?;
    }
    Ok(())
  }
}

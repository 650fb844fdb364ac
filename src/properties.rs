use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A value held in a [`Properties`] map.
///
/// Scalars and strings are plain values; `Blob` and `Data` are shared by
/// `Arc`, so copying a `Value` aliases the payload rather than duplicating
/// it. Aliasing is therefore always explicit at the call site that chose a
/// `Blob`/`Data` entry.
#[derive(Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Blob(Arc<Vec<u8>>),
    Data(Arc<dyn Any + Send + Sync>),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Str(v) => write!(f, "Str({v:?})"),
            Value::Blob(b) => write!(f, "Blob({} bytes)", b.len()),
            Value::Data(_) => write!(f, "Data(..)"),
        }
    }
}

/// Typed key/value attribute store.
///
/// This is the narrow surface the frame core consumes: typed get/set for
/// scalars and strings, blob storage shared by `Arc`, opaque data slots, and
/// a bulk [`inherit`](Properties::inherit) that transfers scalar and string
/// entries only.
#[derive(Clone, Debug, Default)]
pub struct Properties {
    entries: HashMap<String, Value>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.set(key, Value::Int(value));
    }

    /// Integer view of an entry. `Float` entries truncate, absent or
    /// non-numeric entries read as 0.
    pub fn get_int(&self, key: &str) -> i64 {
        match self.entries.get(key) {
            Some(Value::Int(v)) => *v,
            Some(Value::Float(v)) => *v as i64,
            Some(Value::Str(s)) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn set_float(&mut self, key: impl Into<String>, value: f64) {
        self.set(key, Value::Float(value));
    }

    pub fn get_float(&self, key: &str) -> f64 {
        match self.entries.get(key) {
            Some(Value::Float(v)) => *v,
            Some(Value::Int(v)) => *v as f64,
            Some(Value::Str(s)) => s.parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, Value::Str(value.into()));
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn set_blob(&mut self, key: impl Into<String>, blob: Arc<Vec<u8>>) {
        self.set(key, Value::Blob(blob));
    }

    pub fn get_blob(&self, key: &str) -> Option<&Arc<Vec<u8>>> {
        match self.entries.get(key) {
            Some(Value::Blob(b)) => Some(b),
            _ => None,
        }
    }

    pub fn set_data(&mut self, key: impl Into<String>, data: Arc<dyn Any + Send + Sync>) {
        self.set(key, Value::Data(data));
    }

    /// Opaque data slot, downcast to the type the owner stored.
    pub fn get_data<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        match self.entries.get(key) {
            Some(Value::Data(d)) => d.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Raw opaque data slot without a downcast, for hand-off between
    /// collaborators that share a private convention.
    pub fn get_data_raw(&self, key: &str) -> Option<&Arc<dyn Any + Send + Sync>> {
        match self.entries.get(key) {
            Some(Value::Data(d)) => Some(d),
            _ => None,
        }
    }

    /// Bulk-copy scalar and string entries from `other`, overwriting
    /// duplicates. `Blob` and `Data` entries never transfer implicitly;
    /// a holder that wants to alias a payload copies that entry itself.
    pub fn inherit(&mut self, other: &Properties) {
        for (key, value) in &other.entries {
            match value {
                Value::Int(_) | Value::Float(_) | Value::Str(_) => {
                    self.entries.insert(key.clone(), value.clone());
                }
                Value::Blob(_) | Value::Data(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_get_set_roundtrip() {
        let mut p = Properties::new();
        p.set_int("count", 3);
        p.set_float("gain", 0.5);
        p.set_str("mode", "fill");
        assert_eq!(p.get_int("count"), 3);
        assert_eq!(p.get_float("gain"), 0.5);
        assert_eq!(p.get_str("mode"), Some("fill"));
    }

    #[test]
    fn numeric_views_coerce() {
        let mut p = Properties::new();
        p.set_float("x", 2.9);
        p.set_str("y", "7");
        assert_eq!(p.get_int("x"), 2);
        assert_eq!(p.get_int("y"), 7);
        assert_eq!(p.get_float("missing"), 0.0);
    }

    #[test]
    fn inherit_skips_blobs_and_data() {
        let mut src = Properties::new();
        src.set_int("a", 1);
        src.set_blob("payload", Arc::new(vec![1, 2, 3]));
        src.set_data("opaque", Arc::new(42u32));

        let mut dst = Properties::new();
        dst.inherit(&src);
        assert_eq!(dst.get_int("a"), 1);
        assert!(dst.get_blob("payload").is_none());
        assert!(dst.get_data::<u32>("opaque").is_none());
    }

    #[test]
    fn blob_copies_alias() {
        let mut p = Properties::new();
        p.set_blob("b", Arc::new(vec![9u8; 16]));
        let q = p.clone();
        assert!(Arc::ptr_eq(
            p.get_blob("b").unwrap(),
            q.get_blob("b").unwrap()
        ));
    }

    #[test]
    fn data_downcast_checks_type() {
        let mut p = Properties::new();
        p.set_data("d", Arc::new(String::from("hi")));
        assert!(p.get_data::<String>("d").is_some());
        assert!(p.get_data::<u64>("d").is_none());
    }
}

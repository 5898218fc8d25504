//! Flattening of structured fields into the string labels Loki indexes on.
use std::collections::HashMap;
use std::fmt;

/// The fields a caller attaches to a single log record.
pub type Fields = HashMap<String, Value>;

/// A scalar field value as it is handed to the provider.
///
/// Loki labels are plain strings, so every value is rendered with [`Value::to_label`] before it
/// is attached to a stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Kept apart from `Float` so it renders with single precision
    Float32(f32),
    /// A value of any other type, rendered when the field was created
    Other(String),
}

impl Value {
    /// Wrap anything printable which is not one of the scalar variants.
    pub fn other(value: impl fmt::Display) -> Self {
        Value::Other(value.to_string())
    }

    /// Render the value as a label value.
    ///
    /// Floats use the shortest representation which parses back to the same number, so `3.5`
    /// becomes `"3.5"` and `3.0` becomes `"3"`. Infinities are written as `"+Inf"` and `"-Inf"`.
    pub fn to_label(&self) -> String {
        match self {
            Value::String(value) | Value::Other(value) => value.clone(),
            Value::Bool(value) => value.to_string(),
            Value::Int(value) => value.to_string(),
            Value::UInt(value) => value.to_string(),
            Value::Float(value) => float_label(*value, value.to_string()),
            Value::Float32(value) => float_label(f64::from(*value), value.to_string()),
        }
    }
}

fn float_label(value: f64, rendered: String) -> String {
    if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        rendered
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_label())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

macro_rules! impl_from_int {
    ($variant:ident as $target:ty: $($source:ty),*) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Value::$variant(<$target>::from(value))
                }
            }
        )*
    };
}

impl_from_int!(Int as i64: i8, i16, i32, i64);
impl_from_int!(UInt as u64: u8, u16, u32, u64);

impl From<isize> for Value {
    fn from(value: isize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::UInt(value as u64)
    }
}

/// Merge several field maps into one new map of labels.
///
/// When a key shows up in more than one map, the value of the map which comes later wins.
/// The inputs are only read; empty maps do not change the result.
///
/// # Example
/// ```
/// use loki_provider::{merge_maps, Fields, Value};
///
/// let first: Fields = [("a".to_string(), Value::from(1)), ("b".to_string(), "hello".into())]
///     .into_iter()
///     .collect();
/// let second: Fields = [("b".to_string(), Value::from("world")), ("c".to_string(), 2.5.into())]
///     .into_iter()
///     .collect();
///
/// let merged = merge_maps([&first, &second]);
/// assert_eq!(merged["a"], "1");
/// assert_eq!(merged["b"], "world");
/// assert_eq!(merged["c"], "2.5");
/// ```
pub fn merge_maps<'a, I>(maps: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a Fields>,
{
    let mut result = HashMap::new();
    for map in maps {
        for (key, value) in map {
            result.insert(key.clone(), value.to_label());
        }
    }
    result
}

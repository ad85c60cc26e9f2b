use crate::context::StackContext;
use crate::error::ScriptError;
use crate::macros::Macro;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Value: What the language talks about
///
/// A closed set of variants. Operators pattern-match on the variant they
/// accept rather than inspecting types at run time.
///
/// Containers (text, bytes, lists, maps, macros, contexts) are behind `Arc`:
/// cloning a Value never deep-copies, so two references may alias one list.
/// Nothing mutates a container in place; operators that need a modified
/// container build a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent marker (unbound map key, `NULL` literal, missing sample)
    Null,

    /// Boolean value
    Bool(bool),

    /// Integer number (wrapping arithmetic)
    Int(i64),

    /// Floating-point number (IEEE 754 double precision)
    Float(f64),

    /// UTF-8 text
    String(Arc<str>),

    /// Byte sequence
    Bytes(Arc<[u8]>),

    /// Ordered sequence of values
    List(Arc<Vec<Value>>),

    /// Text-keyed mapping; iteration order is irrelevant
    Map(Arc<HashMap<String, Value>>),

    /// First-class program fragment
    Macro(Arc<Macro>),

    /// Snapshot of a stack's bindings and contents
    Context(Arc<StackContext>),
}

impl Value {
    /// Build a text value
    pub fn text(s: impl Into<Arc<str>>) -> Self {
        Value::String(s.into())
    }

    /// Build a byte-sequence value
    pub fn bytes(b: impl Into<Arc<[u8]>>) -> Self {
        Value::Bytes(b.into())
    }

    /// Build a list value
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    /// Build a map value
    pub fn map(entries: HashMap<String, Value>) -> Self {
        Value::Map(Arc::new(entries))
    }

    /// Wrap a macro
    pub fn macro_value(m: Macro) -> Self {
        Value::Macro(Arc::new(m))
    }

    /// Type name used in error messages and by scripts
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "LONG",
            Value::Float(_) => "DOUBLE",
            Value::String(_) => "STRING",
            Value::Bytes(_) => "BYTES",
            Value::List(_) => "LIST",
            Value::Map(_) => "MAP",
            Value::Macro(_) => "MACRO",
            Value::Context(_) => "CONTEXT",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Numeric value widened to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Numeric value truncated to an integer (saturating for out-of-range floats)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) => Some(f.trunc() as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

/// Extract an element from a mapping, list or byte sequence
///
/// - Map: the value bound to `key`, or `Value::Null` when unbound. Never fails,
///   whatever the key type (a non-text key is simply unbound).
/// - List / Bytes: `key` must be a number, truncated to an integer and used as
///   a zero-based index. Bytes are returned as unsigned integers.
///
/// `op` names the calling operator in errors.
pub fn extract(op: &str, container: &Value, key: &Value) -> Result<Value, ScriptError> {
    match container {
        Value::Map(map) => Ok(key
            .as_str()
            .and_then(|k| map.get(k))
            .cloned()
            .unwrap_or(Value::Null)),
        Value::List(items) => {
            let idx = index_of(op, key, items.len())?;
            Ok(items[idx].clone())
        }
        Value::Bytes(bytes) => {
            let idx = index_of(op, key, bytes.len())?;
            Ok(Value::Int(bytes[idx] as i64))
        }
        _ => Err(ScriptError::type_error(
            op,
            "operates on a map, list or byte array.",
        )),
    }
}

fn index_of(op: &str, key: &Value, len: usize) -> Result<usize, ScriptError> {
    let index = key.as_i64().ok_or_else(|| {
        ScriptError::type_error(op, "expects the key to be an integer when operating on a list.")
    })?;
    if index < 0 || index as u64 >= len as u64 {
        return Err(ScriptError::Index {
            op: op.to_string(),
            index,
            len,
        });
    }
    Ok(index as usize)
}

fn write_text(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in s.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("'")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) if x.is_nan() => f.write_str("NaN"),
            Value::Float(x) if x.is_infinite() => {
                f.write_str(if *x > 0.0 { "Infinity" } else { "-Infinity" })
            }
            // Keep a decimal point so the reader gives back a float
            Value::Float(x) if x.fract() == 0.0 && x.abs() < 1e16 => write!(f, "{:.1}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write_text(f, s),
            Value::Bytes(b) => {
                f.write_str("0x")?;
                for byte in b.iter() {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::List(items) => {
                f.write_str("[")?;
                for item in items.iter() {
                    write!(f, " {}", item)?;
                }
                f.write_str(" ]")
            }
            Value::Map(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                f.write_str("{")?;
                for k in keys {
                    f.write_str(" ")?;
                    write_text(f, k)?;
                    write!(f, " {}", map[k])?;
                }
                f.write_str(" }")
            }
            Value::Macro(m) => write!(f, "{}", m),
            Value::Context(ctx) => write!(
                f,
                "<context {} bindings, {} values>",
                ctx.bindings.len(),
                ctx.values.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sample_map() -> Value {
        let mut m = HashMap::new();
        m.insert("a".to_string(), Value::Int(1));
        m.insert("b".to_string(), Value::text("two"));
        Value::map(m)
    }

    #[test]
    fn test_extract_map_bound_and_unbound() {
        let map = sample_map();
        assert_eq!(extract("GET", &map, &Value::text("a")).unwrap(), Value::Int(1));
        assert_eq!(extract("GET", &map, &Value::text("zz")).unwrap(), Value::Null);
    }

    #[test]
    fn test_extract_map_never_fails_for_any_key_type() {
        let map = sample_map();
        let keys = [
            Value::Null,
            Value::Bool(true),
            Value::Int(0),
            Value::Float(1.5),
            Value::bytes(vec![1u8]),
            Value::list(vec![]),
            sample_map(),
        ];
        for key in keys.iter() {
            assert_eq!(extract("GET", &map, key).unwrap(), Value::Null);
        }
    }

    #[test]
    fn test_extract_list_in_and_out_of_range() {
        let list = Value::list(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        assert_eq!(extract("GET", &list, &Value::Int(0)).unwrap(), Value::Int(10));
        assert_eq!(extract("GET", &list, &Value::Int(2)).unwrap(), Value::Int(30));
        // Floats are truncated
        assert_eq!(extract("GET", &list, &Value::Float(1.9)).unwrap(), Value::Int(20));

        for bad in [-1i64, 3, 100] {
            let err = extract("GET", &list, &Value::Int(bad)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Index);
        }
    }

    #[test]
    fn test_extract_list_requires_numeric_key() {
        let list = Value::list(vec![Value::Int(10)]);
        let err = extract("GET", &list, &Value::text("0")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        assert!(err.to_string().starts_with("GET "));
    }

    #[test]
    fn test_extract_bytes_widens_unsigned() {
        let bytes = Value::bytes(vec![0x01u8, 0xff]);
        assert_eq!(extract("GET", &bytes, &Value::Int(1)).unwrap(), Value::Int(255));
        let err = extract("GET", &bytes, &Value::Int(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Index);
        let err = extract("GET", &bytes, &Value::Null).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn test_extract_rejects_other_containers() {
        for container in [Value::Int(3), Value::text("abc"), Value::Null] {
            let err = extract("GET", &container, &Value::Int(0)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Type);
            assert_eq!(err.operator(), Some("GET"));
        }
    }

    #[test]
    fn test_aliasing_shares_storage() {
        let list = Value::list(vec![Value::Int(1)]);
        let alias = list.clone();
        match (&list, &alias) {
            (Value::List(a), Value::List(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::text("it's").to_string(), "'it\\'s'");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Float(f64::INFINITY).to_string(), "Infinity");
        assert_eq!(Value::bytes(vec![0xabu8, 0x01]).to_string(), "0xab01");
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::Bool(false)]).to_string(),
            "[ 1 false ]"
        );
        assert_eq!(sample_map().to_string(), "{ 'a' 1 'b' 'two' }");
    }
}

use serde::{Deserialize, Serialize};

/// A typed job argument.
///
/// Serialized as `{"type": "<tag>", "value": <json>}` so the concrete numeric
/// and slice types survive a trip through JSON. Byte slices (`[]uint8`) are
/// written as integer arrays, never base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Arg {
    #[serde(rename = "bool")]
    Bool(bool),
    #[serde(rename = "int")]
    Int(i64),
    #[serde(rename = "int8")]
    Int8(i8),
    #[serde(rename = "int16")]
    Int16(i16),
    #[serde(rename = "int32")]
    Int32(i32),
    #[serde(rename = "int64")]
    Int64(i64),
    #[serde(rename = "uint")]
    Uint(u64),
    #[serde(rename = "uint8")]
    Uint8(u8),
    #[serde(rename = "uint16")]
    Uint16(u16),
    #[serde(rename = "uint32")]
    Uint32(u32),
    #[serde(rename = "uint64")]
    Uint64(u64),
    #[serde(rename = "float32")]
    Float32(f32),
    #[serde(rename = "float64")]
    Float64(f64),
    #[serde(rename = "string")]
    String(String),
    #[serde(rename = "[]bool")]
    BoolSlice(Vec<bool>),
    #[serde(rename = "[]int")]
    IntSlice(Vec<i64>),
    #[serde(rename = "[]int64")]
    Int64Slice(Vec<i64>),
    #[serde(rename = "[]uint")]
    UintSlice(Vec<u64>),
    #[serde(rename = "[]uint64")]
    Uint64Slice(Vec<u64>),
    #[serde(rename = "[]float64")]
    Float64Slice(Vec<f64>),
    #[serde(rename = "[]string")]
    StringSlice(Vec<String>),
    #[serde(rename = "[]uint8")]
    Bytes(Vec<u8>),
}

impl Arg {
    /// The wire tag of this argument
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Int8(_) => "int8",
            Self::Int16(_) => "int16",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Uint(_) => "uint",
            Self::Uint8(_) => "uint8",
            Self::Uint16(_) => "uint16",
            Self::Uint32(_) => "uint32",
            Self::Uint64(_) => "uint64",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::String(_) => "string",
            Self::BoolSlice(_) => "[]bool",
            Self::IntSlice(_) => "[]int",
            Self::Int64Slice(_) => "[]int64",
            Self::UintSlice(_) => "[]uint",
            Self::Uint64Slice(_) => "[]uint64",
            Self::Float64Slice(_) => "[]float64",
            Self::StringSlice(_) => "[]string",
            Self::Bytes(_) => "[]uint8",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any signed or unsigned integer that fits in an `i64`
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(v) | Self::Int64(v) => Some(v),
            Self::Int8(v) => Some(v.into()),
            Self::Int16(v) => Some(v.into()),
            Self::Int32(v) => Some(v.into()),
            Self::Uint8(v) => Some(v.into()),
            Self::Uint16(v) => Some(v.into()),
            Self::Uint32(v) => Some(v.into()),
            Self::Uint(v) | Self::Uint64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Whether the value can be written as JSON. NaN and infinities cannot;
    /// serde_json would turn them into `null`.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float32(v) => v.is_finite(),
            Self::Float64(v) => v.is_finite(),
            Self::Float64Slice(values) => values.iter().all(|v| v.is_finite()),
            _ => true,
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        Self::Uint64(value)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<String>> for Arg {
    fn from(value: Vec<String>) -> Self {
        Self::StringSlice(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(Arg::Int(7)).unwrap();
        assert_eq!(value, json!({"type": "int", "value": 7}));

        let value = serde_json::to_value(Arg::from("hello")).unwrap();
        assert_eq!(value, json!({"type": "string", "value": "hello"}));
    }

    #[test]
    fn test_bytes_are_integer_arrays() {
        let value = serde_json::to_value(Arg::Bytes(vec![1, 2, 255])).unwrap();
        assert_eq!(value, json!({"type": "[]uint8", "value": [1, 2, 255]}));

        let back: Arg = serde_json::from_value(value).unwrap();
        assert_eq!(back, Arg::Bytes(vec![1, 2, 255]));
    }

    #[test]
    fn test_type_is_preserved_for_same_json_number() {
        let a: Arg = serde_json::from_value(json!({"type": "uint16", "value": 12})).unwrap();
        let b: Arg = serde_json::from_value(json!({"type": "int64", "value": 12})).unwrap();
        assert_eq!(a, Arg::Uint16(12));
        assert_eq!(b, Arg::Int64(12));
        assert_eq!(a.as_i64(), b.as_i64());
        assert_eq!(a.type_name(), "uint16");
    }

    #[test]
    fn test_is_finite() {
        assert!(Arg::Float64(1.5).is_finite());
        assert!(Arg::Int(3).is_finite());
        assert!(!Arg::Float64(f64::NAN).is_finite());
        assert!(!Arg::Float32(f32::INFINITY).is_finite());
        assert!(!Arg::Float64Slice(vec![0.0, f64::NEG_INFINITY]).is_finite());
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let result: Result<Arg, _> = serde_json::from_value(json!({"type": "complex128", "value": 1}));
        assert!(result.is_err());
    }
}

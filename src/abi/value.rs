//! Dynamic host values.

/// A host-side value of any supported shape.
///
/// This is the common currency of the codec: typed Rust values convert to
/// and from it through [`WitType`](super::WitType), and WAVE text converts
/// through [`wave`](super::wave).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    S8(i8),
    U8(u8),
    S16(i16),
    U16(u16),
    S32(i32),
    U32(u32),
    S64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
    Handle(u32),
    /// Elements of a list or fixed-length array.
    List(Vec<Value>),
    /// Record fields in declaration order.
    Record(Vec<(String, Value)>),
    Tuple(Vec<Value>),
    Variant(String, Option<Box<Value>>),
    Enum(String),
    Option(Option<Box<Value>>),
    Result(Result<Option<Box<Value>>, Option<Box<Value>>>),
    /// Names of the flags that are set.
    Flags(Vec<String>),
}

impl Value {
    /// Short name of the value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::S8(_) => "s8",
            Value::U8(_) => "u8",
            Value::S16(_) => "s16",
            Value::U16(_) => "u16",
            Value::S32(_) => "s32",
            Value::U32(_) => "u32",
            Value::S64(_) => "s64",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Handle(_) => "handle",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Tuple(_) => "tuple",
            Value::Variant(..) => "variant",
            Value::Enum(_) => "enum",
            Value::Option(_) => "option",
            Value::Result(_) => "result",
            Value::Flags(_) => "flags",
        }
    }

    /// Build a record value from `(name, value)` pairs.
    pub fn record<N: Into<String>>(fields: impl IntoIterator<Item = (N, Value)>) -> Self {
        Value::Record(fields.into_iter().map(|(n, v)| (n.into(), v)).collect())
    }

    pub fn variant(case: impl Into<String>, payload: Option<Value>) -> Self {
        Value::Variant(case.into(), payload.map(Box::new))
    }

    pub fn some(inner: Value) -> Self {
        Value::Option(Some(Box::new(inner)))
    }

    pub fn ok(payload: Option<Value>) -> Self {
        Value::Result(Ok(payload.map(Box::new)))
    }

    pub fn err(payload: Option<Value>) -> Self {
        Value::Result(Err(payload.map(Box::new)))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }
}

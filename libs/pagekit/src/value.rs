//! Dynamic scalar values carried by criteria, cursors and materialized rows.
//!
//! `Value` is deliberately small: it covers what a relational column can hold
//! for filtering and ordering purposes. Enum constants travel as `String`
//! holding the constant name.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(BigDecimal),
    String(String),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl Value {
    /// Build a number, normalizing trailing zeros so equal numbers hash equally.
    #[must_use]
    pub fn number(n: BigDecimal) -> Self {
        Value::Number(n.normalized())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the value's kind, used in error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Uuid(_) => "uuid",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<&BigDecimal> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Order two values of the same kind. Values of different kinds, and
    /// `Null`, are not comparable.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Number(a), Value::Number(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Re-type a raw value (typically a string from a query parameter) into
    /// the kind of `template`. Only same-kind values and strings convert;
    /// everything else yields `None`.
    #[must_use]
    pub fn coerce_like(&self, template: &Value) -> Option<Value> {
        if std::mem::discriminant(self) == std::mem::discriminant(template) {
            return Some(self.clone());
        }
        match (self, template) {
            (Value::String(s), Value::Number(_)) => {
                BigDecimal::from_str(s.trim()).ok().map(Value::number)
            }
            (Value::String(s), Value::Bool(_)) => parse_bool(s).map(Value::Bool),
            (Value::String(s), Value::Uuid(_)) => Uuid::parse_str(s.trim()).ok().map(Value::Uuid),
            (Value::String(s), Value::DateTime(_)) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc))),
            (Value::String(s), Value::Date(_)) => s.trim().parse::<NaiveDate>().ok().map(Value::Date),
            (Value::String(s), Value::Time(_)) => s.trim().parse::<NaiveTime>().ok().map(Value::Time),
            _ => None,
        }
    }

    /// Loose equality used by in-memory evaluation: same-kind values compare
    /// directly, otherwise the raw side is re-typed against the other.
    #[must_use]
    pub fn loosely_equals(&self, other: &Value) -> bool {
        if self.is_null() || other.is_null() {
            return self.is_null() && other.is_null();
        }
        self.coerce_like(other)
            .is_some_and(|v| v.compare(other) == Some(Ordering::Equal))
    }

    /// Truthiness used by boolean criteria: `null`, `false`, zero, the empty
    /// string and `"false"`, `"0"`, `"no"`, `"off"` are false.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => !is_zero(n),
            Value::String(s) => !matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "" | "false" | "0" | "no" | "off"
            ),
            Value::Uuid(_) | Value::DateTime(_) | Value::Date(_) | Value::Time(_) => true,
        }
    }
}

fn is_zero(n: &BigDecimal) -> bool {
    *n == BigDecimal::from(0)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => match n.to_i64() {
                Some(i) if n.is_integer() => write!(f, "{i}"),
                _ => write!(f, "{}", n.normalized()),
            },
            Value::String(s) => f.write_str(s),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::DateTime(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::number(BigDecimal::from(v))
            }
        })*
    };
}

impl_from_int!(i32, i64, u32, u64);

/// Fails for NaN and the infinities, which no column value can represent.
impl TryFrom<f64> for Value {
    type Error = Error;

    fn try_from(v: f64) -> Result<Self, Error> {
        if !v.is_finite() {
            return Err(Error::InvalidArgument(format!("non-finite number {v}")));
        }
        // Go through the shortest round-trip text so 0.1 stays 0.1.
        BigDecimal::from_str(&v.to_string())
            .ok()
            .or_else(|| BigDecimal::from_f64(v))
            .map(Value::number)
            .ok_or_else(|| Error::InvalidArgument(format!("unrepresentable number {v}")))
    }
}

impl From<BigDecimal> for Value {
    fn from(v: BigDecimal) -> Self {
        Value::number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

fn conversion(expected: &'static str, got: &Value) -> Error {
    Error::Conversion {
        expected,
        got: got.kind_name(),
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match &v {
            Value::Number(n) if n.is_integer() => n.to_i64().ok_or_else(|| conversion("i64", &v)),
            _ => Err(conversion("i64", &v)),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match &v {
            Value::Number(n) => n.to_f64().ok_or_else(|| conversion("f64", &v)),
            _ => Err(conversion("f64", &v)),
        }
    }
}

impl TryFrom<Value> for BigDecimal {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Number(n) => Ok(n),
            other => Err(conversion("decimal", &other)),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Bool(b) => Ok(b),
            other => Err(conversion("bool", &other)),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::String(s) => Ok(s),
            other => Err(conversion("string", &other)),
        }
    }
}

impl TryFrom<Value> for Uuid {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Uuid(u) => Ok(u),
            Value::String(ref s) => Uuid::parse_str(s).map_err(|_| conversion("uuid", &v)),
            other => Err(conversion("uuid", &other)),
        }
    }
}

impl TryFrom<Value> for DateTime<Utc> {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::DateTime(dt) => Ok(dt),
            other => Err(conversion("datetime", &other)),
        }
    }
}

impl TryFrom<Value> for NaiveDate {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Date(d) => Ok(d),
            other => Err(conversion("date", &other)),
        }
    }
}

/// Positional decoding of a `Value` into a Rust type, used by projections.
pub trait FromValue: Sized {
    /// # Errors
    /// Returns `Error::Conversion` when the value has an incompatible kind.
    fn from_value(value: Value) -> Result<Self, Error>;
}

macro_rules! impl_from_value {
    ($($t:ty),*) => {
        $(impl FromValue for $t {
            fn from_value(value: Value) -> Result<Self, Error> {
                <$t>::try_from(value)
            }
        })*
    };
}

impl_from_value!(i64, f64, bool, String, Uuid, BigDecimal, DateTime<Utc>, NaiveDate);

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, Error> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, Error> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/* ---------- serde: plain JSON scalars ---------- */

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => match n.to_i64() {
                Some(i) if n.is_integer() => serializer.serialize_i64(i),
                _ => serializer.serialize_str(&n.normalized().to_string()),
            },
            other => serializer.collect_str(other),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON scalar (null, bool, number or string)")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Value, D::Error> {
        d.deserialize_any(ValueVisitor)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Value::try_from(v).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn numbers_normalize_for_equality() {
        let a = Value::number(BigDecimal::from_str("1.50").unwrap());
        let b = Value::try_from(1.5).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "1.5");
        assert_eq!(Value::from(100).to_string(), "100");
    }

    #[test]
    fn compare_is_kind_strict() {
        assert_eq!(Value::from(1).compare(&Value::from(2)), Some(Ordering::Less));
        assert_eq!(Value::from("a").compare(&Value::from(1)), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn coerce_like_parses_raw_strings() {
        assert_eq!(
            Value::from(" 42 ").coerce_like(&Value::from(0)),
            Some(Value::from(42))
        );
        assert_eq!(
            Value::from("2024-01-02").coerce_like(&Value::Date(NaiveDate::default())),
            NaiveDate::from_ymd_opt(2024, 1, 2).map(Value::Date)
        );
        assert_eq!(Value::from("abc").coerce_like(&Value::from(0)), None);
        assert_eq!(Value::from(7).coerce_like(&Value::from("x")), None);
        assert_eq!(Value::from(1).coerce_like(&Value::Bool(true)), None);
    }

    #[test]
    fn truthiness_convention() {
        for falsy in [
            Value::Null,
            Value::Bool(false),
            Value::from(0),
            Value::from(""),
            Value::from("false"),
            Value::from("0"),
            Value::from("OFF"),
        ] {
            assert!(!falsy.truthy(), "{falsy:?} should be falsy");
        }
        for truthy in [
            Value::Bool(true),
            Value::from(3),
            Value::try_from(-0.5).unwrap(),
            Value::from("true"),
            Value::from("1"),
        ] {
            assert!(truthy.truthy(), "{truthy:?} should be truthy");
        }
    }

    #[test]
    fn loose_equality_across_raw_input() {
        assert!(Value::from("5").loosely_equals(&Value::from(5)));
        assert!(!Value::from("5").loosely_equals(&Value::from(6)));
        assert!(Value::Null.loosely_equals(&Value::Null));
        assert!(!Value::Null.loosely_equals(&Value::from(0)));
    }

    #[test]
    fn serde_uses_plain_scalars() {
        let json = serde_json::to_string(&vec![
            Value::Null,
            Value::Bool(true),
            Value::from(12),
            Value::try_from(1.25).unwrap(),
            Value::from("x"),
        ])
        .unwrap();
        assert_eq!(json, r#"[null,true,12,"1.25","x"]"#);

        let back: Vec<Value> = serde_json::from_str("[null,false,3,2.5,\"s\"]").unwrap();
        assert_eq!(
            back,
            vec![
                Value::Null,
                Value::Bool(false),
                Value::from(3),
                Value::try_from(2.5).unwrap(),
                Value::from("s")
            ]
        );
    }

    #[test]
    fn try_from_round_trips_scalars() {
        assert_eq!(i64::try_from(Value::from(9)).unwrap(), 9);
        assert!(i64::try_from(Value::try_from(1.5).unwrap()).is_err());
        assert_eq!(Option::<i64>::from_value(Value::Null).unwrap(), None);
        assert_eq!(Option::<i64>::from_value(Value::from(4)).unwrap(), Some(4));
        assert_eq!(String::try_from(Value::from("q")).unwrap(), "q");
        assert!(matches!(
            bool::try_from(Value::from(1)),
            Err(Error::Conversion {
                expected: "bool",
                got: "number"
            })
        ));
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(Value::try_from(v), Err(Error::InvalidArgument(_))), "{v}");
        }
        assert_eq!(Value::try_from(0.1).unwrap().to_string(), "0.1");
    }
}

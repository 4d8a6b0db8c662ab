//! Knowledge records: the tagged value cells the knowledge map stores.
//!
//! A [`KnowledgeRecord`] pairs a [`KnowledgeValue`] payload with the logical
//! clock and write quality used for conflict resolution. Records are deep
//! copies: handing one out never aliases the map's storage.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, KarlResult};

/// Possible payloads a knowledge record can hold.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum KnowledgeValue {
    /// A key that has never been written. Coerces to integer 0.
    Uncreated,
    Integer(i64),
    IntegerArray(Vec<i64>),
    Double(f64),
    DoubleArray(Vec<f64>),
    String(String),
    Binary(Vec<u8>),
}

/// A numeric operand extracted from a value for arithmetic.
#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(i64),
    Float(f64),
}

impl KnowledgeValue {
    pub const fn is_uncreated(&self) -> bool {
        matches!(self, Self::Uncreated)
    }

    pub const fn is_integer(&self) -> bool {
        matches!(self, Self::Integer(_))
    }

    pub const fn is_double(&self) -> bool {
        matches!(self, Self::Double(_))
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub const fn is_array(&self) -> bool {
        matches!(self, Self::IntegerArray(_) | Self::DoubleArray(_))
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Uncreated => "uncreated",
            Self::Integer(_) => "integer",
            Self::IntegerArray(_) => "integer_array",
            Self::Double(_) => "double",
            Self::DoubleArray(_) => "double_array",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
        }
    }

    /// Truthiness: non-zero numerics, non-empty strings and binaries, and
    /// arrays with at least one non-zero element are true. `Uncreated` is
    /// always false.
    #[must_use]
    pub fn is_true(&self) -> bool {
        match self {
            Self::Uncreated => false,
            Self::Integer(v) => *v != 0,
            Self::Double(v) => *v != 0.0,
            Self::IntegerArray(vs) => vs.iter().any(|v| *v != 0),
            Self::DoubleArray(vs) => vs.iter().any(|v| *v != 0.0),
            Self::String(s) => !s.is_empty(),
            Self::Binary(b) => !b.is_empty(),
        }
    }

    /// Integer view of the value. Doubles truncate, numeric strings parse,
    /// arrays yield their first element, everything else is 0.
    #[must_use]
    pub fn as_integer(&self) -> i64 {
        match self {
            Self::Integer(v) => *v,
            #[allow(clippy::cast_possible_truncation)]
            Self::Double(v) => *v as i64,
            Self::IntegerArray(vs) => vs.first().copied().unwrap_or(0),
            #[allow(clippy::cast_possible_truncation)]
            Self::DoubleArray(vs) => vs.first().copied().unwrap_or(0.0) as i64,
            Self::String(s) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0),
            Self::Uncreated | Self::Binary(_) => 0,
        }
    }

    /// Double view of the value, with the same coercions as [`Self::as_integer`].
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_double(&self) -> f64 {
        match self {
            Self::Integer(v) => *v as f64,
            Self::Double(v) => *v,
            Self::IntegerArray(vs) => vs.first().copied().unwrap_or(0) as f64,
            Self::DoubleArray(vs) => vs.first().copied().unwrap_or(0.0),
            Self::String(s) => s.trim().parse::<f64>().ok().unwrap_or(0.0),
            Self::Uncreated | Self::Binary(_) => 0.0,
        }
    }

    fn numeric(&self) -> Numeric {
        match self {
            Self::Double(v) => Numeric::Float(*v),
            Self::DoubleArray(vs) => Numeric::Float(vs.first().copied().unwrap_or(0.0)),
            Self::String(s) => {
                let t = s.trim();
                if let Ok(i) = t.parse::<i64>() {
                    Numeric::Int(i)
                } else if let Ok(f) = t.parse::<f64>() {
                    Numeric::Float(f)
                } else {
                    Numeric::Int(0)
                }
            }
            other => Numeric::Int(other.as_integer()),
        }
    }

    /// Addition. Integer operands stay integer, any double operand promotes,
    /// and a string operand on either side concatenates.
    #[must_use]
    pub fn add(&self, rhs: &Self) -> Self {
        if self.is_string() || rhs.is_string() {
            return Self::String(format!("{self}{rhs}"));
        }
        match (self.numeric(), rhs.numeric()) {
            (Numeric::Int(a), Numeric::Int(b)) => Self::Integer(a.wrapping_add(b)),
            (a, b) => Self::Double(a.as_f64() + b.as_f64()),
        }
    }

    /// Subtraction with integer-preserving promotion.
    #[must_use]
    pub fn subtract(&self, rhs: &Self) -> Self {
        match (self.numeric(), rhs.numeric()) {
            (Numeric::Int(a), Numeric::Int(b)) => Self::Integer(a.wrapping_sub(b)),
            (a, b) => Self::Double(a.as_f64() - b.as_f64()),
        }
    }

    /// Multiplication with integer-preserving promotion.
    #[must_use]
    pub fn multiply(&self, rhs: &Self) -> Self {
        match (self.numeric(), rhs.numeric()) {
            (Numeric::Int(a), Numeric::Int(b)) => Self::Integer(a.wrapping_mul(b)),
            (a, b) => Self::Double(a.as_f64() * b.as_f64()),
        }
    }

    /// Division. Integer division truncates; dividing by zero (integer or
    /// double) is a [`EvalError::DivisionByZero`] failure.
    pub fn divide(&self, rhs: &Self) -> KarlResult<Self> {
        match (self.numeric(), rhs.numeric()) {
            (_, Numeric::Int(0)) => Err(EvalError::DivisionByZero.into()),
            (Numeric::Int(a), Numeric::Int(b)) => Ok(Self::Integer(a.wrapping_div(b))),
            (a, b) => {
                let d = b.as_f64();
                if d == 0.0 {
                    return Err(EvalError::DivisionByZero.into());
                }
                Ok(Self::Double(a.as_f64() / d))
            }
        }
    }

    /// Remainder, with the same zero-divisor failure as [`Self::divide`].
    pub fn modulo(&self, rhs: &Self) -> KarlResult<Self> {
        match (self.numeric(), rhs.numeric()) {
            (_, Numeric::Int(0)) => Err(EvalError::DivisionByZero.into()),
            (Numeric::Int(a), Numeric::Int(b)) => Ok(Self::Integer(a.wrapping_rem(b))),
            (a, b) => {
                let d = b.as_f64();
                if d == 0.0 {
                    return Err(EvalError::DivisionByZero.into());
                }
                Ok(Self::Double(a.as_f64() % d))
            }
        }
    }

    /// Arithmetic negation. Arrays negate element-wise; non-numeric strings
    /// coerce to 0.
    #[must_use]
    pub fn negate(&self) -> Self {
        match self {
            Self::Integer(v) => Self::Integer(v.wrapping_neg()),
            Self::Double(v) => Self::Double(-v),
            Self::IntegerArray(vs) => Self::IntegerArray(vs.iter().map(|v| -v).collect()),
            Self::DoubleArray(vs) => Self::DoubleArray(vs.iter().map(|v| -v).collect()),
            other => match other.numeric() {
                Numeric::Int(v) => Self::Integer(v.wrapping_neg()),
                Numeric::Float(v) => Self::Double(-v),
            },
        }
    }

    /// Cross-type ordering used by every KaRL comparison operator.
    ///
    /// String vs numeric parses the string as a number when possible and
    /// falls back to a lexicographic comparison against the numeric's
    /// rendering. Arrays compare element-wise, then by length.
    #[must_use]
    pub fn compare(&self, rhs: &Self) -> Ordering {
        match (self, rhs) {
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::String(s), other) | (other, Self::String(s)) => {
                let flipped = matches!(rhs, Self::String(_)) && !matches!(self, Self::String(_));
                let ord = match s.trim().parse::<f64>() {
                    Ok(parsed) => total_cmp(parsed, other.as_double()),
                    Err(_) => s.cmp(&other.to_string()),
                };
                if flipped {
                    ord.reverse()
                } else {
                    ord
                }
            }
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),
            (a, b) if a.is_array() || b.is_array() => compare_arrays(a, b),
            (a, b) => match (a.numeric(), b.numeric()) {
                (Numeric::Int(x), Numeric::Int(y)) => x.cmp(&y),
                (x, y) => total_cmp(x.as_f64(), y.as_f64()),
            },
        }
    }

    /// Equality under the same coercion rules as [`Self::compare`].
    #[must_use]
    pub fn loosely_equals(&self, rhs: &Self) -> bool {
        self.compare(rhs) == Ordering::Equal
    }
}

impl Numeric {
    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

fn total_cmp(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

#[allow(clippy::cast_precision_loss)]
fn array_elements(value: &KnowledgeValue) -> Vec<f64> {
    match value {
        KnowledgeValue::IntegerArray(vs) => vs.iter().map(|v| *v as f64).collect(),
        KnowledgeValue::DoubleArray(vs) => vs.clone(),
        other => vec![other.as_double()],
    }
}

fn compare_arrays(a: &KnowledgeValue, b: &KnowledgeValue) -> Ordering {
    let xs = array_elements(a);
    let ys = array_elements(b);
    for (x, y) in xs.iter().zip(ys.iter()) {
        let ord = total_cmp(*x, *y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    xs.len().cmp(&ys.len())
}

impl Default for KnowledgeValue {
    fn default() -> Self {
        Self::Uncreated
    }
}

impl std::fmt::Display for KnowledgeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uncreated => write!(f, "0"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
            Self::IntegerArray(vs) => {
                let parts: Vec<String> = vs.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(", "))
            }
            Self::DoubleArray(vs) => {
                let parts: Vec<String> = vs.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(", "))
            }
            Self::Binary(b) => write!(f, "binary[{}]", b.len()),
        }
    }
}

impl From<bool> for KnowledgeValue {
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i32> for KnowledgeValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i64> for KnowledgeValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for KnowledgeValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for KnowledgeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for KnowledgeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<i64>> for KnowledgeValue {
    fn from(v: Vec<i64>) -> Self {
        Self::IntegerArray(v)
    }
}

impl From<Vec<f64>> for KnowledgeValue {
    fn from(v: Vec<f64>) -> Self {
        Self::DoubleArray(v)
    }
}

impl From<Vec<u8>> for KnowledgeValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

/// A value cell plus the metadata conflict resolution runs on.
///
/// `clock` is the Lamport stamp of the write that produced the value and
/// `quality` is the writer's arbitration priority. Both are zero for records
/// synthesized during evaluation (literals, arithmetic results).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    /// The payload.
    pub value: KnowledgeValue,
    /// Lamport clock of the producing write.
    pub clock: u64,
    /// Write quality of the producing write.
    pub quality: u32,
}

impl KnowledgeRecord {
    /// A fresh record with zero clock and quality.
    #[must_use]
    pub fn new(value: KnowledgeValue) -> Self {
        Self {
            value,
            clock: 0,
            quality: 0,
        }
    }

    /// A record carrying explicit conflict-resolution metadata.
    #[must_use]
    pub const fn with_meta(value: KnowledgeValue, clock: u64, quality: u32) -> Self {
        Self {
            value,
            clock,
            quality,
        }
    }

    /// The record for a key that was never written.
    #[must_use]
    pub fn uncreated() -> Self {
        Self::new(KnowledgeValue::Uncreated)
    }

    /// Truthiness of the payload (see [`KnowledgeValue::is_true`]).
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.value.is_true()
    }

    /// Integer view of the payload.
    #[must_use]
    pub fn as_integer(&self) -> i64 {
        self.value.as_integer()
    }

    /// Double view of the payload.
    #[must_use]
    pub fn as_double(&self) -> f64 {
        self.value.as_double()
    }
}

impl From<KnowledgeValue> for KnowledgeRecord {
    fn from(v: KnowledgeValue) -> Self {
        Self::new(v)
    }
}

impl From<bool> for KnowledgeRecord {
    fn from(v: bool) -> Self {
        Self::new(v.into())
    }
}

impl From<i32> for KnowledgeRecord {
    fn from(v: i32) -> Self {
        Self::new(v.into())
    }
}

impl From<i64> for KnowledgeRecord {
    fn from(v: i64) -> Self {
        Self::new(v.into())
    }
}

impl From<f64> for KnowledgeRecord {
    fn from(v: f64) -> Self {
        Self::new(v.into())
    }
}

impl From<&str> for KnowledgeRecord {
    fn from(v: &str) -> Self {
        Self::new(v.into())
    }
}

impl From<String> for KnowledgeRecord {
    fn from(v: String) -> Self {
        Self::new(v.into())
    }
}

impl From<Vec<i64>> for KnowledgeRecord {
    fn from(v: Vec<i64>) -> Self {
        Self::new(v.into())
    }
}

impl From<Vec<f64>> for KnowledgeRecord {
    fn from(v: Vec<f64>) -> Self {
        Self::new(v.into())
    }
}

impl std::fmt::Display for KnowledgeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!KnowledgeValue::Uncreated.is_true());
        assert!(!KnowledgeValue::Integer(0).is_true());
        assert!(KnowledgeValue::Integer(-3).is_true());
        assert!(!KnowledgeValue::Double(0.0).is_true());
        assert!(KnowledgeValue::Double(0.5).is_true());
        assert!(!KnowledgeValue::String(String::new()).is_true());
        assert!(KnowledgeValue::String("x".into()).is_true());
        assert!(!KnowledgeValue::IntegerArray(vec![0, 0]).is_true());
        assert!(KnowledgeValue::IntegerArray(vec![0, 7]).is_true());
        assert!(!KnowledgeValue::Binary(Vec::new()).is_true());
    }

    #[test]
    fn integer_arithmetic_stays_integer() {
        let a = KnowledgeValue::Integer(8);
        let b = KnowledgeValue::Integer(3);
        assert_eq!(a.add(&b), KnowledgeValue::Integer(11));
        assert_eq!(a.subtract(&b), KnowledgeValue::Integer(5));
        assert_eq!(a.multiply(&b), KnowledgeValue::Integer(24));
        assert_eq!(a.divide(&b).unwrap(), KnowledgeValue::Integer(2));
        assert_eq!(a.modulo(&b).unwrap(), KnowledgeValue::Integer(2));
    }

    #[test]
    fn double_operand_promotes() {
        let a = KnowledgeValue::Integer(8);
        let b = KnowledgeValue::Double(0.5);
        assert_eq!(a.add(&b), KnowledgeValue::Double(8.5));
        assert_eq!(a.multiply(&b), KnowledgeValue::Double(4.0));
        assert_eq!(a.divide(&b).unwrap(), KnowledgeValue::Double(16.0));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let a = KnowledgeValue::Integer(1);
        assert!(a.divide(&KnowledgeValue::Integer(0)).is_err());
        assert!(a.modulo(&KnowledgeValue::Integer(0)).is_err());
        assert!(a.divide(&KnowledgeValue::Double(0.0)).is_err());
        assert!(a.divide(&KnowledgeValue::Uncreated).is_err());
    }

    #[test]
    fn string_addition_concatenates() {
        let a = KnowledgeValue::String("agent".into());
        let b = KnowledgeValue::Integer(3);
        assert_eq!(a.add(&b), KnowledgeValue::String("agent3".into()));
        assert_eq!(b.add(&a), KnowledgeValue::String("3agent".into()));
    }

    #[test]
    fn numeric_string_comparison_parses() {
        let s = KnowledgeValue::String("10".into());
        let n = KnowledgeValue::Integer(9);
        assert_eq!(s.compare(&n), Ordering::Greater);
        assert_eq!(n.compare(&s), Ordering::Less);
        assert!(s.loosely_equals(&KnowledgeValue::Double(10.0)));
    }

    #[test]
    fn non_numeric_string_comparison_is_lexicographic() {
        let s = KnowledgeValue::String("abc".into());
        let n = KnowledgeValue::Integer(5);
        // "abc" > "5" lexicographically.
        assert_eq!(s.compare(&n), Ordering::Greater);
        assert_eq!(n.compare(&s), Ordering::Less);
    }

    #[test]
    fn uncreated_compares_as_zero() {
        assert!(KnowledgeValue::Uncreated.loosely_equals(&KnowledgeValue::Integer(0)));
        assert_eq!(
            KnowledgeValue::Uncreated.compare(&KnowledgeValue::Integer(1)),
            Ordering::Less
        );
    }

    #[test]
    fn array_comparison_is_elementwise_then_length() {
        let a = KnowledgeValue::IntegerArray(vec![1, 2, 3]);
        let b = KnowledgeValue::IntegerArray(vec![1, 2, 4]);
        let c = KnowledgeValue::IntegerArray(vec![1, 2]);
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(a.compare(&c), Ordering::Greater);
        assert!(a.loosely_equals(&a.clone()));
    }

    #[test]
    fn negation() {
        assert_eq!(
            KnowledgeValue::Integer(4).negate(),
            KnowledgeValue::Integer(-4)
        );
        assert_eq!(
            KnowledgeValue::IntegerArray(vec![1, -2]).negate(),
            KnowledgeValue::IntegerArray(vec![-1, 2])
        );
        assert_eq!(KnowledgeValue::Uncreated.negate(), KnowledgeValue::Integer(0));
    }

    #[test]
    fn display_formatting() {
        assert_eq!(KnowledgeValue::Integer(42).to_string(), "42");
        assert_eq!(KnowledgeValue::Double(3.5).to_string(), "3.5");
        assert_eq!(KnowledgeValue::Double(3.0).to_string(), "3");
        assert_eq!(KnowledgeValue::String("hi".into()).to_string(), "hi");
        assert_eq!(
            KnowledgeValue::IntegerArray(vec![1, 2]).to_string(),
            "1, 2"
        );
        assert_eq!(KnowledgeValue::Uncreated.to_string(), "0");
    }

    #[test]
    fn record_carries_metadata() {
        let r = KnowledgeRecord::with_meta(KnowledgeValue::Integer(5), 10, 2);
        assert_eq!(r.clock, 10);
        assert_eq!(r.quality, 2);
        assert_eq!(r.as_integer(), 5);

        let fresh: KnowledgeRecord = 7i64.into();
        assert_eq!(fresh.clock, 0);
        assert_eq!(fresh.quality, 0);
    }

    #[test]
    fn record_serde_round_trip() {
        let r = KnowledgeRecord::with_meta(KnowledgeValue::DoubleArray(vec![1.5, 2.5]), 3, 1);
        let json = serde_json::to_string(&r).unwrap();
        let back: KnowledgeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}

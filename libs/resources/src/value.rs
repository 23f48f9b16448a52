//! Resource value kinds: fixed-point scalars, ranges, and sets.

use std::collections::BTreeSet;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of fixed-point sub-units per whole unit.
const MILLIS_PER_UNIT: i64 = 1000;

/// A fixed-point scalar amount with milli-unit precision.
///
/// Masters and agents express scalar resources as decimal numbers
/// (`cpus:0.5`); storing them as integer milli-units keeps arithmetic exact
/// across the add/subtract churn of allocation cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scalar(i64);

impl Scalar {
    /// The zero amount.
    pub const ZERO: Self = Self(0);

    /// Creates a scalar from raw milli-units.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Creates a scalar from whole units.
    #[must_use]
    pub const fn from_units(units: i64) -> Self {
        Self(units * MILLIS_PER_UNIT)
    }

    /// Creates a scalar from a floating-point amount, rounding to the
    /// nearest milli-unit.
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        Self((value * MILLIS_PER_UNIT as f64).round() as i64)
    }

    /// Returns the raw milli-unit count.
    #[must_use]
    pub const fn millis(&self) -> i64 {
        self.0
    }

    /// Returns the amount as a floating-point number of units.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / MILLIS_PER_UNIT as f64
    }

    /// Returns true if the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Returns the smaller of two scalars.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    /// Subtraction that floors at zero.
    #[must_use]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self((self.0 - other.0).max(0))
    }
}

impl Add for Scalar {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Scalar {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Scalar {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Scalar {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Scalar {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % MILLIS_PER_UNIT == 0 {
            write!(f, "{}", self.0 / MILLIS_PER_UNIT)
        } else {
            let mut s = format!("{:.3}", self.as_f64());
            while s.ends_with('0') {
                s.pop();
            }
            write!(f, "{s}")
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Ok(Self::from_f64(value))
    }
}

/// A closed interval of integers, e.g. one span of a port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Range {
    pub begin: u64,
    pub end: u64,
}

impl Range {
    /// Creates a range; `begin` must not exceed `end`.
    #[must_use]
    pub fn new(begin: u64, end: u64) -> Self {
        assert!(begin <= end, "range begin {begin} exceeds end {end}");
        Self { begin, end }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.begin, self.end)
    }
}

/// A normalized list of disjoint, ascending ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ranges(Vec<Range>);

impl Ranges {
    /// Creates a normalized range list: sorted, merged, deduplicated.
    #[must_use]
    pub fn new(mut ranges: Vec<Range>) -> Self {
        ranges.sort_by_key(|r| r.begin);

        let mut merged: Vec<Range> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                // Merge overlapping or adjacent spans.
                Some(last) if range.begin <= last.end.saturating_add(1) => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }

        Self(merged)
    }

    /// Returns the individual spans.
    #[must_use]
    pub fn spans(&self) -> &[Range] {
        &self.0
    }

    /// Returns true if no spans remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if every value of `other` is contained in `self`.
    #[must_use]
    pub fn contains(&self, other: &Ranges) -> bool {
        other
            .0
            .iter()
            .all(|r| self.0.iter().any(|s| s.begin <= r.begin && r.end <= s.end))
    }

    /// Returns the union of two range lists.
    #[must_use]
    pub fn union(&self, other: &Ranges) -> Ranges {
        let mut all = self.0.clone();
        all.extend_from_slice(&other.0);
        Ranges::new(all)
    }

    /// Returns `self` with every value of `other` removed.
    #[must_use]
    pub fn subtract(&self, other: &Ranges) -> Ranges {
        let mut result: Vec<Range> = Vec::new();

        for span in &self.0 {
            let mut remaining = vec![*span];

            for cut in &other.0 {
                let mut next = Vec::new();
                for piece in remaining {
                    if cut.end < piece.begin || cut.begin > piece.end {
                        next.push(piece);
                        continue;
                    }
                    if cut.begin > piece.begin {
                        next.push(Range::new(piece.begin, cut.begin - 1));
                    }
                    if cut.end < piece.end {
                        next.push(Range::new(cut.end + 1, piece.end));
                    }
                }
                remaining = next;
            }

            result.extend(remaining);
        }

        Ranges(result)
    }
}

impl fmt::Display for Ranges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, span) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{span}")?;
        }
        write!(f, "]")
    }
}

/// A resource value: scalar amount, integer ranges, or item set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Scalar(Scalar),
    Ranges(Ranges),
    Set(BTreeSet<String>),
}

impl Value {
    /// Returns true if the value holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Scalar(s) => s.is_zero(),
            Value::Ranges(r) => r.is_empty(),
            Value::Set(s) => s.is_empty(),
        }
    }

    /// Returns true if this is a scalar value.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Scalar(_))
    }

    /// Returns the scalar amount, or zero for non-scalar values.
    #[must_use]
    pub fn scalar(&self) -> Scalar {
        match self {
            Value::Scalar(s) => *s,
            _ => Scalar::ZERO,
        }
    }

    /// Returns true if both values are of the same kind.
    #[must_use]
    pub fn same_kind(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Returns true if `self` wholly contains `other`.
    #[must_use]
    pub fn contains(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => a >= b,
            (Value::Ranges(a), Value::Ranges(b)) => a.contains(b),
            (Value::Set(a), Value::Set(b)) => b.is_subset(a),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{s}"),
            Value::Ranges(r) => write!(f, "{r}"),
            Value::Set(s) => {
                write!(f, "{{")?;
                for (i, item) in s.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

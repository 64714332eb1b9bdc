use crate::domain::errors::ValidationError;
use serde::{Deserialize, Serialize};

/// Monetary amount in integer minor units (cents).
///
/// All ledger arithmetic happens on `Cents`; floating point only appears at the
/// boundary, through [`Cents::to_dollars`] and [`Cents::from_dollars`].
///
/// # Rounding
/// - cents → dollars is exact division by 100 (no truncation, no rounding).
/// - dollars → cents rounds half away from zero on the shortest decimal form of
///   the input (`1.005` → `101`, `2.675` → `268`, `-0.015` → `-2`), not on its
///   nearest binary value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cents(i64);

/// Largest magnitude that survives a cents → dollars → cents round trip through `f64`.
pub const MAX_EXACT_CENTS: i64 = 1 << 52;

impl Cents {
    pub const ZERO: Cents = Cents(0);

    pub const fn new(value: i64) -> Self {
        Cents(value)
    }

    pub const fn value(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `self * quantity`, or `None` on overflow.
    pub fn checked_mul(&self, quantity: i64) -> Option<Cents> {
        self.0.checked_mul(quantity).map(Cents)
    }

    pub fn checked_add(&self, other: Cents) -> Option<Cents> {
        self.0.checked_add(other.0).map(Cents)
    }

    pub fn checked_sub(&self, other: Cents) -> Option<Cents> {
        self.0.checked_sub(other.0).map(Cents)
    }

    /// Exact conversion to decimal dollars for the boundary.
    pub fn to_dollars(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Converts a decimal dollar amount into cents, rounding half away from zero.
    ///
    /// # Errors
    /// Returns `ValidationError::MustBeFinite` for NaN/infinite input and
    /// `ValidationError::InvalidPrice` when the amount is outside the exact range.
    pub fn from_dollars(dollars: f64) -> Result<Cents, ValidationError> {
        if !dollars.is_finite() {
            return Err(ValidationError::MustBeFinite);
        }
        let out_of_range = || {
            ValidationError::InvalidPrice(format!("{} is outside the supported range", dollars))
        };
        if (dollars * 100.0).abs() > MAX_EXACT_CENTS as f64 {
            return Err(out_of_range());
        }

        // Display on f64 is the shortest decimal that reads back to the same
        // value, never in exponent form.
        let text = dollars.abs().to_string();
        let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));
        let digit = |i: usize| {
            fraction
                .as_bytes()
                .get(i)
                .map(|b| i64::from(b - b'0'))
                .unwrap_or(0)
        };

        let whole: i64 = whole.parse().map_err(|_| out_of_range())?;
        let mut cents = whole * 100 + digit(0) * 10 + digit(1);
        if digit(2) >= 5 {
            cents += 1;
        }
        Ok(Cents(if dollars < 0.0 { -cents } else { cents }))
    }
}

impl std::fmt::Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl std::ops::Add for Cents {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Cents(self.0 + other.0)
    }
}

impl std::ops::Sub for Cents {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Cents(self.0 - other.0)
    }
}

impl std::iter::Sum for Cents {
    fn sum<I: Iterator<Item = Cents>>(iter: I) -> Self {
        iter.fold(Cents::ZERO, |acc, c| acc + c)
    }
}

/// Rounds a derived ratio (percentages) to two decimals, half away from zero.
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}

/// `numerator / denominator * 100`, reporting 0 when the denominator is zero.
pub fn percent_of(numerator: Cents, denominator: Cents) -> f64 {
    if denominator.is_zero() {
        return 0.0;
    }
    round2(numerator.value() as f64 / denominator.value() as f64 * 100.0)
}

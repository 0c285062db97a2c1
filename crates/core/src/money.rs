//! Exact fixed-point monetary amounts.
//!
//! Every amount in the ledger is a [`Money`]: a decimal held at exactly
//! [`Money::SCALE`] fractional digits. Binary floating point never appears,
//! including at serialization boundaries (amounts serialize as strings).
//!
//! The representable range matches a `NUMERIC(28,8)` column: at most 20 integer
//! digits. Anything that would leave that range is rejected instead of rounded.

use core::cmp::Ordering;
use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::value_object::ValueObject;

/// Signed monetary amount with fixed scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Money(Decimal);

impl ValueObject for Money {}

/// Largest precision accepted for a percentage rate.
const MAX_RATE_SCALE: u32 = 10;

impl Money {
    /// Number of fractional digits carried by every amount.
    pub const SCALE: u32 = 8;

    /// Maximum number of integer digits (`NUMERIC(28,8)`).
    pub const MAX_INTEGER_DIGITS: u32 = 20;

    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Exclusive upper bound on the magnitude of an amount (10^20).
    fn limit() -> Decimal {
        Decimal::from_i128_with_scale(
            10i128.pow(Self::MAX_INTEGER_DIGITS + Self::SCALE),
            Self::SCALE,
        )
    }

    fn canonical(value: Decimal) -> Decimal {
        if value.is_zero() {
            return Decimal::new(0, Self::SCALE);
        }
        let mut value = value;
        value.rescale(Self::SCALE);
        value
    }

    /// Build from a decimal, rejecting extra precision or out-of-range values.
    pub fn from_decimal(value: Decimal) -> CoreResult<Self> {
        let normalized = value.normalize();
        if normalized.scale() > Self::SCALE {
            return Err(CoreError::invalid_amount(format!(
                "{value} has more than {} fractional digits",
                Self::SCALE
            )));
        }
        if normalized.abs() >= Self::limit() {
            return Err(CoreError::invalid_amount(format!(
                "{value} exceeds {} integer digits",
                Self::MAX_INTEGER_DIGITS
            )));
        }
        Ok(Self(Self::canonical(normalized)))
    }

    /// Build from an amount expressed in hundredths (e.g. cents).
    pub fn from_cents(cents: i64) -> Self {
        Self(Self::canonical(Decimal::new(cents, 2)))
    }

    /// Parse a plain decimal string such as `"100"`, `"-12.5"` or `"0.00000001"`.
    ///
    /// Exponents, separators, whitespace and more than [`Money::SCALE`]
    /// fractional digits are rejected with [`CoreError::InvalidAmount`].
    pub fn parse(input: &str) -> CoreResult<Self> {
        let digits = input.strip_prefix('-').unwrap_or(input);
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (digits, None),
        };

        let well_formed = !int_part.is_empty()
            && int_part.bytes().all(|b| b.is_ascii_digit())
            && frac_part.is_none_or(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()));
        if !well_formed {
            return Err(CoreError::invalid_amount(format!("malformed amount '{input}'")));
        }
        if frac_part.is_some_and(|f| f.len() > Self::SCALE as usize) {
            return Err(CoreError::invalid_amount(format!(
                "'{input}' has more than {} fractional digits",
                Self::SCALE
            )));
        }
        if int_part.trim_start_matches('0').len() > Self::MAX_INTEGER_DIGITS as usize {
            return Err(CoreError::invalid_amount(format!(
                "'{input}' exceeds {} integer digits",
                Self::MAX_INTEGER_DIGITS
            )));
        }

        let value = Decimal::from_str_exact(input)
            .map_err(|e| CoreError::invalid_amount(format!("'{input}': {e}")))?;
        Self::from_decimal(value)
    }

    /// The underlying decimal, always at [`Money::SCALE`].
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    pub fn abs(&self) -> Self {
        Self(Self::canonical(self.0.abs()))
    }

    pub fn negate(&self) -> Self {
        Self(Self::canonical(-self.0))
    }

    pub fn compare(&self, other: &Money) -> Ordering {
        self.cmp(other)
    }

    pub fn checked_add(&self, other: Money) -> CoreResult<Self> {
        let sum = self
            .0
            .checked_add(other.0)
            .ok_or(CoreError::Overflow("money addition"))?;
        Self::within_range(sum, "money addition")
    }

    pub fn checked_sub(&self, other: Money) -> CoreResult<Self> {
        let diff = self
            .0
            .checked_sub(other.0)
            .ok_or(CoreError::Overflow("money subtraction"))?;
        Self::within_range(diff, "money subtraction")
    }

    /// Sum a sequence of amounts, failing on the first overflow.
    pub fn try_sum<I>(amounts: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }

    /// Apply a percentage (`15` means 15%).
    ///
    /// The percentage becomes a fraction by shifting its scale two places, which
    /// is exact. The exact product is then rounded once to [`Money::SCALE`]
    /// digits, half away from zero.
    ///
    /// With trailing zeros stripped, the product must fit in a 96-bit decimal
    /// mantissa (roughly 28 significant digits) to be exact. Wider products are
    /// rejected with [`CoreError::Overflow`] instead of being rounded twice.
    pub fn multiply_by_rate(&self, percent: Decimal) -> CoreResult<Self> {
        if percent.scale() > MAX_RATE_SCALE {
            return Err(CoreError::invalid_amount(format!(
                "rate {percent} has more than {MAX_RATE_SCALE} fractional digits"
            )));
        }
        let mut factor = percent;
        factor
            .set_scale(percent.scale() + 2)
            .map_err(|_| CoreError::Overflow("money rate multiplication"))?;
        let (amount, factor) = (self.0.normalize(), factor.normalize());
        let exact_scale = amount.scale() + factor.scale();
        let product = amount
            .checked_mul(factor)
            .filter(|p| p.is_zero() || p.scale() == exact_scale)
            .ok_or(CoreError::Overflow("money rate multiplication"))?;
        let rounded =
            product.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero);
        Self::within_range(rounded, "money rate multiplication")
    }

    fn within_range(value: Decimal, op: &'static str) -> CoreResult<Self> {
        if value.abs() >= Self::limit() {
            return Err(CoreError::Overflow(op));
        }
        Ok(Self(Self::canonical(value)))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl core::ops::Neg for Money {
    type Output = Money;

    fn neg(self) -> Self::Output {
        self.negate()
    }
}

/// Formats with at least two fractional digits and no trailing zeros beyond
/// them (`100.00`, `0.125`, `-3.00000001`).
impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut shown = self.0.normalize();
        if shown.scale() < 2 {
            shown.rescale(2);
        }
        core::fmt::Display::fmt(&shown, f)
    }
}

impl FromStr for Money {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Money {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Money> for String {
    fn from(value: Money) -> Self {
        value.to_string()
    }
}

impl TryFrom<Decimal> for Money {
    type Error = CoreError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::from_decimal(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn m(s: &str) -> Money {
        Money::parse(s).unwrap()
    }

    #[test]
    fn parses_and_formats_plain_amounts() {
        assert_eq!(m("100").to_string(), "100.00");
        assert_eq!(m("100.5").to_string(), "100.50");
        assert_eq!(m("0.125").to_string(), "0.125");
        assert_eq!(m("-3.00000001").to_string(), "-3.00000001");
        assert_eq!(m("007.10").to_string(), "7.10");
    }

    #[test]
    fn rejects_malformed_strings() {
        for bad in ["", "-", "abc", "1e5", "1,000", " 1", "1.", ".5", "1.2.3", "+1", "1_000"] {
            let err = Money::parse(bad).unwrap_err();
            assert!(
                matches!(err, CoreError::InvalidAmount(_)),
                "expected InvalidAmount for {bad:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn rejects_excess_precision_instead_of_rounding() {
        assert!(matches!(
            Money::parse("0.000000001"),
            Err(CoreError::InvalidAmount(_))
        ));
        assert!(matches!(
            Money::from_decimal(dec!(1.123456789)),
            Err(CoreError::InvalidAmount(_))
        ));
    }

    #[test]
    fn rejects_more_than_twenty_integer_digits() {
        assert!(Money::parse("99999999999999999999.99999999").is_ok());
        assert!(matches!(
            Money::parse("100000000000000000000"),
            Err(CoreError::InvalidAmount(_))
        ));
    }

    #[test]
    fn equality_is_exact_and_scale_independent() {
        assert_eq!(m("10"), m("10.00000000"));
        assert_ne!(m("10"), m("10.00000001"));
        assert_eq!(Money::from_cents(1000), m("10"));
    }

    #[test]
    fn negation_of_zero_is_zero() {
        assert_eq!(Money::ZERO.negate(), Money::ZERO);
        assert_eq!((-Money::ZERO).to_string(), "0.00");
        assert!(!Money::ZERO.is_negative());
    }

    #[test]
    fn arithmetic_is_exact() {
        let a = m("0.1");
        let b = m("0.2");
        assert_eq!(a.checked_add(b).unwrap(), m("0.3"));
        assert_eq!(a.checked_sub(b).unwrap(), m("-0.1"));
        assert_eq!(m("-5").abs(), m("5"));
    }

    #[test]
    fn addition_outside_range_overflows() {
        let big = m("99999999999999999999");
        assert!(matches!(
            big.checked_add(m("1")),
            Err(CoreError::Overflow(_))
        ));
    }

    #[test]
    fn multiply_by_rate_rounds_half_away_from_zero_once() {
        // 0.00000005 * 50% = 0.000000025 -> 0.00000003
        assert_eq!(m("0.00000005").multiply_by_rate(dec!(50)).unwrap(), m("0.00000003"));
        assert_eq!(m("-0.00000005").multiply_by_rate(dec!(50)).unwrap(), m("-0.00000003"));
        assert_eq!(m("200").multiply_by_rate(dec!(7.5)).unwrap(), m("15"));
        assert_eq!(m("100").multiply_by_rate(dec!(33.333)).unwrap(), m("33.333"));
    }

    #[test]
    fn multiply_by_rate_keeps_wide_products_exact() {
        // 4115185148148.3703718484774 before the single rounding step
        assert_eq!(
            m("12345678901234.12345678").multiply_by_rate(dec!(33.333)).unwrap(),
            m("4115185148148.37037185")
        );
        assert_eq!(
            m("99999999999999999999.99999999").multiply_by_rate(dec!(100)).unwrap(),
            m("99999999999999999999.99999999")
        );
        assert_eq!(m("0.00000001").multiply_by_rate(dec!(0.0000000001)).unwrap(), Money::ZERO);
    }

    #[test]
    fn multiply_by_rate_rejects_products_that_would_round_twice() {
        // 33 significant digits cannot be held exactly
        assert!(matches!(
            m("99999999999999999999.99999999").multiply_by_rate(dec!(33.333)),
            Err(CoreError::Overflow(_))
        ));
    }

    #[test]
    fn serializes_as_decimal_string() {
        let json = serde_json::to_string(&m("123.45")).unwrap();
        assert_eq!(json, "\"123.45\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m("123.45"));
        assert!(serde_json::from_str::<Money>("123.45").is_err());
    }

    #[test]
    fn compare_orders_by_value() {
        assert_eq!(m("1").compare(&m("2")), Ordering::Less);
        assert_eq!(m("-1").compare(&m("-2")), Ordering::Greater);
        assert_eq!(m("2.0").compare(&m("2")), Ordering::Equal);
    }

    fn amount() -> impl Strategy<Value = Money> {
        (-1_000_000_000_000i64..1_000_000_000_000i64)
            .prop_map(|units| Money::from_decimal(Decimal::new(units, 8)).unwrap())
    }

    proptest! {
        #[test]
        fn display_parse_round_trip(a in amount()) {
            prop_assert_eq!(Money::parse(&a.to_string()).unwrap(), a);
        }

        #[test]
        fn subtraction_undoes_addition(a in amount(), b in amount()) {
            let sum = a.checked_add(b).unwrap();
            prop_assert_eq!(sum.checked_sub(b).unwrap(), a);
        }

        #[test]
        fn try_sum_matches_fold(values in prop::collection::vec(amount(), 0..20)) {
            let mut acc = Money::ZERO;
            for v in &values {
                acc = acc.checked_add(*v).unwrap();
            }
            prop_assert_eq!(Money::try_sum(values).unwrap(), acc);
        }
    }
}

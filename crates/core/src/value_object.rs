//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity: two instances with the same attributes are
/// interchangeable. [`Money`](crate::Money) is the main one in the ledger; an
/// amount of `100.00` is the same value wherever it appears.
///
/// They are immutable. To "modify" one, build a new value (`Money::checked_add`
/// returns a fresh amount rather than mutating in place).
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

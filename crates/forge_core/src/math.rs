//! Fixed-point math for replicated simulation.
//!
//! Every quantity that must agree bit-for-bit between server and clients
//! (liquid amounts, power, timers, positions) uses [`Fixed`].

use std::ops::{Add, AddAssign, Sub};

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Simulation number: 32 integer bits, 32 fractional bits.
pub type Fixed = I32F32;

/// `#[serde(with)]` helper storing a [`Fixed`] as its raw `i64` bits.
///
/// Used for snapshots and the wire, where values must come back exact.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Write the raw bits.
    pub fn serialize<S: Serializer>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.to_bits())
    }

    /// Read the raw bits.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fixed, D::Error> {
        i64::deserialize(deserializer).map(Fixed::from_bits)
    }
}

/// `#[serde(with)]` helper for hand-written RON, where amounts are decimals
/// such as `liquid_capacity: 30.0`.
pub mod fixed_decimal {
    use super::Fixed;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    /// Write as `f64`.
    pub fn serialize<S: Serializer>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.to_num())
    }

    /// Read an `f64`, rejecting values outside the fixed range.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fixed, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Fixed::checked_from_num(raw).ok_or_else(|| D::Error::custom(format!("{raw} is out of fixed-point range")))
    }
}

/// World-space position or velocity, in tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// Horizontal.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Vertical.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

impl Vec2Fixed {
    /// Origin.
    pub const ZERO: Self = Self::new(Fixed::ZERO, Fixed::ZERO);

    /// Build from components.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Saturating squared distance. Compare against a squared range
    /// instead of taking a root.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let Self { x, y } = self - other;
        x.saturating_mul(x).saturating_add(y.saturating_mul(y))
    }

    /// Whether `other` is at most `range` away.
    #[must_use]
    pub fn within(self, other: Self, range: Fixed) -> bool {
        self.distance_squared(other) <= range.saturating_mul(range)
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> Fixed {
        fixed_sqrt(self.distance_squared(Self::ZERO))
    }

    /// Componentwise multiply.
    #[must_use]
    pub fn scale(self, factor: Fixed) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }

    /// Same direction with length one; the zero vector stays zero.
    #[must_use]
    pub fn normalize(self) -> Self {
        match self.length() {
            len if len == Fixed::ZERO => Self::ZERO,
            len => Self::new(self.x / len, self.y / len),
        }
    }
}

/// Square root rounded down to the nearest representable value.
///
/// Works on the raw bits: `sqrt(v) * 2^32 == isqrt(bits(v) * 2^32)`, so the
/// result is exact integer arithmetic and identical on every platform.
/// Negative inputs give zero.
#[must_use]
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }
    let n = (value.to_bits() as u128) << Fixed::FRAC_NBITS;
    let mut root = 1u128 << ((128 - n.leading_zeros()).div_ceil(2));
    loop {
        let next = (root + n / root) >> 1;
        if next >= root {
            break;
        }
        root = next;
    }
    // Inputs below 2^31 have roots below 2^47 bits, well inside i64.
    Fixed::from_bits(i64::try_from(root).unwrap_or(i64::MAX))
}

impl Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2Fixed {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

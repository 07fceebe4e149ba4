//! Path weights: ordered, combinable costs with a dominating non-viable value.
//!
//! Every weight is a small `Copy` value type. The shortest-path engine is generic over the
//! [`Weight`] trait, so a controller picks its metric when it is constructed (see
//! [`calc::WeightModel`]).

use std::cmp::Ordering;

use ordered_float::NotNan;

use crate::error::Error;

pub mod calc;

pub use calc::{
    BandwidthLoad, CpuLoad, EnergyFlex, Excluding, Hops, Snapshot, SnapshotCalc, WeightCalc,
    WeightModel,
};

/// Contract for edge and path weights.
///
/// `Ord` must be a strict total order where lower is better, and `non_viable()` must be greater
/// than every other value. `combine` must be associative and commutative, with `initial()` as its
/// identity and `non_viable()` absorbing.
pub trait Weight: Copy + Ord + std::fmt::Debug {
    /// The identity weight (cost of the empty path).
    fn initial() -> Self;

    /// The weight of something that must not be used.
    fn non_viable() -> Self;

    /// Combine two weights. Fails with [`Error::WeightOverflow`] if the result would leave the
    /// numeric range of the weight.
    fn combine(&self, other: &Self) -> Result<Self, Error>;

    /// Returns `true` if `self` is the non-viable sentinel.
    fn is_non_viable(&self) -> bool {
        *self == Self::non_viable()
    }

    /// Returns `true` if the weight of a single node signals an energy violation.
    fn violates(&self) -> bool {
        false
    }
}

/// Number of hops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HopCount(pub u32);

impl Weight for HopCount {
    fn initial() -> Self {
        Self(0)
    }

    fn non_viable() -> Self {
        Self(u32::MAX)
    }

    fn combine(&self, other: &Self) -> Result<Self, Error> {
        if self.is_non_viable() || other.is_non_viable() {
            return Ok(Self::non_viable());
        }
        match self.0.checked_add(other.0) {
            Some(x) if x < u32::MAX => Ok(Self(x)),
            _ => Err(Error::WeightOverflow),
        }
    }
}

/// Sum of CPU utilization fractions along the path.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuUsage(pub NotNan<f64>);

impl CpuUsage {
    /// Create a new weight. NaN samples make the node unusable.
    pub fn new(x: f64) -> Self {
        NotNan::new(x).map(Self).unwrap_or_else(|_| Self::non_viable())
    }

    /// Get the raw value
    pub fn get(&self) -> f64 {
        self.0.into_inner()
    }
}

impl Weight for CpuUsage {
    fn initial() -> Self {
        Self(NotNan::default())
    }

    fn non_viable() -> Self {
        Self(NotNan::new(f64::INFINITY).unwrap_or_default())
    }

    fn combine(&self, other: &Self) -> Result<Self, Error> {
        if self.is_non_viable() || other.is_non_viable() {
            return Ok(Self::non_viable());
        }
        let sum = self.get() + other.get();
        if sum.is_finite() {
            Ok(Self::new(sum))
        } else {
            Err(Error::WeightOverflow)
        }
    }
}

/// Sum of forwarding load (bits per second) along the path.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bandwidth(pub u64);

impl Weight for Bandwidth {
    fn initial() -> Self {
        Self(0)
    }

    fn non_viable() -> Self {
        Self(u64::MAX)
    }

    fn combine(&self, other: &Self) -> Result<Self, Error> {
        if self.is_non_viable() || other.is_non_viable() {
            return Ok(Self::non_viable());
        }
        match self.0.checked_add(other.0) {
            Some(x) if x < u64::MAX => Ok(Self(x)),
            _ => Err(Error::WeightOverflow),
        }
    }
}

/// Composite energy-aware weight.
///
/// Paths through a saturated switch (`max_usage >= 1`) are worse than any path that avoids one.
/// Among the rest, fewer energy-violating switches win, then fewer hops, then the lower peak
/// utilization.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlexWeight {
    max_usage: NotNan<f64>,
    value: u32,
    hops: u32,
}

impl FlexWeight {
    /// Create a new weight. A NaN utilization is treated as saturated.
    pub fn new(max_usage: f64, value: u32, hops: u32) -> Self {
        let max_usage = if max_usage.is_nan() { 1.0 } else { max_usage };
        Self {
            max_usage: NotNan::new(max_usage).unwrap_or_default(),
            value,
            hops,
        }
    }

    /// Weight of a single node (no hops).
    pub fn node(max_usage: f64, violating: bool) -> Self {
        Self::new(max_usage, violating as u32, 0)
    }

    /// Highest CPU utilization seen along the path.
    pub fn max_usage(&self) -> f64 {
        self.max_usage.into_inner()
    }

    /// Number of energy violations counted along the path.
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Number of hops
    pub fn hops(&self) -> u32 {
        self.hops
    }

    fn saturated(&self) -> bool {
        self.max_usage.into_inner() >= 1.0
    }
}

impl Ord for FlexWeight {
    fn cmp(&self, other: &Self) -> Ordering {
        self.saturated()
            .cmp(&other.saturated())
            .then(self.value.cmp(&other.value))
            .then(self.hops.cmp(&other.hops))
            .then(self.max_usage.cmp(&other.max_usage))
    }
}

impl PartialOrd for FlexWeight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Weight for FlexWeight {
    fn initial() -> Self {
        Self::default()
    }

    fn non_viable() -> Self {
        Self::new(f64::MAX, u32::MAX, u32::MAX)
    }

    fn combine(&self, other: &Self) -> Result<Self, Error> {
        if self.is_non_viable() || other.is_non_viable() {
            return Ok(Self::non_viable());
        }
        let value = self.value.checked_add(other.value).filter(|x| *x < u32::MAX);
        let hops = self.hops.checked_add(other.hops).filter(|x| *x < u32::MAX);
        match (value, hops) {
            (Some(value), Some(hops)) => Ok(Self {
                max_usage: self.max_usage.max(other.max_usage),
                value,
                hops,
            }),
            _ => Err(Error::WeightOverflow),
        }
    }

    fn violates(&self) -> bool {
        self.value != 0
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn flex() -> impl Strategy<Value = FlexWeight> {
        (0.0..2.0f64, 0..1000u32, 0..1000u32).prop_map(|(u, v, h)| FlexWeight::new(u, v, h))
    }

    fn check_algebra<W: Weight>(a: W, b: W, c: W) {
        let ab = a.combine(&b).unwrap();
        assert_eq!(ab, b.combine(&a).unwrap());
        assert_eq!(
            ab.combine(&c).unwrap(),
            a.combine(&b.combine(&c).unwrap()).unwrap()
        );
        assert_eq!(a.combine(&W::initial()).unwrap(), a);
        assert_eq!(a.combine(&W::non_viable()).unwrap(), W::non_viable());
        assert!(ab.combine(&c).unwrap() < W::non_viable());
    }

    proptest! {
        #[test]
        fn hop_count_algebra(a in 0..1_000_000u32, b in 0..1_000_000u32, c in 0..1_000_000u32) {
            check_algebra(HopCount(a), HopCount(b), HopCount(c));
        }

        #[test]
        fn bandwidth_algebra(a in 0..1u64 << 60, b in 0..1u64 << 60, c in 0..1u64 << 60) {
            check_algebra(Bandwidth(a), Bandwidth(b), Bandwidth(c));
        }

        #[test]
        fn cpu_usage_algebra(a in 0..1000u32, b in 0..1000u32, c in 0..1000u32) {
            // quarter steps keep the float sums exact
            let w = |x: u32| CpuUsage::new(x as f64 * 0.25);
            check_algebra(w(a), w(b), w(c));
        }

        #[test]
        fn flex_algebra(a in flex(), b in flex(), c in flex()) {
            check_algebra(a, b, c);
        }

        #[test]
        fn flex_total_order(a in flex(), b in flex()) {
            let lt = a < b;
            let gt = b < a;
            let eq = a == b;
            prop_assert_eq!(lt as u8 + gt as u8 + eq as u8, 1);
        }
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(matches!(
            HopCount(u32::MAX - 1).combine(&HopCount(1)),
            Err(Error::WeightOverflow)
        ));
        assert!(matches!(
            Bandwidth(u64::MAX - 5).combine(&Bandwidth(10)),
            Err(Error::WeightOverflow)
        ));
        assert!(matches!(
            CpuUsage::new(f64::MAX).combine(&CpuUsage::new(f64::MAX)),
            Err(Error::WeightOverflow)
        ));
    }

    #[test]
    fn flex_order() {
        // a saturated switch loses against any number of violations
        assert!(FlexWeight::new(0.5, 3, 7) < FlexWeight::new(1.0, 0, 1));
        // violations before hops
        assert!(FlexWeight::new(0.9, 0, 7) < FlexWeight::new(0.1, 1, 1));
        // hops before usage
        assert!(FlexWeight::new(0.9, 1, 2) < FlexWeight::new(0.1, 1, 3));
        assert!(FlexWeight::new(0.1, 1, 2) < FlexWeight::new(0.9, 1, 2));
        assert!(FlexWeight::new(1.5, 10, 10) < FlexWeight::non_viable());
        assert!(FlexWeight::node(0.3, true).violates());
        assert!(!FlexWeight::node(0.3, false).violates());
    }
}

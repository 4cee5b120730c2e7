use core::iter::Sum;
use core::ops::{Add, AddAssign};

use derive_new::new;
use serde::{Deserialize, Serialize};

/// A cost split over one training iteration.
///
/// `total` is the value compared globally. It is set by whoever produces the item (a strategy
/// generator or the layout oracle) and only ever propagated by the planner, never recomputed
/// from the two phases.
#[derive(new, Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainCycleItem {
    /// Cost of the forward pass.
    pub forward: f64,
    /// Cost of the backward pass.
    pub backward: f64,
    /// Combined cost.
    pub total: f64,
}

impl TrainCycleItem {
    /// A zero cost.
    pub fn zero() -> Self {
        Self::default()
    }

    /// A cost whose total is the sum of both phases.
    pub fn summed(forward: f64, backward: f64) -> Self {
        Self::new(forward, backward, forward + backward)
    }

    /// Whether every field is a finite, non-negative number.
    pub fn is_finite_non_negative(&self) -> bool {
        [self.forward, self.backward, self.total]
            .iter()
            .all(|cost| cost.is_finite() && *cost >= 0.0)
    }
}

impl Add for TrainCycleItem {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(
            self.forward + rhs.forward,
            self.backward + rhs.backward,
            self.total + rhs.total,
        )
    }
}

impl AddAssign for TrainCycleItem {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for TrainCycleItem {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_keeps_totals_independent() {
        // A max-based total must survive addition untouched.
        let a = TrainCycleItem::new(1.0, 2.0, 2.0);
        let b = TrainCycleItem::summed(3.0, 4.0);

        assert_eq!(a + b, TrainCycleItem::new(4.0, 6.0, 9.0));
        assert_eq!(
            [a, b].into_iter().sum::<TrainCycleItem>(),
            TrainCycleItem::new(4.0, 6.0, 9.0)
        );
    }

    #[test]
    fn test_is_finite_non_negative() {
        assert!(TrainCycleItem::zero().is_finite_non_negative());
        assert!(!TrainCycleItem::new(1.0, -1.0, 0.0).is_finite_non_negative());
        assert!(!TrainCycleItem::new(f64::NAN, 0.0, 0.0).is_finite_non_negative());
        assert!(!TrainCycleItem::summed(f64::INFINITY, 0.0).is_finite_non_negative());
    }
}

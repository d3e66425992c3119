use crate::Metric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

/// A read or alignment counter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Ord, PartialOrd)]
#[serde(transparent)]
pub struct CountMetric {
    count: i64,
}

impl Metric for CountMetric {
    fn merge(&mut self, other: Self) {
        self.count += other.count;
    }
}

impl CountMetric {
    /// Count one more.
    pub fn increment(&mut self) {
        self.count += 1;
    }

    /// Count `n` more.
    pub fn increment_by(&mut self, n: impl Into<i64>) {
        self.count += n.into();
    }

    /// The current count.
    pub fn count(self) -> i64 {
        self.count
    }

    /// This count as a percentage of `total`, or zero if `total` is zero.
    pub fn percent_of(self, total: CountMetric) -> f64 {
        match total.count {
            0 => 0.0,
            t => 100.0 * self.count as f64 / t as f64,
        }
    }
}

impl<T: Into<i64>> From<T> for CountMetric {
    fn from(n: T) -> Self {
        CountMetric { count: n.into() }
    }
}

impl Add for CountMetric {
    type Output = CountMetric;

    fn add(self, other: CountMetric) -> CountMetric {
        CountMetric {
            count: self.count + other.count,
        }
    }
}

impl AddAssign for CountMetric {
    fn add_assign(&mut self, other: CountMetric) {
        self.count += other.count;
    }
}

impl Sub for CountMetric {
    type Output = CountMetric;

    fn sub(self, other: CountMetric) -> CountMetric {
        CountMetric {
            count: self.count - other.count,
        }
    }
}

impl Sum for CountMetric {
    fn sum<I: Iterator<Item = CountMetric>>(iter: I) -> CountMetric {
        iter.fold(CountMetric::default(), Add::add)
    }
}

impl fmt::Display for CountMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.count, f)
    }
}

//! Alignment categories tallied during a UMI counting pass.

use crate::AlignmentOutcome;
use metric::{CountMetric, Metric};
use serde::{Deserialize, Serialize};

/// Every alignment of a pass lands in `total` and in exactly one other field.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UmiCountMetrics {
    pub total: CountMetric,
    pub unmapped: CountMetric,
    pub multimapped: CountMetric,
    pub low_quality: CountMetric,
    pub no_feature: CountMetric,
    pub ambiguous: CountMetric,
    pub uniquely_mapped: CountMetric,
}

impl Metric for UmiCountMetrics {
    fn merge(&mut self, other: Self) {
        self.total.merge(other.total);
        self.unmapped.merge(other.unmapped);
        self.multimapped.merge(other.multimapped);
        self.low_quality.merge(other.low_quality);
        self.no_feature.merge(other.no_feature);
        self.ambiguous.merge(other.ambiguous);
        self.uniquely_mapped.merge(other.uniquely_mapped);
    }
}

impl UmiCountMetrics {
    pub fn observe(&mut self, outcome: &AlignmentOutcome) {
        self.total.increment();
        match outcome {
            AlignmentOutcome::Unmapped => self.unmapped.increment(),
            AlignmentOutcome::Multimapped => self.multimapped.increment(),
            AlignmentOutcome::LowQuality => self.low_quality.increment(),
            AlignmentOutcome::NoFeature => self.no_feature.increment(),
            AlignmentOutcome::Ambiguous => self.ambiguous.increment(),
            AlignmentOutcome::Counted(_) => self.uniquely_mapped.increment(),
        }
    }

    /// Sum of the exclusive categories, equal to `total` for any pass.
    pub fn categorized(&self) -> CountMetric {
        [
            self.unmapped,
            self.multimapped,
            self.low_quality,
            self.no_feature,
            self.ambiguous,
            self.uniquely_mapped,
        ]
        .into_iter()
        .sum()
    }

    pub fn log_summary(&self) {
        log::info!(
            "Alignments: {} total, {} unmapped, {} multimapped, {} low quality, \
             {} no feature, {} ambiguous, {} uniquely mapped",
            self.total,
            self.unmapped,
            self.multimapped,
            self.low_quality,
            self.no_feature,
            self.ambiguous,
            self.uniquely_mapped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_merge() {
        let mut m1 = UmiCountMetrics::default();
        m1.observe(&AlignmentOutcome::Unmapped);
        m1.observe(&AlignmentOutcome::Counted(0));
        m1.observe(&AlignmentOutcome::Counted(3));

        let mut m2 = UmiCountMetrics::default();
        m2.observe(&AlignmentOutcome::Ambiguous);
        m2.observe(&AlignmentOutcome::LowQuality);

        m1.merge(m2);
        assert_eq!(m1.total.count(), 5);
        assert_eq!(m1.uniquely_mapped.count(), 2);
        assert_eq!(m1.ambiguous.count(), 1);
        assert_eq!(m1.categorized(), m1.total);
    }
}

//! Geometric table of instantaneous-rate intervals.

use serde::{Deserialize, Serialize};

/// One band of interaction rate, `[lower, upper)` in kHz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateInterval {
    pub index: usize,
    pub lower: f64,
    pub upper: f64,
}

impl RateInterval {
    pub fn contains(&self, rate: f64) -> bool {
        rate >= self.lower && rate < self.upper
    }
}

/// Ordered, contiguous set of rate intervals, highest rate first.
#[derive(Debug, Clone, PartialEq)]
pub struct RateIntervalTable {
    intervals: Vec<RateInterval>,
}

impl RateIntervalTable {
    /// Step down from `rate_max` by a factor `(1 - delta)` per interval until
    /// the lower edge drops to `rate_min` or below.
    ///
    /// Parameters are validated when the configuration is loaded; invalid
    /// values here produce an empty table rather than looping forever.
    pub fn generate(rate_max: f64, rate_min: f64, delta: f64) -> Self {
        let mut intervals = Vec::new();
        if !(delta > 0.0 && delta < 1.0 && rate_min > 0.0 && rate_max > rate_min)
            || !rate_max.is_finite()
        {
            return Self { intervals };
        }

        let mut current = rate_max;
        loop {
            let next = current * (1.0 - delta);
            intervals.push(RateInterval {
                index: intervals.len(),
                lower: next,
                upper: current,
            });
            if next <= rate_min {
                break;
            }
            current = next;
        }
        Self { intervals }
    }

    /// Index of the interval with `lower <= rate < upper`, `None` when the
    /// rate falls outside the table.
    pub fn classify(&self, rate: f64) -> Option<usize> {
        self.intervals
            .iter()
            .find(|interval| interval.contains(rate))
            .map(|interval| interval.index)
    }

    pub fn get(&self, index: usize) -> Option<&RateInterval> {
        self.intervals.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateInterval> {
        self.intervals.iter()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_contiguous_and_decreasing() {
        let table = RateIntervalTable::generate(50.0, 5.0, 0.1);
        assert!(!table.is_empty());

        let intervals: Vec<_> = table.iter().collect();
        assert_eq!(intervals[0].upper, 50.0);
        for pair in intervals.windows(2) {
            assert_eq!(pair[0].lower, pair[1].upper);
            assert!(pair[1].upper < pair[0].upper);
        }
        for (i, interval) in intervals.iter().enumerate() {
            assert_eq!(interval.index, i);
            assert!(interval.lower < interval.upper);
        }

        let last = intervals.last().unwrap();
        assert!(last.lower <= 5.0);
        assert!(last.lower > 5.0 * (1.0 - 0.1));
    }

    #[test]
    fn test_classify_inside_span() {
        let table = RateIntervalTable::generate(50.0, 5.0, 0.1);
        let lowest = table.iter().last().unwrap().lower;

        let mut rate = lowest;
        while rate < 50.0 {
            let matches = table.iter().filter(|i| i.contains(rate)).count();
            assert_eq!(matches, 1, "rate {} matched {} intervals", rate, matches);
            assert!(table.classify(rate).is_some());
            rate += 0.37;
        }

        assert_eq!(table.classify(49.99), Some(0));
        assert_eq!(table.classify(45.5), Some(0));
        assert_eq!(table.classify(44.5), Some(1));
    }

    #[test]
    fn test_classify_outside_span() {
        let table = RateIntervalTable::generate(50.0, 5.0, 0.1);
        assert_eq!(table.classify(50.0), None);
        assert_eq!(table.classify(120.0), None);
        assert_eq!(table.classify(0.0), None);
        assert_eq!(table.classify(1.0), None);
    }

    #[test]
    fn test_invalid_parameters_give_empty_table() {
        assert!(RateIntervalTable::generate(50.0, 5.0, 0.0).is_empty());
        assert!(RateIntervalTable::generate(50.0, 5.0, 1.0).is_empty());
        assert!(RateIntervalTable::generate(5.0, 50.0, 0.1).is_empty());
        assert!(RateIntervalTable::generate(f64::INFINITY, 5.0, 0.1).is_empty());
        assert!(RateIntervalTable::generate(f64::NAN, 5.0, 0.1).is_empty());
        assert!(RateIntervalTable::generate(50.0, 5.0, 0.1)
            .classify(10.0)
            .is_some());
    }
}

//! Provides a means to hold the traversal order of the scanned address range.
mod range_iterator;
use crate::address::{Address, ScanRange};
use crate::input::ScanOrder;
pub use range_iterator::RangeIterator;

/// Number of columns the random order spreads the range over.
pub const DEFAULT_DIVISOR: u64 = 100;

/// Represents the order in which addresses of a range are visited.
#[derive(Debug, Clone, Copy)]
pub enum IpStrategy {
    Serial(SerialRange),
    Random(RandomRange),
}

impl IpStrategy {
    pub const fn pick(range: ScanRange, order: ScanOrder) -> Self {
        match order {
            ScanOrder::Serial => Self::Serial(SerialRange { range }),
            ScanOrder::Random => Self::Random(RandomRange {
                range,
                divisor: DEFAULT_DIVISOR,
            }),
        }
    }

    pub const fn range(&self) -> ScanRange {
        match self {
            Self::Serial(serial) => serial.range,
            Self::Random(random) => random.range,
        }
    }

    /// Offsets into the range, beginning at permutation index `start`.
    pub fn order(&self, start: u64) -> RangeIterator {
        match self {
            Self::Serial(range) => range.generate(start),
            Self::Random(range) => range.generate(start),
        }
    }

    /// Addresses in visiting order, beginning at permutation index `start`.
    pub fn ordered_iter(&self, start: u64) -> impl Iterator<Item = Address> + use<'_> {
        let range = self.range();
        self.order(start).filter_map(move |offset| range.nth(offset))
    }

    /// How many picks are left after `position` picks have been made.
    pub const fn remaining(&self, position: u64) -> u64 {
        self.range().len().saturating_sub(position)
    }
}

/// Trait associated with an ip strategy. Each `IpStrategy` must be able
/// to generate an order for the scan, starting from any position.
trait RangeOrder {
    fn generate(&self, start: u64) -> RangeIterator;
}

/// As the name implies `SerialRange` will always visit addresses in
/// ascending order.
#[derive(Debug, Clone, Copy)]
pub struct SerialRange {
    range: ScanRange,
}

impl RangeOrder for SerialRange {
    fn generate(&self, start: u64) -> RangeIterator {
        RangeIterator::new_serial(self.range.len(), start)
    }
}

/// `RandomRange` visits addresses in a spread-out order that is still fully
/// deterministic, so a stopped scan can pick up exactly where it left off.
#[derive(Debug, Clone, Copy)]
pub struct RandomRange {
    range: ScanRange,
    divisor: u64,
}

impl RandomRange {
    /// Same range, different spread. Mostly useful for tests and benchmarks.
    #[must_use]
    pub const fn with_divisor(mut self, divisor: u64) -> Self {
        self.divisor = divisor;
        self
    }
}

impl RangeOrder for RandomRange {
    fn generate(&self, start: u64) -> RangeIterator {
        RangeIterator::new_random(self.range.len(), self.divisor, start)
    }
}

#[cfg(test)]
mod tests {
    use super::IpStrategy;
    use crate::address::{Address, ScanRange};
    use crate::input::ScanOrder;

    fn range(start: [u8; 4], end: [u8; 4]) -> ScanRange {
        let [a, b, c, d] = start;
        let [e, f, g, h] = end;
        ScanRange::new(
            Address::from_segments(a, b, c, d),
            Address::from_segments(e, f, g, h),
        )
        .unwrap()
    }

    #[test]
    fn serial_strategy_with_range() {
        let strategy = IpStrategy::pick(range([10, 0, 0, 1], [10, 0, 0, 3]), ScanOrder::Serial);
        let result = strategy.ordered_iter(0).collect::<Vec<_>>();

        assert_eq!(
            result,
            vec![
                Address::from_segments(10, 0, 0, 1),
                Address::from_segments(10, 0, 0, 2),
                Address::from_segments(10, 0, 0, 3),
            ]
        );
    }

    #[test]
    fn random_strategy_with_range() {
        let scan_range = range([10, 0, 0, 0], [10, 0, 3, 255]);
        let strategy = IpStrategy::pick(scan_range, ScanOrder::Random);
        let mut result = strategy.ordered_iter(0).collect::<Vec<_>>();
        let expected = IpStrategy::pick(scan_range, ScanOrder::Serial)
            .ordered_iter(0)
            .collect::<Vec<_>>();

        assert_ne!(expected, result);
        // 1024 addresses over 100 columns: the second pick is a column away
        assert_eq!(result[1], Address::from_segments(10, 0, 0, 11));

        result.sort_unstable();
        assert_eq!(expected, result);
    }

    #[test]
    fn random_strategy_is_deterministic() {
        let scan_range = range([172, 16, 0, 0], [172, 16, 9, 9]);
        let first = IpStrategy::pick(scan_range, ScanOrder::Random)
            .ordered_iter(0)
            .collect::<Vec<_>>();
        let second = IpStrategy::pick(scan_range, ScanOrder::Random)
            .ordered_iter(0)
            .collect::<Vec<_>>();

        assert_eq!(first, second);
    }

    #[test]
    fn custom_divisor_changes_the_spread() {
        let scan_range = range([10, 0, 0, 1], [10, 0, 0, 12]);
        let IpStrategy::Random(random) = IpStrategy::pick(scan_range, ScanOrder::Random) else {
            unreachable!()
        };
        let strategy = IpStrategy::Random(random.with_divisor(4));
        let offsets = strategy.order(0).collect::<Vec<_>>();

        assert_eq!(offsets, vec![0, 3, 6, 9, 1, 4, 7, 10, 2, 5, 8, 11]);
    }

    #[test]
    fn remaining_counts_down_to_zero() {
        let strategy = IpStrategy::pick(range([10, 0, 0, 1], [10, 0, 0, 10]), ScanOrder::Random);

        assert_eq!(strategy.remaining(0), 10);
        assert_eq!(strategy.remaining(4), 6);
        assert_eq!(strategy.remaining(12), 0);
        assert_eq!(strategy.ordered_iter(4).count(), 6);
    }
}

/// Yields every offset in `0..span` exactly once, in one of two orders.
///
/// **Serial**, created by `RangeIterator::new_serial`:
///     `start, start + 1, …, span - 1`.
///
/// **Randomized**, created by `RangeIterator::new_random`:
///    - `0..span` is laid out in columns of height `block = ceil(span / divisor)`,
///      column `c` holding `block * c .. block * (c + 1)`.
///    - The grid is then read row by row, so consecutive picks are `block`
///      apart and neighbouring addresses are visited far from each other in time.
///    - The last column may be short. Its missing cells are skipped, which means
///      the first `rem` rows are one cell wider than the rest.
///
/// Both modes are pure arithmetic on a cursor. Resuming at position `k` only
/// sets the cursor, it never replays the first `k` picks.
#[derive(Debug, Clone)]
pub struct RangeIterator {
    span: u64,
    cursor: u64,
    columns: Option<Columns>,
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    block: u64,
    full: u64,
    rem: u64,
}

impl RangeIterator {
    /// Construct a serial iterator starting at `start`.
    pub const fn new_serial(span: u64, start: u64) -> Self {
        Self {
            span,
            cursor: start,
            columns: None,
        }
    }

    /// Construct a randomized iterator starting at `start`.
    ///
    /// Preconditions:
    /// - `divisor > 0`
    ///
    /// A `divisor` that is not smaller than `span` cannot spread anything
    /// and degrades to serial order.
    pub fn new_random(span: u64, divisor: u64, start: u64) -> Self {
        assert!(divisor > 0, "divisor must be positive");

        if divisor >= span {
            return Self::new_serial(span, start);
        }

        let block = span.div_ceil(divisor);
        // block <= span, so there is always at least one full column
        let full = span / block;
        let rem = span - full * block;

        Self {
            span,
            cursor: start,
            columns: Some(Columns { block, full, rem }),
        }
    }

    /// Position of the next pick, i.e. how many picks precede it.
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    pub const fn span(&self) -> u64 {
        self.span
    }

    fn offset_at(&self, i: u64) -> u64 {
        let Some(Columns { block, full, rem }) = self.columns else {
            return i;
        };

        let wide_cells = rem * (full + 1);
        let (row, column) = if i < wide_cells {
            (i / (full + 1), i % (full + 1))
        } else {
            let j = i - wide_cells;
            (rem + j / full, j % full)
        };

        block * column + row
    }
}

impl Iterator for RangeIterator {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.span {
            return None;
        }

        let offset = self.offset_at(self.cursor);
        self.cursor += 1;
        Some(offset)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::try_from(self.span.saturating_sub(self.cursor)).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}

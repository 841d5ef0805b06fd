//! Pairwise (tree) summation over the valid runs of a column.
//!
//! Values are summed in blocks of [`BLOCK_SIZE`]; block sums are folded
//! into a binary tree with one partial sum per level, so rounding error
//! grows with `log2(n)` instead of `n`. For a fixed validity mask the
//! visiting order is fixed, so results are reproducible bit for bit.

use fs_columnar::ValidityMask;

/// Elements accumulated linearly before a block enters the tree.
pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct PairwiseSum {
    levels: Vec<f64>,
    // Bit `l` set: level `l` holds one partial sum waiting for a sibling.
    pending: u64,
    root_level: usize,
}

impl PairwiseSum {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_block(&mut self, block_sum: f64) {
        let mut level = 0;
        let mut carry = block_sum;
        loop {
            if level == self.levels.len() {
                self.levels.push(0.0);
            }
            self.levels[level] += carry;
            self.pending ^= 1_u64 << level;
            if self.pending & (1_u64 << level) != 0 {
                break;
            }
            carry = self.levels[level];
            self.levels[level] = 0.0;
            level += 1;
        }
        self.root_level = self.root_level.max(level);
    }

    /// Fold every partial sum up into the root level.
    #[must_use]
    pub fn finish(mut self) -> f64 {
        if self.levels.is_empty() {
            return 0.0;
        }
        for level in 1..=self.root_level {
            self.levels[level] += self.levels[level - 1];
        }
        self.levels[self.root_level]
    }
}

/// Sum `value_at(i)` over every index set in `validity`.
///
/// Null runs are skipped without materializing anything; blocks never
/// straddle a null run.
pub fn pairwise_sum<F>(validity: &ValidityMask, mut value_at: F) -> f64
where
    F: FnMut(usize) -> f64,
{
    let mut acc = PairwiseSum::new();
    for (start, len) in validity.set_runs() {
        let end = start + len;
        let mut pos = start;
        while pos < end {
            let block_end = (pos + BLOCK_SIZE).min(end);
            let block_sum: f64 = (pos..block_end).map(&mut value_at).sum();
            acc.push_block(block_sum);
            pos = block_end;
        }
    }
    acc.finish()
}

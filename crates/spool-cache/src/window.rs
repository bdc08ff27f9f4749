// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Context Window Planning
//!
//! Tier buffers in the windowed variants hold whole utterances laid end to end, each padded
//! by its modality's own `left`/`right` context. A frame is a *valid center* when its full
//! window `[center - left, center + right]` lies inside its own utterance, so a padded
//! utterance of length `L` has `L - left - right` valid centers.
//!
//! Center `k` of utterance `u` sits at row `start(u) + left + k` and its window covers rows
//! `start(u) + k .. start(u) + k + left + right + 1`.

use ndarray::Array1;
use std::ops::Range;

use crate::error::{CacheError, CacheResult};

/// Symmetric-or-not context around a center frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WindowSpec {
    pub left: usize,
    pub right: usize,
}

impl WindowSpec {
    pub fn new(left: usize, right: usize) -> Self {
        Self { left, right }
    }

    /// Frames per window
    pub fn size(&self) -> usize {
        self.left + 1 + self.right
    }

    /// Rows of padding added around each utterance
    pub fn padding(&self) -> usize {
        self.left + self.right
    }

    /// Offsets of every window frame relative to its center: `-left..=right`
    pub fn offsets(&self) -> Array1<isize> {
        (-(self.left as isize)..=self.right as isize).collect()
    }
}

/// Ordered utterance lengths of one tier buffer, with their start rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundaryList {
    lengths: Vec<usize>,
    starts: Vec<usize>,
    total: usize,
}

impl BoundaryList {
    pub fn from_lengths(lengths: Vec<usize>) -> Self {
        let mut starts = Vec::with_capacity(lengths.len());
        let mut total = 0;
        for &length in &lengths {
            starts.push(total);
            total += length;
        }
        Self {
            lengths,
            starts,
            total,
        }
    }

    /// Number of utterances
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn length(&self, utt: usize) -> usize {
        self.lengths[utt]
    }

    pub fn start(&self, utt: usize) -> usize {
        self.starts[utt]
    }

    /// Rows covered by every utterance
    pub fn total_rows(&self) -> usize {
        self.total
    }

    pub fn valid_centers(&self, utt: usize, window: WindowSpec) -> usize {
        self.lengths[utt].saturating_sub(window.padding())
    }

    pub fn total_centers(&self, window: WindowSpec) -> usize {
        (0..self.len()).map(|u| self.valid_centers(u, window)).sum()
    }

    /// Boundary list after reordering utterances so that new utterance `i` is old `order[i]`
    pub fn reordered(&self, order: &[usize]) -> BoundaryList {
        BoundaryList::from_lengths(order.iter().map(|&u| self.lengths[u]).collect())
    }
}

/// Read position inside a [`BoundaryList`]
///
/// `utt` is the current utterance, `in_utt` the index of the next center within it and
/// `abs` the first row of that center's window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UtteranceCursor {
    pub abs: usize,
    pub in_utt: usize,
    pub utt: usize,
}

impl UtteranceCursor {
    /// Move past utterances with no centers left
    fn settle(&mut self, list: &BoundaryList, window: WindowSpec) {
        while self.utt < list.len() && self.in_utt >= list.valid_centers(self.utt, window) {
            self.utt += 1;
            self.in_utt = 0;
        }
        self.abs = if self.utt < list.len() {
            list.start(self.utt) + self.in_utt
        } else {
            list.total_rows()
        };
    }

    /// Valid centers not yet taken
    pub fn remaining(&self, list: &BoundaryList, window: WindowSpec) -> usize {
        if self.utt >= list.len() {
            return 0;
        }
        let current = list
            .valid_centers(self.utt, window)
            .saturating_sub(self.in_utt);
        current
            + (self.utt + 1..list.len())
                .map(|u| list.valid_centers(u, window))
                .sum::<usize>()
    }

    pub fn is_exhausted(&self, list: &BoundaryList, window: WindowSpec) -> bool {
        self.remaining(list, window) == 0
    }
}

/// Sizing pass: how many centers (at most `limit`) can be served from `cursor` onwards
pub fn count_centers(
    list: &BoundaryList,
    cursor: &UtteranceCursor,
    window: WindowSpec,
    limit: usize,
) -> usize {
    cursor.remaining(list, window).min(limit)
}

/// Rows spanned by a run of centers, and the centers relative to the first of those rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CenterTake {
    pub rows: Range<usize>,
    pub centers: Vec<usize>,
}

impl CenterTake {
    /// Center rows relative to the start of the tier buffer
    pub fn absolute_centers(&self) -> impl Iterator<Item = usize> + '_ {
        self.centers.iter().map(move |&c| self.rows.start + c)
    }
}

/// Materialization pass: advance `cursor` past exactly `n` centers
pub fn take_centers(
    list: &BoundaryList,
    cursor: &mut UtteranceCursor,
    window: WindowSpec,
    n: usize,
) -> CacheResult<CenterTake> {
    let available = cursor.remaining(list, window);
    if n > available {
        return Err(CacheError::Capacity {
            requested: n,
            available,
        });
    }

    cursor.settle(list, window);
    let first = cursor.abs;
    let mut end = first;
    let mut centers = Vec::with_capacity(n);

    for _ in 0..n {
        let window_start = list.start(cursor.utt) + cursor.in_utt;
        centers.push(window_start + window.left - first);
        end = window_start + window.size();
        cursor.in_utt += 1;
        cursor.settle(list, window);
    }

    Ok(CenterTake {
        rows: first..end,
        centers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_center_counts() {
        let list = BoundaryList::from_lengths(vec![5, 7]);
        let window = WindowSpec::new(1, 1);
        assert_eq!(list.valid_centers(0, window), 3);
        assert_eq!(list.valid_centers(1, window), 5);
        assert_eq!(list.total_centers(window), 8);
        assert_eq!(list.start(1), 5);
        assert_eq!(window.offsets().to_vec(), vec![-1, 0, 1]);
    }

    #[test]
    fn test_take_crosses_into_next_utterance() {
        let list = BoundaryList::from_lengths(vec![5, 7]);
        let window = WindowSpec::new(1, 1);
        let mut cursor = UtteranceCursor::default();

        let take = take_centers(&list, &mut cursor, window, 4).unwrap();
        assert_eq!(take.rows, 0..8);
        assert_eq!(take.centers, vec![1, 2, 3, 6]);
        assert_eq!(
            cursor,
            UtteranceCursor {
                abs: 6,
                in_utt: 1,
                utt: 1
            }
        );

        let rest = take_centers(&list, &mut cursor, window, 4).unwrap();
        assert_eq!(rest.rows, 6..12);
        assert_eq!(rest.absolute_centers().collect::<Vec<_>>(), vec![7, 8, 9, 10]);
        assert!(cursor.is_exhausted(&list, window));
    }

    #[test]
    fn test_short_utterances_are_skipped() {
        let list = BoundaryList::from_lengths(vec![2, 4, 1, 3]);
        let window = WindowSpec::new(1, 1);
        let mut cursor = UtteranceCursor::default();
        assert_eq!(count_centers(&list, &cursor, window, 100), 3);

        let take = take_centers(&list, &mut cursor, window, 3).unwrap();
        assert_eq!(take.absolute_centers().collect::<Vec<_>>(), vec![3, 4, 8]);
        assert!(matches!(
            take_centers(&list, &mut cursor, window, 1),
            Err(CacheError::Capacity { .. })
        ));
    }

    #[test]
    fn test_asymmetric_window() {
        let list = BoundaryList::from_lengths(vec![4]);
        let window = WindowSpec::new(2, 0);
        let mut cursor = UtteranceCursor::default();
        let take = take_centers(&list, &mut cursor, window, 2).unwrap();
        assert_eq!(take.rows, 0..4);
        assert_eq!(take.centers, vec![2, 3]);
    }
}

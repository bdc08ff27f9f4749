// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Counters kept by every cache tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    /// Refills from the tier below
    pub refills: usize,
    /// Refills that reached the end of a pass over the dataset
    pub epochs: usize,
    /// Rows (or window centers) handed to callers
    pub rows_served: usize,
    /// Rows (or window centers) discarded as partial batches
    pub rows_dropped: usize,
    /// Buffer allocations, including growth
    pub allocations: usize,
}

impl fmt::Display for TierStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "refills={} epochs={} served={} dropped={} allocations={}",
            self.refills, self.epochs, self.rows_served, self.rows_dropped, self.allocations
        )
    }
}

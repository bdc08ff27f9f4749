// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shuffling helpers shared by the cache tiers.
//!
//! Host tiers draw one uniform permutation per refill and apply it to every modality.
//! Device tiers use [`pairwise_swap_pairs`], a cheaper approximation: a random permutation
//! is split in half and the two halves are swapped element by element. The resulting
//! reordering is always an involution (applying it twice restores the original order), so
//! it is NOT a uniform random permutation.

use rand::seq::SliceRandom;
use rand::Rng;

/// Uniform random permutation of `0..n`
pub fn shared_permutation<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    order
}

/// Disjoint index pairs to swap; with odd `n` one index stays in place
pub fn pairwise_swap_pairs<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<(usize, usize)> {
    let order = shared_permutation(n, rng);
    let half = n / 2;
    (0..half).map(|i| (order[i], order[half + i])).collect()
}

/// Apply swap pairs to an identity ordering
pub fn order_after_swaps(n: usize, pairs: &[(usize, usize)]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    for &(a, b) in pairs {
        order.swap(a, b);
    }
    order
}

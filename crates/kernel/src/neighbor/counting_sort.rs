//! Parallel counting sort of particle indices by cell key.
//!
//! Atomics are only used to count: each particle takes its rank inside its key
//! with one `fetch_add`. After the scan every particle knows its unique
//! destination `start[key] + rank`, so the scatter writes never contend.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::scan::PrefixSum;

/// Sentinel stored in the offset table for keys with no particles.
///
/// Equal to the particle count of the last build, so it is not a constant.
pub fn empty_sentinel(particle_count: usize) -> u32 {
    particle_count as u32
}

/// Reusable buffers for [`CountingSort::sort`].
#[derive(Debug, Default)]
pub(crate) struct CountingSort {
    counts: Vec<AtomicU32>,
    starts: Vec<u32>,
    ranks: Vec<u32>,
    slots: Vec<AtomicU32>,
    runs: Vec<usize>,
    scan: PrefixSum,
}

impl CountingSort {
    /// Sort `0..keys.len()` by key into `sorted_indices` and write the matching
    /// keys into `sorted_keys`.
    ///
    /// With `deterministic` set, particles sharing a key keep their original
    /// relative order (stable sort); otherwise their order depends on thread
    /// timing.
    pub fn sort(
        &mut self,
        keys: &[u32],
        table_size: usize,
        deterministic: bool,
        sorted_indices: &mut Vec<u32>,
        sorted_keys: &mut Vec<u32>,
    ) {
        let n = keys.len();
        sorted_indices.resize(n, 0);
        sorted_keys.resize(n, 0);
        if n == 0 {
            return;
        }

        // --- 1. Histogram: rank of every particle within its key ---
        resize_atomic(&mut self.counts, table_size);
        self.counts.par_iter().for_each(|c| c.store(0, Ordering::Relaxed));
        self.ranks.resize(n, 0);
        let counts = &self.counts;
        self.ranks
            .par_iter_mut()
            .zip(keys.par_iter())
            .for_each(|(rank, &key)| {
                *rank = counts[key as usize].fetch_add(1, Ordering::Relaxed);
            });

        // --- 2. Scan counts into per-key start offsets ---
        self.starts.resize(table_size, 0);
        self.starts
            .par_iter_mut()
            .zip(self.counts.par_iter())
            .for_each(|(start, count)| *start = count.load(Ordering::Relaxed));
        let total = self.scan.exclusive_scan(&mut self.starts);
        debug_assert_eq!(total as usize, n);

        // --- 3. Scatter: every particle owns slot start[key] + rank ---
        resize_atomic(&mut self.slots, n);
        let starts = &self.starts;
        let slots = &self.slots;
        keys.par_iter()
            .zip(self.ranks.par_iter())
            .enumerate()
            .for_each(|(i, (&key, &rank))| {
                let dest = starts[key as usize] + rank;
                slots[dest as usize].store(i as u32, Ordering::Relaxed);
            });

        sorted_indices
            .par_iter_mut()
            .zip(sorted_keys.par_iter_mut())
            .zip(self.slots.par_iter())
            .for_each(|((index, key), slot)| {
                let i = slot.load(Ordering::Relaxed);
                *index = i;
                *key = keys[i as usize];
            });

        if deterministic {
            self.order_runs(sorted_indices, sorted_keys);
        }
    }

    /// Sort every run of equal keys by original index.
    fn order_runs(&mut self, sorted_indices: &mut [u32], sorted_keys: &[u32]) {
        self.runs.clear();
        let mut run_start = 0;
        for s in 1..=sorted_keys.len() {
            if s == sorted_keys.len() || sorted_keys[s] != sorted_keys[run_start] {
                self.runs.push(s - run_start);
                run_start = s;
            }
        }

        let mut chunks = Vec::with_capacity(self.runs.len());
        let mut rest = sorted_indices;
        for &len in &self.runs {
            let (run, tail) = std::mem::take(&mut rest).split_at_mut(len);
            if len > 1 {
                chunks.push(run);
            }
            rest = tail;
        }
        chunks.into_par_iter().for_each(|run| run.sort_unstable());
    }
}

/// Build the key -> first sorted slot table.
///
/// Two passes: every entry is reset to the sentinel, then each position whose
/// key differs from its predecessor records itself as that key's start. Keys
/// without particles keep the sentinel.
pub(crate) fn build_offsets(sorted_keys: &[u32], table_size: usize, offsets: &mut Vec<AtomicU32>) {
    let sentinel = empty_sentinel(sorted_keys.len());
    resize_atomic(offsets, table_size);
    offsets
        .par_iter()
        .for_each(|o| o.store(sentinel, Ordering::Relaxed));

    let offsets = &*offsets;
    sorted_keys.par_iter().enumerate().for_each(|(s, &key)| {
        if s == 0 || sorted_keys[s - 1] != key {
            offsets[key as usize].store(s as u32, Ordering::Relaxed);
        }
    });
}

fn resize_atomic(buf: &mut Vec<AtomicU32>, len: usize) {
    buf.truncate(len);
    buf.resize_with(len, || AtomicU32::new(0));
}

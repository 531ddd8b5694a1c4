//! Work-efficient exclusive prefix sum (Blelloch scan) over `u32` counters.
//!
//! The input is split into fixed blocks of [`BLOCK_SIZE`] elements. Every
//! block is scanned independently in a local, zero-padded tree buffer
//! (up-sweep, clear root, down-sweep) and emits its total into a per-block
//! sum array. The block sums are scanned with the same routine, recursively,
//! and a final combine pass adds each block's resolved base offset back into
//! its elements.
//!
//! Blocks run as rayon tasks. The end of each parallel iterator is the
//! barrier between the block pass, the block-sum scan and the combine pass;
//! inside a block every tree level completes before the next one starts.
//!
//! Accumulation is unsigned 32-bit and wraps on overflow. Keeping totals in
//! range is the caller's job.

use rayon::prelude::*;

/// Number of elements scanned by one block (one "workgroup").
pub const BLOCK_SIZE: usize = 512;

/// Number of block-sum levels the hierarchy is sized for up front.
///
/// Three levels cover `BLOCK_SIZE^3` (~134M) inputs; deeper inputs still
/// work, the extra level buffers are just allocated on demand.
pub const PREALLOCATED_LEVELS: usize = 3;

/// Reusable hierarchical scan buffers.
///
/// `group_sums[l]` holds the per-block totals of level `l`. The buffers are
/// cleared and refilled on every call, so one `PrefixSum` can be kept for the
/// lifetime of a simulation and reused every substep without reallocating.
#[derive(Debug, Clone)]
pub struct PrefixSum {
    group_sums: Vec<Vec<u32>>,
    last_levels: usize,
}

impl PrefixSum {
    /// Create an empty scanner.
    pub fn new() -> Self {
        Self {
            group_sums: Vec::with_capacity(PREALLOCATED_LEVELS),
            last_levels: 0,
        }
    }

    /// Create a scanner whose level buffers are already sized for inputs of
    /// up to `max_len` elements.
    pub fn with_capacity(max_len: usize) -> Self {
        let mut group_sums = Vec::with_capacity(PREALLOCATED_LEVELS);
        let mut len = max_len;
        while len > BLOCK_SIZE {
            len = len.div_ceil(BLOCK_SIZE);
            group_sums.push(Vec::with_capacity(len));
        }
        Self {
            group_sums,
            last_levels: 0,
        }
    }

    /// Replace `data` with its exclusive prefix sum and return the grand total.
    ///
    /// ```text
    /// out[i] = sum_{j < i} in[j]
    /// ```
    pub fn exclusive_scan(&mut self, data: &mut [u32]) -> u32 {
        let mut levels = 0;
        let mut len = data.len();
        while len > BLOCK_SIZE {
            len = len.div_ceil(BLOCK_SIZE);
            levels += 1;
        }
        self.last_levels = levels;
        scan_level(data, &mut self.group_sums, 0)
    }

    /// Number of block-sum levels used by the last scan.
    pub fn levels(&self) -> usize {
        self.last_levels
    }
}

impl Default for PrefixSum {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot exclusive scan with freshly allocated level buffers.
pub fn exclusive_scan(data: &mut [u32]) -> u32 {
    PrefixSum::new().exclusive_scan(data)
}

fn scan_level(data: &mut [u32], group_sums: &mut Vec<Vec<u32>>, level: usize) -> u32 {
    if data.len() <= BLOCK_SIZE {
        return scan_block(data);
    }

    if group_sums.len() <= level {
        group_sums.push(Vec::new());
    }
    // Taken out so the recursive call can borrow the deeper levels.
    let mut sums = std::mem::take(&mut group_sums[level]);
    sums.clear();
    sums.resize(data.len().div_ceil(BLOCK_SIZE), 0);

    // --- 1. Scan every block locally, emitting block totals ---
    data.par_chunks_mut(BLOCK_SIZE)
        .zip(sums.par_iter_mut())
        .for_each(|(block, total)| *total = scan_block(block));

    // --- 2. Scan the block totals into per-block base offsets ---
    let total = scan_level(&mut sums, group_sums, level + 1);

    // --- 3. Combine: add each block's base offset (block 0 has base 0) ---
    data.par_chunks_mut(BLOCK_SIZE)
        .zip(sums.par_iter())
        .skip(1)
        .for_each(|(block, &base)| {
            for v in block.iter_mut() {
                *v = v.wrapping_add(base);
            }
        });

    group_sums[level] = sums;
    total
}

/// Blelloch scan of a single block of at most [`BLOCK_SIZE`] elements.
///
/// Returns the block total.
fn scan_block(block: &mut [u32]) -> u32 {
    debug_assert!(block.len() <= BLOCK_SIZE);
    if block.is_empty() {
        return 0;
    }

    let mut tree = [0u32; BLOCK_SIZE];
    tree[..block.len()].copy_from_slice(block);

    // Up-sweep: build partial sums bottom-up.
    let mut offset = 1;
    let mut active = BLOCK_SIZE >> 1;
    while active > 0 {
        for lane in 0..active {
            let ai = offset * (2 * lane + 1) - 1;
            let bi = offset * (2 * lane + 2) - 1;
            tree[bi] = tree[bi].wrapping_add(tree[ai]);
        }
        offset <<= 1;
        active >>= 1;
    }

    let total = tree[BLOCK_SIZE - 1];
    tree[BLOCK_SIZE - 1] = 0;

    // Down-sweep: push prefixes back down the tree.
    let mut active = 1;
    while active < BLOCK_SIZE {
        offset >>= 1;
        for lane in 0..active {
            let ai = offset * (2 * lane + 1) - 1;
            let bi = offset * (2 * lane + 2) - 1;
            let left = tree[ai];
            tree[ai] = tree[bi];
            tree[bi] = tree[bi].wrapping_add(left);
        }
        active <<= 1;
    }

    block.copy_from_slice(&tree[..block.len()]);
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn naive_scan(input: &[u32]) -> (Vec<u32>, u32) {
        let mut out = Vec::with_capacity(input.len());
        let mut running = 0u32;
        for &v in input {
            out.push(running);
            running = running.wrapping_add(v);
        }
        (out, running)
    }

    #[test]
    fn small_example() {
        let mut data = vec![2, 1, 3, 2, 0, 1];
        let total = exclusive_scan(&mut data);
        assert_eq!(data, vec![0, 2, 3, 6, 8, 8]);
        assert_eq!(total, 9);
    }

    #[test]
    fn empty_input() {
        let mut data: Vec<u32> = Vec::new();
        assert_eq!(exclusive_scan(&mut data), 0);
        assert!(data.is_empty());
    }

    #[test]
    fn exactly_one_block() {
        let mut data = vec![1u32; BLOCK_SIZE];
        let total = exclusive_scan(&mut data);
        assert_eq!(total, BLOCK_SIZE as u32);
        for (i, &v) in data.iter().enumerate() {
            assert_eq!(v, i as u32);
        }
    }

    #[test]
    fn spans_two_levels() {
        // 513 blocks -> block sums need their own multi-block scan.
        let n = BLOCK_SIZE * BLOCK_SIZE + 7;
        let input: Vec<u32> = (0..n).map(|i| (i % 5) as u32).collect();
        let (expected, expected_total) = naive_scan(&input);

        let mut scanner = PrefixSum::new();
        let mut data = input.clone();
        let total = scanner.exclusive_scan(&mut data);
        assert_eq!(total, expected_total);
        assert_eq!(data, expected);
        assert_eq!(scanner.levels(), 2);
    }

    #[test]
    fn scanner_is_reusable_across_sizes() {
        let mut scanner = PrefixSum::with_capacity(10_000);
        for n in [10_000usize, 3, 1_500, 0, 600] {
            let input: Vec<u32> = (0..n).map(|i| (i * 7 % 11) as u32).collect();
            let (expected, expected_total) = naive_scan(&input);
            let mut data = input;
            assert_eq!(scanner.exclusive_scan(&mut data), expected_total);
            assert_eq!(data, expected);
        }
    }

    #[test]
    fn wraps_on_overflow() {
        let mut data = vec![u32::MAX, 2, 5];
        let total = exclusive_scan(&mut data);
        assert_eq!(data, vec![0, u32::MAX, 1]);
        assert_eq!(total, 6);
    }

    proptest! {
        #[test]
        fn matches_sequential_scan(input in prop::collection::vec(0u32..1000, 0..5000)) {
            let (expected, expected_total) = naive_scan(&input);
            let mut data = input.clone();
            let total = exclusive_scan(&mut data);
            prop_assert_eq!(total, expected_total);
            prop_assert_eq!(data, expected);
        }
    }
}

//! Counting-sort spatial grid for neighbor search.
//!
//! Uses sorted-index + cell-offset arrays rather than `HashMap` so the layout
//! stays flat (no pointer chasing) and every build pass is a data-parallel
//! loop. A build runs:
//!
//! 1. hash pass: key of every particle from its predicted position,
//! 2. histogram + scan: per-key ranks and start offsets,
//! 3. scatter: contention-free placement into sorted order,
//! 4. offset table: sentinel fill, then run starts.
//!
//! Reordering the particle arrays is the caller's job (it owns them); after it
//! calls [`SpatialGrid::mark_reordered`] the sorted order is the identity.

mod addressing;
mod counting_sort;

use std::sync::atomic::{AtomicU32, Ordering};

use glam::{IVec3, Vec3};
use rayon::prelude::*;

use crate::boundary::DomainBounds;
use crate::params::{NeighborBackend, SolverSettings};

pub use addressing::{CellAddressing, HashedAddressing, LinearAddressing, HASH_BLOCK_SIZE};
pub use counting_sort::empty_sentinel;

use counting_sort::{build_offsets, CountingSort};

/// The addressing resolved for the current build.
#[derive(Debug, Clone, Copy)]
enum Addressing {
    Hashed(HashedAddressing),
    Linear { grid: LinearAddressing, strip: bool },
}

impl Addressing {
    fn backend(&self) -> NeighborBackend {
        match self {
            Addressing::Hashed(_) => NeighborBackend::Hashed,
            Addressing::Linear { strip: false, .. } => NeighborBackend::Linear,
            Addressing::Linear { strip: true, .. } => NeighborBackend::LinearStrip,
        }
    }

    fn table_size(&self) -> usize {
        match self {
            Addressing::Hashed(a) => a.table_size(),
            Addressing::Linear { grid, .. } => grid.table_size(),
        }
    }

    fn key_of(&self, p: Vec3) -> u32 {
        match self {
            Addressing::Hashed(a) => a.key_of(p),
            Addressing::Linear { grid, .. } => grid.key_of(p),
        }
    }
}

/// Spatial grid rebuilt from predicted positions every (rebuilt) substep.
///
/// The cell size always equals the smoothing radius `h`, so scanning the 27
/// cells around a particle is guaranteed to find every particle within `h`.
#[derive(Debug)]
pub struct SpatialGrid {
    requested: NeighborBackend,
    max_linear_cells: usize,
    deterministic: bool,
    addressing: Option<Addressing>,
    radius: f32,
    /// Key per particle, in current particle order.
    keys: Vec<u32>,
    /// Particle indices ordered by key.
    sorted_indices: Vec<u32>,
    /// `keys[sorted_indices[s]]`.
    sorted_keys: Vec<u32>,
    /// First sorted slot per key, or the sentinel.
    cell_offsets: Vec<AtomicU32>,
    sorter: CountingSort,
}

impl SpatialGrid {
    /// Create an empty grid. Nothing is allocated until the first build.
    pub fn new(settings: &SolverSettings) -> Self {
        Self {
            requested: settings.backend,
            max_linear_cells: settings.max_linear_cells,
            deterministic: settings.deterministic_order,
            addressing: None,
            radius: 0.0,
            keys: Vec::new(),
            sorted_indices: Vec::new(),
            sorted_keys: Vec::new(),
            cell_offsets: Vec::new(),
            sorter: CountingSort::default(),
        }
    }

    /// Backend used by the last build, `None` before the first build.
    pub fn active_backend(&self) -> Option<NeighborBackend> {
        self.addressing.map(|a| a.backend())
    }

    /// `true` once a build has run and the grid can be queried.
    pub fn is_built(&self) -> bool {
        self.addressing.is_some()
    }

    /// Number of particles in the last build.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// `true` if the last build had no particles.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Cell key per particle (current particle order).
    pub fn keys(&self) -> &[u32] {
        &self.keys
    }

    /// Particle indices ordered by key.
    pub fn sorted_indices(&self) -> &[u32] {
        &self.sorted_indices
    }

    /// Keys in sorted order.
    pub fn sorted_keys(&self) -> &[u32] {
        &self.sorted_keys
    }

    /// Number of addressable keys.
    pub fn table_size(&self) -> usize {
        self.cell_offsets.len()
    }

    /// First sorted slot of `key`, or [`empty_sentinel`] if it holds nothing.
    #[inline]
    pub fn cell_offset(&self, key: u32) -> u32 {
        self.cell_offsets[key as usize].load(Ordering::Relaxed)
    }

    /// Drop the resolved addressing so the next build resolves it again.
    pub fn invalidate(&mut self) {
        self.addressing = None;
    }

    fn resolve(&self, h: f32, bounds: &DomainBounds, n: usize) -> Addressing {
        let hashed = || Addressing::Hashed(HashedAddressing::new(h, n));
        let cells = LinearAddressing::cell_count_for(h, bounds);
        let fits = cells <= self.max_linear_cells && cells <= u32::MAX as usize;
        let linear = |strip| {
            if !fits {
                tracing::warn!(
                    cells,
                    max_linear_cells = self.max_linear_cells,
                    "dense grid too large; using hashed grid"
                );
                return hashed();
            }
            Addressing::Linear {
                grid: LinearAddressing::new(h, bounds),
                strip,
            }
        };
        match self.requested {
            NeighborBackend::Hashed => hashed(),
            NeighborBackend::Linear => linear(false),
            NeighborBackend::LinearStrip => linear(true),
            NeighborBackend::Auto if fits => linear(true),
            NeighborBackend::Auto => hashed(),
        }
    }

    /// Rebuild the grid from `predicted` positions with cell size `h`.
    ///
    /// `h` must be positive; callers skip the grid stage otherwise.
    pub fn build(&mut self, predicted: &[Vec3], h: f32, bounds: &DomainBounds) {
        debug_assert!(h > 0.0);
        let n = predicted.len();

        let addressing = self.resolve(h, bounds, n);
        let previous = self.active_backend();
        if previous != Some(addressing.backend()) {
            tracing::info!(
                requested = ?self.requested,
                backend = ?addressing.backend(),
                table_size = addressing.table_size(),
                "neighbor grid backend selected"
            );
        }
        self.addressing = Some(addressing);
        self.radius = h;
        let table_size = addressing.table_size();

        // --- 1. Hash pass ---
        self.keys.resize(n, 0);
        self.keys
            .par_iter_mut()
            .zip(predicted.par_iter())
            .for_each(|(key, &p)| *key = addressing.key_of(p));

        // --- 2-3. Histogram, scan, scatter ---
        self.sorter.sort(
            &self.keys,
            table_size,
            self.deterministic,
            &mut self.sorted_indices,
            &mut self.sorted_keys,
        );

        // --- 4. Offset table ---
        build_offsets(&self.sorted_keys, table_size, &mut self.cell_offsets);
    }

    /// Record that the caller permuted its particle arrays by
    /// [`sorted_indices`](Self::sorted_indices): particle `s` is now the one
    /// that was at `sorted_indices[s]`.
    pub fn mark_reordered(&mut self) {
        self.keys.copy_from_slice(&self.sorted_keys);
        self.sorted_indices
            .par_iter_mut()
            .enumerate()
            .for_each(|(s, i)| *i = s as u32);
    }

    /// Call `f(j)` for every particle in the 27 cells around `p`.
    ///
    /// Candidates are not distance-filtered and include the querying particle
    /// itself. Each candidate is visited exactly once.
    pub fn for_each_candidate<F>(&self, p: Vec3, mut f: F)
    where
        F: FnMut(usize),
    {
        let Some(addressing) = self.addressing else {
            return;
        };
        if self.keys.is_empty() {
            return;
        }
        match addressing {
            Addressing::Hashed(a) => self.visit_hashed(&a, p, &mut f),
            Addressing::Linear { grid, strip: false } => self.visit_cells(&grid, p, &mut f),
            Addressing::Linear { grid, strip: true } => self.visit_strips(&grid, p, &mut f),
        }
    }

    /// Call `f(j, offset, dst_sq)` for every particle with `|pos_j - p|^2 < h^2`,
    /// where `offset = pos_j - p`.
    ///
    /// `positions` must be the array the grid was built from (or its reordered
    /// version after [`mark_reordered`](Self::mark_reordered)).
    #[inline]
    pub fn for_each_neighbor<F>(&self, p: Vec3, positions: &[Vec3], mut f: F)
    where
        F: FnMut(usize, Vec3, f32),
    {
        let radius_sq = self.radius * self.radius;
        self.for_each_candidate(p, |j| {
            let offset = positions[j] - p;
            let dst_sq = offset.length_squared();
            if dst_sq < radius_sq {
                f(j, offset, dst_sq);
            }
        });
    }

    #[inline]
    fn visit_run<F: FnMut(usize)>(&self, key: u32, f: &mut F) {
        let n = self.sorted_keys.len();
        let mut s = self.cell_offset(key) as usize;
        while s < n && self.sorted_keys[s] == key {
            f(self.sorted_indices[s] as usize);
            s += 1;
        }
    }

    fn visit_hashed<F: FnMut(usize)>(&self, a: &HashedAddressing, p: Vec3, f: &mut F) {
        let centre = a.cell_of(p);
        let mut keys = [0u32; 27];
        let mut count = 0;
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    keys[count] = a.key_of_cell(centre + IVec3::new(dx, dy, dz));
                    count += 1;
                }
            }
        }
        // Distinct cells can share a bucket; visit each bucket once.
        let keys = &mut keys[..count];
        keys.sort_unstable();
        let mut last = None;
        for &key in keys.iter() {
            if last == Some(key) {
                continue;
            }
            last = Some(key);
            self.visit_run(key, f);
        }
    }

    fn visit_cells<F: FnMut(usize)>(&self, grid: &LinearAddressing, p: Vec3, f: &mut F) {
        let centre = grid.cell_of(p);
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let cell = centre + IVec3::new(dx, dy, dz);
                    if grid.contains_cell(cell) {
                        self.visit_run(grid.key_of_cell(cell), f);
                    }
                }
            }
        }
    }

    /// One contiguous range per (dy, dz) row: the three cells of a row have
    /// consecutive keys, so their particles are adjacent in sorted order.
    fn visit_strips<F: FnMut(usize)>(&self, grid: &LinearAddressing, p: Vec3, f: &mut F) {
        let centre = grid.cell_of(p);
        let n = self.sorted_keys.len();
        let x_lo = (centre.x - 1).max(0);
        let x_hi = (centre.x + 1).min(grid.dims().x as i32 - 1);
        for dz in -1..=1 {
            for dy in -1..=1 {
                let row = IVec3::new(x_lo, centre.y + dy, centre.z + dz);
                if !grid.contains_cell(row) {
                    continue;
                }
                let key_lo = grid.key_of_cell(row);
                let key_hi = grid.key_of_cell(IVec3::new(x_hi, row.y, row.z));

                let Some(start) = (key_lo..=key_hi)
                    .map(|k| self.cell_offset(k) as usize)
                    .find(|&s| s < n)
                else {
                    continue;
                };
                let mut s = start;
                while s < n && self.sorted_keys[s] <= key_hi {
                    f(self.sorted_indices[s] as usize);
                    s += 1;
                }
            }
        }
    }
}

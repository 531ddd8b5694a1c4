//! Grid queries against brute force.
//!
//! For random clouds, every backend must report exactly the pairs a brute
//! force O(n^2) search finds, and the sorted index array must be a
//! permutation grouped by key.

use std::collections::BTreeSet;

use fluid_kernel::neighbor::empty_sentinel;
use fluid_kernel::{DomainBounds, NeighborBackend, SolverSettings, SpatialGrid};
use glam::Vec3;
use proptest::prelude::*;

const BACKENDS: [NeighborBackend; 3] = [
    NeighborBackend::Hashed,
    NeighborBackend::Linear,
    NeighborBackend::LinearStrip,
];

fn bounds() -> DomainBounds {
    DomainBounds::new(Vec3::splat(-1.0), Vec3::splat(1.0))
}

fn build(positions: &[Vec3], h: f32, backend: NeighborBackend, deterministic: bool) -> SpatialGrid {
    let settings = SolverSettings {
        backend,
        deterministic_order: deterministic,
        ..Default::default()
    };
    let mut grid = SpatialGrid::new(&settings);
    grid.build(positions, h, &bounds());
    grid
}

fn brute_force(positions: &[Vec3], i: usize, h: f32) -> BTreeSet<usize> {
    let p = positions[i];
    (0..positions.len())
        .filter(|&j| positions[j].distance_squared(p) < h * h)
        .collect()
}

fn cloud() -> impl Strategy<Value = Vec<Vec3>> {
    // A few points slightly outside the domain exercise clamped cells.
    prop::collection::vec(
        (-1.2f32..1.2, -1.2f32..1.2, -1.2f32..1.2).prop_map(|(x, y, z)| Vec3::new(x, y, z)),
        0..200,
    )
}

proptest! {
    #[test]
    fn queries_match_brute_force(positions in cloud(), h in 0.05f32..0.6) {
        for backend in BACKENDS {
            let grid = build(&positions, h, backend, true);
            for i in 0..positions.len() {
                let mut found = Vec::new();
                grid.for_each_neighbor(positions[i], &positions, |j, _, _| found.push(j));
                let unique: BTreeSet<usize> = found.iter().copied().collect();
                prop_assert_eq!(unique.len(), found.len(), "{:?} reported a neighbor twice", backend);
                prop_assert_eq!(unique, brute_force(&positions, i, h), "{:?} particle {}", backend, i);
            }
        }
    }

    #[test]
    fn sorted_indices_group_keys(positions in cloud(), h in 0.05f32..0.6, deterministic in any::<bool>()) {
        for backend in BACKENDS {
            let grid = build(&positions, h, backend, deterministic);
            let n = positions.len();

            let mut seen: Vec<u32> = grid.sorted_indices().to_vec();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..n as u32).collect::<Vec<_>>());

            let sorted_keys = grid.sorted_keys();
            prop_assert!(sorted_keys.windows(2).all(|w| w[0] <= w[1]));
            for (s, &i) in grid.sorted_indices().iter().enumerate() {
                prop_assert_eq!(sorted_keys[s], grid.keys()[i as usize]);
            }
            if deterministic {
                for w in grid.sorted_indices().windows(2).zip(sorted_keys.windows(2)) {
                    if w.1[0] == w.1[1] {
                        prop_assert!(w.0[0] < w.0[1]);
                    }
                }
            }
        }
    }

    #[test]
    fn offsets_point_at_run_starts(positions in cloud(), h in 0.05f32..0.6) {
        for backend in BACKENDS {
            let grid = build(&positions, h, backend, true);
            let n = positions.len();
            let sentinel = empty_sentinel(n);
            let sorted_keys = grid.sorted_keys();
            for key in 0..grid.table_size() as u32 {
                let offset = grid.cell_offset(key);
                match sorted_keys.iter().position(|&k| k == key) {
                    Some(first) => prop_assert_eq!(offset as usize, first),
                    None => prop_assert_eq!(offset, sentinel),
                }
            }
        }
    }
}

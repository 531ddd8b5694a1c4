//! Cell addressing: world position -> integer cell -> table key.
//!
//! Both backends use a cell size equal to the smoothing radius, so the 3x3x3
//! block of cells around a particle holds every particle within `h` of it.

use glam::{IVec3, UVec3, Vec3};

use crate::boundary::DomainBounds;

/// Maps positions to cells and cells to keys in `[0, table_size)`.
pub trait CellAddressing: Send + Sync {
    /// Integer cell containing `p`.
    fn cell_of(&self, p: Vec3) -> IVec3;

    /// Table key of `cell`.
    fn key_of_cell(&self, cell: IVec3) -> u32;

    /// Number of distinct keys.
    fn table_size(&self) -> usize;

    /// Table key of the cell containing `p`.
    #[inline]
    fn key_of(&self, p: Vec3) -> u32 {
        self.key_of_cell(self.cell_of(p))
    }
}

// ---------------------------------------------------------------------------
// Hashed
// ---------------------------------------------------------------------------

/// Edge length (in cells) of a hash super-block.
pub const HASH_BLOCK_SIZE: u32 = 50;

/// Offset applied before splitting a cell into block and local coordinates,
/// so the cells around the origin share one super-block.
const HASH_CELL_OFFSET: u32 = HASH_BLOCK_SIZE / 2;

const HASH_PRIMES: [u32; 3] = [15823, 9737333, 440817757];

/// Block hash reduced modulo a fixed table size.
///
/// Cells inside one super-block map to consecutive hashes, so neighboring
/// cells usually land in neighboring buckets. Distant cells may collide;
/// queries filter by distance anyway.
#[derive(Debug, Clone, Copy)]
pub struct HashedAddressing {
    inv_cell_size: f32,
    table_size: u32,
}

impl HashedAddressing {
    /// `table_size` is clamped to at least one bucket.
    pub fn new(cell_size: f32, table_size: usize) -> Self {
        Self {
            inv_cell_size: 1.0 / cell_size,
            table_size: table_size.clamp(1, u32::MAX as usize) as u32,
        }
    }

    /// Unreduced block hash of a cell.
    pub fn hash_cell(cell: IVec3) -> u32 {
        let ucell = UVec3::new(
            (cell.x as u32).wrapping_add(HASH_CELL_OFFSET),
            (cell.y as u32).wrapping_add(HASH_CELL_OFFSET),
            (cell.z as u32).wrapping_add(HASH_CELL_OFFSET),
        );
        let local = ucell % HASH_BLOCK_SIZE;
        let block = ucell / HASH_BLOCK_SIZE;
        let block_hash = block
            .x
            .wrapping_mul(HASH_PRIMES[0])
            .wrapping_add(block.y.wrapping_mul(HASH_PRIMES[1]))
            .wrapping_add(block.z.wrapping_mul(HASH_PRIMES[2]));
        // local < HASH_BLOCK_SIZE on every axis, so only the block term can wrap.
        let local_hash = local.x + HASH_BLOCK_SIZE * (local.y + HASH_BLOCK_SIZE * local.z);
        local_hash.wrapping_add(block_hash)
    }
}

impl CellAddressing for HashedAddressing {
    #[inline]
    fn cell_of(&self, p: Vec3) -> IVec3 {
        (p * self.inv_cell_size).floor().as_ivec3()
    }

    #[inline]
    fn key_of_cell(&self, cell: IVec3) -> u32 {
        Self::hash_cell(cell) % self.table_size
    }

    fn table_size(&self) -> usize {
        self.table_size as usize
    }
}

// ---------------------------------------------------------------------------
// Linear
// ---------------------------------------------------------------------------

/// Dense, collision-free addressing over the domain's bounding box.
///
/// Cells outside the box are clamped onto its border cells, so a particle
/// that escaped the domain is still indexed.
#[derive(Debug, Clone, Copy)]
pub struct LinearAddressing {
    origin: Vec3,
    inv_cell_size: f32,
    dims: UVec3,
}

impl LinearAddressing {
    /// Grid over the world-space bounding box of `bounds`.
    pub fn new(cell_size: f32, bounds: &DomainBounds) -> Self {
        let (min, max) = bounds.world_aabb();
        Self {
            origin: min,
            inv_cell_size: 1.0 / cell_size,
            dims: Self::dims_for(cell_size, min, max),
        }
    }

    /// Cell counts per axis for a box at the given cell size (at least one).
    pub fn dims_for(cell_size: f32, min: Vec3, max: Vec3) -> UVec3 {
        ((max - min) / cell_size).ceil().max(Vec3::ONE).as_uvec3()
    }

    /// Dense cell count a domain would need, saturating on overflow.
    pub fn cell_count_for(cell_size: f32, bounds: &DomainBounds) -> usize {
        let (min, max) = bounds.world_aabb();
        let dims = ((max - min) / cell_size).ceil().max(Vec3::ONE);
        let count = dims.x as f64 * dims.y as f64 * dims.z as f64;
        if count.is_finite() && count < usize::MAX as f64 {
            count as usize
        } else {
            usize::MAX
        }
    }

    /// Cells per axis.
    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    /// `true` if `cell` lies inside the grid.
    #[inline]
    pub fn contains_cell(&self, cell: IVec3) -> bool {
        cell.cmpge(IVec3::ZERO).all() && cell.cmplt(self.dims.as_ivec3()).all()
    }
}

impl CellAddressing for LinearAddressing {
    #[inline]
    fn cell_of(&self, p: Vec3) -> IVec3 {
        let max = self.dims.as_ivec3() - IVec3::ONE;
        ((p - self.origin) * self.inv_cell_size)
            .floor()
            .as_ivec3()
            .clamp(IVec3::ZERO, max)
    }

    #[inline]
    fn key_of_cell(&self, cell: IVec3) -> u32 {
        let c = cell.as_uvec3();
        c.x + self.dims.x * (c.y + self.dims.y * c.z)
    }

    fn table_size(&self) -> usize {
        self.dims.x as usize * self.dims.y as usize * self.dims.z as usize
    }
}

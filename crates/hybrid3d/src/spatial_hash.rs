//! Bucket-per-cell spatial hash over particle indices.
//!
//! The hash stores indices into the particle arena rather than references, so
//! rebuilding or growing the arena never invalidates it. Buckets preserve
//! insertion order, which keeps the stochastic seeding and the per-face
//! averages reproducible for a fixed seed.

use glam::UVec3;

use crate::grid::Grid3;

pub struct SpatialHash {
    table: Grid3<Vec<u32>>,
    /// Raw indices of cells that received their first particle, in the order
    /// they became occupied.
    occupied: Vec<usize>,
    total: usize,
}

impl SpatialHash {
    pub fn new(size: UVec3) -> Self {
        Self {
            table: Grid3::new(size),
            occupied: Vec::new(),
            total: 0,
        }
    }

    pub fn size(&self) -> UVec3 {
        self.table.size()
    }

    /// Number of hashed particles.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Reallocate for a new grid size, dropping all buckets.
    pub fn resize(&mut self, size: UVec3) {
        self.table = Grid3::new(size);
        self.occupied.clear();
        self.total = 0;
    }

    /// Empty all buckets. Only occupied cells are visited.
    pub fn clear(&mut self) {
        for &raw in &self.occupied {
            self.table.as_mut_slice()[raw].clear();
        }
        self.occupied.clear();
        self.total = 0;
    }

    /// Append a particle index to the bucket of `cell`. The cell must be in
    /// bounds.
    pub fn insert(&mut self, cell: UVec3, particle: u32) {
        let raw = self.table.raw_index(cell);
        let bucket = &mut self.table.as_mut_slice()[raw];
        if bucket.is_empty() {
            self.occupied.push(raw);
        }
        bucket.push(particle);
        self.total += 1;
    }

    /// Particle indices in `cell`, in insertion order.
    pub fn bucket(&self, cell: UVec3) -> &[u32] {
        &self.table[cell]
    }

    pub fn count_at(&self, cell: UVec3) -> usize {
        self.table[cell].len()
    }

    /// Visit every particle index in the inclusive cell box
    /// `[cell - back, cell + fwd]`, clamped to the grid. Cells are walked in
    /// x-fastest order, buckets in insertion order.
    pub fn for_all_nearby(&self, cell: UVec3, back: UVec3, fwd: UVec3, mut f: impl FnMut(u32)) {
        let min = UVec3::new(
            cell.x.saturating_sub(back.x),
            cell.y.saturating_sub(back.y),
            cell.z.saturating_sub(back.z),
        );
        let max = (cell + fwd).min(self.table.size() - UVec3::ONE);
        for z in min.z..=max.z {
            for y in min.y..=max.y {
                for x in min.x..=max.x {
                    for &index in &self.table[UVec3::new(x, y, z)] {
                        f(index);
                    }
                }
            }
        }
    }

    /// Occupied cells sorted by linearized index. This is the stable
    /// fluid-cell ordering the pressure solver builds its rows in.
    pub fn sorted_occupied_cells(&self) -> Vec<UVec3> {
        let mut raws = self.occupied.clone();
        raws.sort_unstable();
        raws.into_iter()
            .map(|raw| self.table.index_from_raw(raw))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_query() {
        let mut hash = SpatialHash::new(UVec3::splat(4));
        hash.insert(UVec3::new(1, 2, 3), 7);
        hash.insert(UVec3::new(1, 2, 3), 9);
        assert_eq!(hash.bucket(UVec3::new(1, 2, 3)), &[7, 9]);
        assert_eq!(hash.count_at(UVec3::new(0, 0, 0)), 0);
        assert_eq!(hash.len(), 2);
    }

    #[test]
    fn clear_empties_buckets() {
        let mut hash = SpatialHash::new(UVec3::splat(2));
        hash.insert(UVec3::ZERO, 0);
        hash.insert(UVec3::new(1, 1, 1), 1);
        hash.clear();
        assert!(hash.is_empty());
        assert_eq!(hash.count_at(UVec3::ZERO), 0);
        assert!(hash.sorted_occupied_cells().is_empty());
    }

    #[test]
    fn nearby_box_is_clamped() {
        let mut hash = SpatialHash::new(UVec3::splat(3));
        for z in 0..3 {
            for y in 0..3 {
                for x in 0..3 {
                    let cell = UVec3::new(x, y, z);
                    hash.insert(cell, hash.table.raw_index(cell) as u32);
                }
            }
        }

        // Corner query only sees the 2x2x2 block that exists.
        let mut seen = Vec::new();
        hash.for_all_nearby(UVec3::ZERO, UVec3::ONE, UVec3::ONE, |i| seen.push(i));
        assert_eq!(seen.len(), 8);

        // Center query sees everything.
        let mut seen = Vec::new();
        hash.for_all_nearby(UVec3::ONE, UVec3::ONE, UVec3::ONE, |i| seen.push(i));
        assert_eq!(seen.len(), 27);
    }

    #[test]
    fn occupied_cells_sorted_by_raw_index() {
        let mut hash = SpatialHash::new(UVec3::splat(3));
        hash.insert(UVec3::new(2, 2, 2), 0);
        hash.insert(UVec3::new(0, 1, 0), 1);
        hash.insert(UVec3::new(1, 0, 0), 2);
        hash.insert(UVec3::new(0, 1, 0), 3);
        let cells = hash.sorted_occupied_cells();
        assert_eq!(
            cells,
            vec![
                UVec3::new(1, 0, 0),
                UVec3::new(0, 1, 0),
                UVec3::new(2, 2, 2)
            ]
        );
    }
}

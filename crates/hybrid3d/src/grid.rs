//! Dense 3D storage and the staggered MAC fluid grid.

use std::ops::{Index, IndexMut};

use glam::{DVec3, IVec3, UVec3};

/// Inverse of the x-fastest linearization for a grid of the given size.
#[inline]
pub fn unravel_index(size: UVec3, raw: usize) -> UVec3 {
    let raw = raw as u32;
    let x = raw % size.x;
    let y = (raw / size.x) % size.y;
    let z = raw / (size.x * size.y);
    UVec3::new(x, y, z)
}

/// Cell classification for the pressure solve.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CellType {
    /// Solid obstacle (no flow). Solid cells are never rewritten by the
    /// transfers and their face velocities stay at the solid's velocity
    /// (zero).
    Solid,
    /// Contains fluid particles.
    Fluid,
    /// Empty air.
    #[default]
    Air,
}

/// Generic dense 3D array with contiguous storage, X-fastest.
///
/// `index = (z * ny + y) * nx + x`, so cells with consecutive X coordinates
/// are adjacent in memory. Reused for MAC cells, hash buckets and the
/// pressure solver's fluid-ordinal map.
#[derive(Clone, Debug)]
pub struct Grid3<T> {
    size: UVec3,
    cells: Vec<T>,
}

impl<T: Clone> Grid3<T> {
    /// Create a grid with every cell set to `value`.
    pub fn filled(size: UVec3, value: T) -> Self {
        let len = size.x as usize * size.y as usize * size.z as usize;
        Self {
            size,
            cells: vec![value; len],
        }
    }

    /// Reset every cell to `value`.
    pub fn fill(&mut self, value: T) {
        self.cells.fill(value);
    }
}

impl<T: Clone + Default> Grid3<T> {
    pub fn new(size: UVec3) -> Self {
        Self::filled(size, T::default())
    }
}

impl<T> Grid3<T> {
    pub fn size(&self) -> UVec3 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether `index` lies inside the grid.
    #[inline]
    pub fn contains(&self, index: UVec3) -> bool {
        index.cmplt(self.size).all()
    }

    /// Whether a signed `index` lies inside the grid.
    #[inline]
    pub fn contains_signed(&self, index: IVec3) -> bool {
        index.cmpge(IVec3::ZERO).all() && index.cmplt(self.size.as_ivec3()).all()
    }

    /// Linearize an (x, y, z) index.
    #[inline]
    pub fn raw_index(&self, index: UVec3) -> usize {
        debug_assert!(self.contains(index));
        ((index.z * self.size.y + index.y) * self.size.x + index.x) as usize
    }

    /// Inverse of [`raw_index`](Self::raw_index).
    #[inline]
    pub fn index_from_raw(&self, raw: usize) -> UVec3 {
        unravel_index(self.size, raw)
    }

    /// Cell at a signed index, or `None` when out of bounds.
    #[inline]
    pub fn get_signed(&self, index: IVec3) -> Option<&T> {
        if self.contains_signed(index) {
            Some(&self[index.as_uvec3()])
        } else {
            None
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.cells
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.cells
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.cells.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.cells.iter_mut()
    }
}

impl<T> Index<UVec3> for Grid3<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: UVec3) -> &T {
        &self.cells[self.raw_index(index)]
    }
}

impl<T> IndexMut<UVec3> for Grid3<T> {
    #[inline]
    fn index_mut(&mut self, index: UVec3) -> &mut T {
        let raw = self.raw_index(index);
        &mut self.cells[raw]
    }
}

/// A MAC grid cell: a type tag plus the three scalar face velocities stored
/// on this cell's +x, +y and +z faces.
///
/// The -x face of cell (i, j, k) is the +x face of (i-1, j, k); the faces on
/// the negative domain boundary are not stored and read as zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct Cell {
    pub cell_type: CellType,
    pub vel_posface: DVec3,
}

/// The staggered simulation grid: cells plus the world-space placement.
///
/// World position of the center of cell (i, j, k) is
/// `grid_offset + cell_size * (i + 0.5, j + 0.5, k + 0.5)`.
#[derive(Clone, Debug)]
pub struct FluidGrid {
    pub cells: Grid3<Cell>,
    pub grid_offset: DVec3,
    pub cell_size: f64,
}

impl FluidGrid {
    pub fn new(size: UVec3, cell_size: f64, grid_offset: DVec3) -> Self {
        Self {
            cells: Grid3::new(size),
            grid_offset,
            cell_size,
        }
    }

    pub fn size(&self) -> UVec3 {
        self.cells.size()
    }

    /// World position of the center of a cell.
    pub fn cell_center(&self, index: UVec3) -> DVec3 {
        self.grid_offset + self.cell_size * (index.as_dvec3() + DVec3::splat(0.5))
    }

    /// Cell index owning a world position, clamped into the grid.
    pub fn world_to_cell_clamped(&self, pos: DVec3) -> UVec3 {
        let grid_pos = (pos - self.grid_offset) / self.cell_size;
        grid_pos
            .floor()
            .max(DVec3::ZERO)
            .as_uvec3()
            .min(self.size() - UVec3::ONE)
    }

    /// Cell index for a world position, clamped at zero but not above: used
    /// to turn a world-space region into a candidate cell range.
    pub fn world_to_cell_unclamped(&self, pos: DVec3) -> UVec3 {
        let grid_pos = (pos - self.grid_offset) / self.cell_size;
        grid_pos.floor().max(DVec3::ZERO).as_uvec3()
    }

    /// Cell type at a signed index; everything outside the grid behaves as a
    /// solid wall.
    #[inline]
    pub fn cell_type_signed(&self, index: IVec3) -> CellType {
        match self.cells.get_signed(index) {
            Some(cell) => cell.cell_type,
            None => CellType::Solid,
        }
    }

    /// Velocities on the three negative faces of `index`: the +face values of
    /// the -x/-y/-z neighbors, zero on the negative domain boundary.
    #[inline]
    pub fn negative_face_velocities(&self, index: UVec3) -> DVec3 {
        let mut neg = DVec3::ZERO;
        if index.x > 0 {
            neg.x = self.cells[index - UVec3::X].vel_posface.x;
        }
        if index.y > 0 {
            neg.y = self.cells[index - UVec3::Y].vel_posface.y;
        }
        if index.z > 0 {
            neg.z = self.cells[index - UVec3::Z].vel_posface.z;
        }
        neg
    }

    /// Zero the face velocities stored on the outermost +x/+y/+z planes.
    /// Those faces sit on the rigid domain boundary.
    pub fn zero_boundary_velocities(&mut self) {
        let size = self.size();
        let max = size - UVec3::ONE;
        for z in 0..size.z {
            for y in 0..size.y {
                self.cells[UVec3::new(max.x, y, z)].vel_posface.x = 0.0;
            }
            for x in 0..size.x {
                self.cells[UVec3::new(x, max.y, z)].vel_posface.y = 0.0;
            }
        }
        for y in 0..size.y {
            for x in 0..size.x {
                self.cells[UVec3::new(x, y, max.z)].vel_posface.z = 0.0;
            }
        }
    }

    /// Mark a cell as a solid obstacle.
    pub fn set_solid(&mut self, index: UVec3) {
        if self.cells.contains(index) {
            let cell = &mut self.cells[index];
            cell.cell_type = CellType::Solid;
            cell.vel_posface = DVec3::ZERO;
        }
    }

    /// Zero all velocities and reset non-solid cells to air.
    pub fn reset(&mut self) {
        for cell in self.cells.iter_mut() {
            cell.vel_posface = DVec3::ZERO;
            if cell.cell_type != CellType::Solid {
                cell.cell_type = CellType::Air;
            }
        }
    }
}

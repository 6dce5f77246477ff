//! Hybrid particle/grid fluid simulation on a staggered 3D MAC grid.
//!
//! Three interchangeable transfer schemes — PIC, FLIP-blend and APIC — move
//! velocities between a marker-particle cloud and a uniform staggered grid.
//! The driver advances the cloud under gravity subject to incompressibility,
//! substepping by a CFL bound: advect, re-hash, transfer to grid, add
//! gravity, pressure-project, transfer back.
//!
//! # Example
//!
//! ```
//! use hybrid3d::{DVec3, HybridSimulation3D, TransferScheme, UVec3};
//!
//! let mut sim = HybridSimulation3D::new(1.0, UVec3::splat(8), DVec3::ZERO).unwrap();
//! sim.set_scheme(TransferScheme::Apic);
//! sim.reseed(42);
//! sim.seed_sphere(DVec3::new(4.0, 5.0, 4.0), 2.0, 2);
//!
//! let report = sim.update(1.0 / 60.0).unwrap();
//! assert!(!report.substeps.is_empty());
//! assert!(sim.particle_count() > 0);
//! ```

pub mod advection;
pub mod constants;
pub mod error;
pub mod grid;
pub mod kernels;
pub mod particle;
pub mod pressure;
pub mod spatial_hash;
pub mod transfer;

pub use error::{Result, SimulationError};
pub use glam::{DVec3, IVec3, UVec3};
pub use grid::{Cell, CellType, FluidGrid, Grid3};
pub use particle::{Particle3D, Particles3D};
pub use pressure::{Preconditioner, PressureParams, PressureSolver, SolveStats};
pub use spatial_hash::SpatialHash;
pub use transfer::TransferScheme;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use constants::{
    BOUNDARY_SKIN_FRACTION, DEFAULT_BLENDING_FACTOR, DEFAULT_CFL_NUMBER, DEFAULT_DENSITY,
    DEFAULT_GRAVITY, MAX_AUTO_SUBSTEP,
};

/// Diagnostics from one substep.
#[derive(Clone, Copy, Debug)]
pub struct SubstepDiagnostics {
    /// Substep length actually taken.
    pub dt: f64,
    /// Pressure solve outcome; `converged == false` is advisory.
    pub solve: SolveStats,
}

/// Diagnostics from one [`HybridSimulation3D::update`] call.
#[derive(Clone, Debug, Default)]
pub struct StepReport {
    pub substeps: Vec<SubstepDiagnostics>,
}

impl StepReport {
    /// Whether every pressure solve in this step converged.
    pub fn all_converged(&self) -> bool {
        self.substeps.iter().all(|s| s.solve.converged)
    }
}

/// Hybrid PIC / FLIP-blend / APIC fluid simulation.
///
/// The simulation exclusively owns the grid, the particle arena and the
/// spatial hash; the hash refers to particles by index and is rebuilt every
/// substep. FLIP additionally keeps a snapshot of the pre-projection grid,
/// allocated only while that scheme is active.
pub struct HybridSimulation3D {
    grid: FluidGrid,
    old_grid: Option<FluidGrid>,
    particles: Particles3D,
    hash: SpatialHash,
    rng: ChaCha8Rng,

    scheme: TransferScheme,
    blending_factor: f64,
    cfl_number: f64,
    density: f64,
    /// Gravity acceleration applied to every non-solid face each substep.
    pub gravity: DVec3,
    /// Advection keeps particles this far inside the domain walls.
    pub boundary_skin_width: f64,
    /// Tunables for the projection solve.
    pub pressure_params: PressureParams,

    poisoned: bool,
}

impl HybridSimulation3D {
    /// Create a simulation over a `size` grid of `cell_size` cells whose
    /// corner (0,0,0) sits at `grid_offset`.
    pub fn new(cell_size: f64, size: UVec3, grid_offset: DVec3) -> Result<Self> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "cell_size must be positive, got {cell_size}"
            )));
        }
        if size.cmpeq(UVec3::ZERO).any() {
            return Err(SimulationError::InvalidConfig(format!(
                "grid size must be non-zero along every axis, got {size}"
            )));
        }
        Ok(Self {
            grid: FluidGrid::new(size, cell_size, grid_offset),
            old_grid: None,
            particles: Particles3D::new(),
            hash: SpatialHash::new(size),
            rng: ChaCha8Rng::seed_from_u64(0),
            scheme: TransferScheme::default(),
            blending_factor: DEFAULT_BLENDING_FACTOR,
            cfl_number: DEFAULT_CFL_NUMBER,
            density: DEFAULT_DENSITY,
            gravity: DEFAULT_GRAVITY,
            boundary_skin_width: cell_size * BOUNDARY_SKIN_FRACTION,
            pressure_params: PressureParams::default(),
            poisoned: false,
        })
    }

    /// Reallocate the grid and hash for a new size. Particles survive and
    /// are re-hashed on the next substep.
    pub fn resize(&mut self, size: UVec3) -> Result<()> {
        if size.cmpeq(UVec3::ZERO).any() {
            return Err(SimulationError::InvalidConfig(format!(
                "grid size must be non-zero along every axis, got {size}"
            )));
        }
        self.grid = FluidGrid::new(size, self.grid.cell_size, self.grid.grid_offset);
        self.old_grid = None;
        self.hash.resize(size);
        Ok(())
    }

    /// Restart the seeding stream at a caller-provided seed.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Drop all particles, zero the grid and clear the blow-up flag. Solid
    /// cells stay solid.
    pub fn reset(&mut self) {
        self.particles.clear();
        self.hash.clear();
        self.grid.reset();
        self.old_grid = None;
        self.poisoned = false;
    }

    // ========== Configuration ==========

    pub fn scheme(&self) -> TransferScheme {
        self.scheme
    }

    /// Switch the transfer scheme. The FLIP snapshot grid is dropped when
    /// no longer needed and lazily reallocated when it is.
    pub fn set_scheme(&mut self, scheme: TransferScheme) {
        self.scheme = scheme;
        if scheme != TransferScheme::FlipBlend {
            self.old_grid = None;
        }
    }

    pub fn blending_factor(&self) -> f64 {
        self.blending_factor
    }

    /// FLIP/PIC blend: 0 degenerates to PIC, 1 is pure FLIP.
    pub fn set_blending_factor(&mut self, blend: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&blend) {
            return Err(SimulationError::InvalidConfig(format!(
                "blending_factor must be in [0, 1], got {blend}"
            )));
        }
        self.blending_factor = blend;
        Ok(())
    }

    pub fn cfl_number(&self) -> f64 {
        self.cfl_number
    }

    pub fn set_cfl_number(&mut self, cfl: f64) -> Result<()> {
        if !cfl.is_finite() || cfl <= 0.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "CFL number must be positive, got {cfl}"
            )));
        }
        self.cfl_number = cfl;
        Ok(())
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn set_density(&mut self, density: f64) -> Result<()> {
        if !density.is_finite() || density <= 0.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "density must be positive, got {density}"
            )));
        }
        self.density = density;
        Ok(())
    }

    // ========== Views ==========

    pub fn grid(&self) -> &FluidGrid {
        &self.grid
    }

    /// Mutable grid access, e.g. for marking solid obstacles before seeding.
    pub fn grid_mut(&mut self) -> &mut FluidGrid {
        &mut self.grid
    }

    /// Read-only view of the particles, for rendering or mesh extraction
    /// between substeps.
    pub fn particles(&self) -> &[Particle3D] {
        &self.particles.list
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// The spatial hash as of the last [`hash_particles`](Self::hash_particles).
    pub fn spatial_hash(&self) -> &SpatialHash {
        &self.hash
    }

    pub fn cell_size(&self) -> f64 {
        self.grid.cell_size
    }

    pub fn grid_offset(&self) -> DVec3 {
        self.grid.grid_offset
    }

    pub fn size(&self) -> UVec3 {
        self.grid.size()
    }

    // ========== Time stepping ==========

    /// Largest stable substep per unit CFL number:
    /// `cell_size / sqrt(max ||v||^2)`. Infinite when every particle is at
    /// rest, so the caller's full dt is taken in one substep.
    pub fn cfl(&self) -> f64 {
        self.grid.cell_size / self.particles.max_speed_squared().sqrt()
    }

    /// Advance wall-clock time by `dt`, consuming it in CFL-bounded
    /// substeps.
    pub fn update(&mut self, dt: f64) -> Result<StepReport> {
        let mut report = StepReport::default();
        if !dt.is_finite() || dt <= 0.0 {
            return Ok(report);
        }
        let mut remaining = dt;
        loop {
            let ts = self.cfl_number * self.cfl();
            if ts >= remaining {
                report.substeps.push(self.time_step(remaining)?);
                break;
            }
            report.substeps.push(self.time_step(ts)?);
            remaining -= ts;
        }
        Ok(report)
    }

    /// Take a single substep of the CFL-bounded size, capped at 33 ms for
    /// real-time seeding.
    pub fn time_step_auto(&mut self) -> Result<SubstepDiagnostics> {
        let ts = (self.cfl_number * self.cfl()).min(MAX_AUTO_SUBSTEP);
        self.time_step(ts)
    }

    /// Take one substep of exactly `dt`.
    pub fn time_step(&mut self, dt: f64) -> Result<SubstepDiagnostics> {
        if self.poisoned {
            return Err(SimulationError::NumericBlowup);
        }

        advection::advect_particles(&mut self.particles, dt);
        advection::clamp_to_domain(&mut self.particles, &self.grid, self.boundary_skin_width);
        self.hash_particles();
        self.transfer_to_grid();
        self.apply_gravity(dt);
        let solve = self.project(dt);
        self.transfer_from_grid();

        if !self.particles.all_finite() {
            self.poisoned = true;
            return Err(SimulationError::NumericBlowup);
        }
        Ok(SubstepDiagnostics { dt, solve })
    }

    /// Rebuild the spatial hash and reassign every particle's owning cell.
    pub fn hash_particles(&mut self) {
        self.hash.clear();
        let size = self.grid.size();
        let offset = self.grid.grid_offset;
        let inv_h = 1.0 / self.grid.cell_size;
        for (i, p) in self.particles.list.iter_mut().enumerate() {
            let grid_pos = (p.position - offset) * inv_h;
            p.grid_index = grid_pos
                .floor()
                .max(DVec3::ZERO)
                .as_uvec3()
                .min(size - UVec3::ONE);
            self.hash.insert(p.grid_index, i as u32);
        }
    }

    fn transfer_to_grid(&mut self) {
        match self.scheme {
            TransferScheme::Pic => {
                transfer::particles_to_grid_pic(&mut self.grid, &self.particles, &self.hash);
            }
            TransferScheme::Apic => {
                transfer::particles_to_grid_apic(&mut self.grid, &self.particles, &self.hash);
            }
            TransferScheme::FlipBlend => {
                transfer::particles_to_grid_pic(&mut self.grid, &self.particles, &self.hash);
                // Each particle takes the pre-projection grid velocity as
                // its FLIP reference, then the grid is snapshotted with the
                // boundary faces zeroed.
                transfer::grid_to_particles_pic(&self.grid, &mut self.particles);
                let size = self.grid.size();
                let cell_size = self.grid.cell_size;
                let offset = self.grid.grid_offset;
                let old = self
                    .old_grid
                    .get_or_insert_with(|| FluidGrid::new(size, cell_size, offset));
                old.clone_from(&self.grid);
                old.zero_boundary_velocities();
            }
        }
    }

    fn transfer_from_grid(&mut self) {
        match self.scheme {
            TransferScheme::Pic => {
                transfer::grid_to_particles_pic(&self.grid, &mut self.particles);
            }
            TransferScheme::Apic => {
                transfer::grid_to_particles_apic(&self.grid, &mut self.particles);
            }
            TransferScheme::FlipBlend => {
                if let Some(old) = self.old_grid.as_ref() {
                    transfer::grid_to_particles_flip(
                        &self.grid,
                        old,
                        &mut self.particles,
                        self.blending_factor,
                    );
                }
            }
        }
    }

    fn apply_gravity(&mut self, dt: f64) {
        let dv = self.gravity * dt;
        for cell in self.grid.cells.iter_mut() {
            if cell.cell_type != CellType::Solid {
                cell.vel_posface += dv;
            }
        }
    }

    fn project(&mut self, dt: f64) -> SolveStats {
        let fluid_cells: Vec<UVec3> = self
            .hash
            .sorted_occupied_cells()
            .into_iter()
            .filter(|&cell| self.grid.cells[cell].cell_type == CellType::Fluid)
            .collect();
        let mut solver = PressureSolver::new(&mut self.grid, &fluid_cells, self.pressure_params);
        let (pressure, stats) = solver.solve(dt, self.density);
        solver.apply_pressure(dt, self.density, &pressure);
        stats
    }

    // ========== Seeding ==========

    /// Top the cell's bucket up to `density^3` particles at uniform random
    /// positions inside the cell, all starting at `velocity`. Cells already
    /// at or above that count are left alone.
    pub fn seed_cell(&mut self, cell: UVec3, velocity: DVec3, density: usize) {
        if !self.grid.cells.contains(cell) {
            return;
        }
        let h = self.grid.cell_size;
        let origin = self.grid.grid_offset + cell.as_dvec3() * h;
        let target = density * density * density;
        for _ in self.hash.count_at(cell)..target {
            let position = origin
                + DVec3::new(
                    self.rng.gen_range(0.0..h),
                    self.rng.gen_range(0.0..h),
                    self.rng.gen_range(0.0..h),
                );
            self.insert_seeded(cell, position, velocity);
        }
    }

    /// Seed the axis-aligned box `[start, start + size]` at the given
    /// per-axis particle density (typically 2).
    pub fn seed_box(&mut self, start: DVec3, size: DVec3, density: usize) {
        let end = start + size;
        let lo = self.grid.world_to_cell_unclamped(start);
        let hi = self.grid.world_to_cell_unclamped(end);
        self.seed_region(lo, hi, density, move |p| {
            p.cmpgt(start).all() && p.cmplt(end).all()
        });
    }

    /// Seed a sphere at the given per-axis particle density (typically 2).
    pub fn seed_sphere(&mut self, center: DVec3, radius: f64, density: usize) {
        let lo = self
            .grid
            .world_to_cell_unclamped(center - DVec3::splat(radius));
        let hi = self
            .grid
            .world_to_cell_unclamped(center + DVec3::splat(radius));
        let sq_radius = radius * radius;
        self.seed_region(lo, hi, density, move |p| {
            (p - center).length_squared() < sq_radius
        });
    }

    /// Walk the candidate cell range, drawing up to `density^3` positions
    /// per under-populated cell and keeping the draws that pass the
    /// geometric predicate.
    fn seed_region<F: Fn(DVec3) -> bool>(&mut self, lo: UVec3, hi: UVec3, density: usize, inside: F) {
        let hi = hi.min(self.grid.size() - UVec3::ONE);
        let h = self.grid.cell_size;
        let target = density * density * density;
        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    let cell = UVec3::new(x, y, z);
                    let origin = self.grid.grid_offset + cell.as_dvec3() * h;
                    for _ in self.hash.count_at(cell)..target {
                        let position = origin
                            + DVec3::new(
                                self.rng.gen_range(0.0..h),
                                self.rng.gen_range(0.0..h),
                                self.rng.gen_range(0.0..h),
                            );
                        if inside(position) {
                            self.insert_seeded(cell, position, DVec3::ZERO);
                        }
                    }
                }
            }
        }
    }

    fn insert_seeded(&mut self, cell: UVec3, position: DVec3, velocity: DVec3) {
        let mut p = Particle3D::new(position, velocity);
        p.grid_index = cell;
        self.hash.insert(cell, self.particles.len() as u32);
        self.particles.list.push(p);
    }
}

//! Numeric defaults for the hybrid simulation.

use glam::DVec3;

/// Default CFL number used to size substeps from the fastest particle.
pub const DEFAULT_CFL_NUMBER: f64 = 3.0;

/// Cap on an auto-sized substep, in seconds. Keeps interactive seeding
/// responsive even when all particles are at rest (CFL alone would allow an
/// unbounded step).
pub const MAX_AUTO_SUBSTEP: f64 = 0.033;

/// Default gravity vector (m/s^2), -Y down.
pub const DEFAULT_GRAVITY: DVec3 = DVec3::new(0.0, -9.81, 0.0);

/// Default fluid density (water = 1).
pub const DEFAULT_DENSITY: f64 = 1.0;

/// Default FLIP/PIC blending factor.
pub const DEFAULT_BLENDING_FACTOR: f64 = 0.97;

/// Boundary skin width as a fraction of the cell size. Advection clamps
/// particles this far inside the grid walls.
pub const BOUNDARY_SKIN_FRACTION: f64 = 0.01;

/// Faces whose accumulated kernel weight falls below this are unsupported by
/// any particle and are zeroed instead of normalized.
pub const MIN_FACE_WEIGHT: f64 = 1e-6;

/// Default relative (infinity-norm) tolerance for the pressure solve.
pub const DEFAULT_PRESSURE_TOLERANCE: f64 = 1e-6;

/// Absolute floor added to the pressure tolerance so an all-zero right-hand
/// side converges immediately.
pub const PRESSURE_TOLERANCE_FLOOR: f64 = 1e-12;

/// Default iteration cap for the pressure solve.
pub const DEFAULT_MAX_PRESSURE_ITERATIONS: usize = 200;

/// Modified-incomplete-Cholesky tuning constant (off-diagonal lumping).
pub const MIC_TAU: f64 = 0.97;

/// Modified-incomplete-Cholesky safety constant: pivots smaller than
/// `MIC_SIGMA * diagonal` fall back to the plain diagonal.
pub const MIC_SIGMA: f64 = 0.25;

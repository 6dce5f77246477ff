//! Pressure projection: the variable-coefficient Poisson solve over fluid
//! cells and the velocity correction.
//!
//! Standard MAC discretization: free surface (p = 0) at air cells, no-flux
//! at solid cells and the domain walls. The system is solved with conjugate
//! gradient under either a diagonal or a modified-incomplete-Cholesky
//! preconditioner.

use glam::{IVec3, UVec3};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_PRESSURE_ITERATIONS, DEFAULT_PRESSURE_TOLERANCE, MIC_SIGMA, MIC_TAU,
    PRESSURE_TOLERANCE_FLOOR,
};
use crate::grid::{CellType, FluidGrid, Grid3};

/// Preconditioner for the conjugate-gradient solve.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preconditioner {
    /// Inverse-diagonal scaling. Cheap, weaker.
    Diagonal,
    /// MIC(0) with lumping of the dropped fill-in.
    #[default]
    IncompleteCholesky,
}

/// Tunables for the projection solve.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PressureParams {
    /// Relative infinity-norm tolerance: iteration stops once
    /// `max|r| <= tolerance * max|b|` plus a small absolute floor.
    pub tolerance: f64,
    pub max_iterations: usize,
    pub preconditioner: Preconditioner,
}

impl Default for PressureParams {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_PRESSURE_TOLERANCE,
            max_iterations: DEFAULT_MAX_PRESSURE_ITERATIONS,
            preconditioner: Preconditioner::default(),
        }
    }
}

/// Outcome of one projection solve.
///
/// Hitting the iteration cap is advisory, not an error: the partial pressure
/// field is still applied and `converged` reports false.
#[derive(Clone, Copy, Debug, Default)]
pub struct SolveStats {
    pub iterations: usize,
    /// Infinity norm of the final residual.
    pub residual: f64,
    pub converged: bool,
}

/// Per-row coefficients of the system matrix; the whole matrix is these
/// entries times `dt / (rho * h^2)`. The diagonal is the non-solid neighbor
/// count, `fluid_*pos` mark the +direction fluid neighbors carrying the
/// symmetric off-diagonal -1.
#[derive(Clone, Copy, Debug, Default)]
struct RowCoefs {
    nonsolid_neighbors: u8,
    fluid_xpos: bool,
    fluid_ypos: bool,
    fluid_zpos: bool,
}

const NOT_A_FLUID_CELL: u32 = u32::MAX;

const NEIGHBOR_OFFSETS: [IVec3; 6] = [
    IVec3::X,
    IVec3::Y,
    IVec3::Z,
    IVec3::NEG_X,
    IVec3::NEG_Y,
    IVec3::NEG_Z,
];

enum PreconData {
    /// `1 / A_ii` per row.
    Diagonal(Vec<f64>),
    /// `1 / L_ii` per row of the incomplete factor.
    Cholesky(Vec<f64>),
}

/// One projection over a fixed fluid-cell set.
///
/// `fluid_cells` must list the cells marked fluid after the transfer sweep,
/// ordered by linearized cell index; row i of the system corresponds to
/// `fluid_cells[i]`.
pub struct PressureSolver<'a> {
    grid: &'a mut FluidGrid,
    fluid_cells: &'a [UVec3],
    ordinals: Grid3<u32>,
    rows: Vec<RowCoefs>,
    a_scale: f64,
    params: PressureParams,
}

impl<'a> PressureSolver<'a> {
    pub fn new(grid: &'a mut FluidGrid, fluid_cells: &'a [UVec3], params: PressureParams) -> Self {
        let mut ordinals = Grid3::filled(grid.cells.size(), NOT_A_FLUID_CELL);
        for (i, &cell) in fluid_cells.iter().enumerate() {
            ordinals[cell] = i as u32;
        }
        Self {
            grid,
            fluid_cells,
            ordinals,
            rows: Vec::new(),
            a_scale: 0.0,
            params,
        }
    }

    /// Solve for the pressure. Returns one value per fluid cell (in
    /// `fluid_cells` order) and the solve diagnostics.
    pub fn solve(&mut self, dt: f64, density: f64) -> (Vec<f64>, SolveStats) {
        let n = self.fluid_cells.len();
        let h = self.grid.cell_size;
        self.a_scale = dt / (density * h * h);
        self.build_rows();

        let b = self.build_rhs();
        let tol = self.params.tolerance * inf_norm(&b) + PRESSURE_TOLERANCE_FLOOR;

        let mut pressure = vec![0.0; n];
        let mut r = b;
        let mut stats = SolveStats {
            iterations: 0,
            residual: inf_norm(&r),
            converged: false,
        };
        if n == 0 {
            stats.converged = true;
            return (pressure, stats);
        }
        if stats.residual <= tol || self.a_scale <= 0.0 {
            stats.converged = stats.residual <= tol;
            return (pressure, stats);
        }

        let precon = self.build_preconditioner();
        let mut z = vec![0.0; n];
        let mut q = vec![0.0; n];
        self.apply_preconditioner(&mut z, &mut q, &precon, &r);
        let mut s = z.clone();
        let mut sigma = dot(&z, &r);

        for iter in 0..self.params.max_iterations {
            self.apply_a(&mut z, &s);
            let zs = dot(&z, &s);
            if zs == 0.0 {
                break;
            }
            let alpha = sigma / zs;
            for i in 0..n {
                pressure[i] += alpha * s[i];
                r[i] -= alpha * z[i];
            }
            stats.iterations = iter + 1;
            stats.residual = inf_norm(&r);
            if stats.residual <= tol {
                stats.converged = true;
                break;
            }

            self.apply_preconditioner(&mut z, &mut q, &precon, &r);
            let sigma_new = dot(&z, &r);
            let beta = sigma_new / sigma;
            for i in 0..n {
                s[i] = z[i] + beta * s[i];
            }
            sigma = sigma_new;
        }

        (pressure, stats)
    }

    /// Subtract the pressure gradient from the face velocities:
    /// `u -= dt / (rho * h) * (p_b - p_a)` with p = 0 in air. Faces whose
    /// +neighbor is solid or outside the grid are pinned to the solid
    /// velocity (zero); faces stored on solid cells are left alone.
    pub fn apply_pressure(&mut self, dt: f64, density: f64, pressure: &[f64]) {
        let h = self.grid.cell_size;
        let scale = dt / (density * h);
        let size = self.grid.cells.size();

        for z in 0..size.z {
            for y in 0..size.y {
                for x in 0..size.x {
                    let pos = UVec3::new(x, y, z);
                    let a_type = self.grid.cells[pos].cell_type;
                    if a_type == CellType::Solid {
                        continue;
                    }
                    let at = pos.as_ivec3();
                    let p_a = self.pressure_of(pos, a_type, pressure);
                    let mut face = self.grid.cells[pos].vel_posface;

                    let x_type = self.grid.cell_type_signed(at + IVec3::X);
                    if x_type == CellType::Solid {
                        face.x = 0.0;
                    } else if a_type == CellType::Fluid || x_type == CellType::Fluid {
                        let p_b = self.pressure_of(pos + UVec3::X, x_type, pressure);
                        face.x -= scale * (p_b - p_a);
                    }

                    let y_type = self.grid.cell_type_signed(at + IVec3::Y);
                    if y_type == CellType::Solid {
                        face.y = 0.0;
                    } else if a_type == CellType::Fluid || y_type == CellType::Fluid {
                        let p_b = self.pressure_of(pos + UVec3::Y, y_type, pressure);
                        face.y -= scale * (p_b - p_a);
                    }

                    let z_type = self.grid.cell_type_signed(at + IVec3::Z);
                    if z_type == CellType::Solid {
                        face.z = 0.0;
                    } else if a_type == CellType::Fluid || z_type == CellType::Fluid {
                        let p_b = self.pressure_of(pos + UVec3::Z, z_type, pressure);
                        face.z -= scale * (p_b - p_a);
                    }

                    self.grid.cells[pos].vel_posface = face;
                }
            }
        }
    }

    #[inline]
    fn ordinal(&self, cell: UVec3) -> Option<usize> {
        let i = self.ordinals[cell];
        (i != NOT_A_FLUID_CELL).then_some(i as usize)
    }

    #[inline]
    fn pressure_of(&self, cell: UVec3, cell_type: CellType, pressure: &[f64]) -> f64 {
        if cell_type == CellType::Fluid {
            self.ordinal(cell).map_or(0.0, |i| pressure[i])
        } else {
            0.0
        }
    }

    fn build_rows(&mut self) {
        self.rows.clear();
        self.rows.reserve(self.fluid_cells.len());
        for &pos in self.fluid_cells {
            let at = pos.as_ivec3();
            let mut row = RowCoefs::default();
            for offset in NEIGHBOR_OFFSETS {
                if self.grid.cell_type_signed(at + offset) != CellType::Solid {
                    row.nonsolid_neighbors += 1;
                }
            }
            row.fluid_xpos = self.grid.cell_type_signed(at + IVec3::X) == CellType::Fluid;
            row.fluid_ypos = self.grid.cell_type_signed(at + IVec3::Y) == CellType::Fluid;
            row.fluid_zpos = self.grid.cell_type_signed(at + IVec3::Z) == CellType::Fluid;
            self.rows.push(row);
        }
    }

    /// `b_i = -(u_px - u_nx + u_py - u_ny + u_pz - u_nz) / h`, with faces
    /// touching a solid cell or the domain boundary carrying the solid's
    /// velocity (zero).
    fn build_rhs(&self) -> Vec<f64> {
        let scale = 1.0 / self.grid.cell_size;
        let mut b = vec![0.0; self.fluid_cells.len()];
        for (i, &pos) in self.fluid_cells.iter().enumerate() {
            let at = pos.as_ivec3();
            let vel = self.grid.cells[pos].vel_posface;

            let upx = if self.grid.cell_type_signed(at + IVec3::X) == CellType::Solid {
                0.0
            } else {
                vel.x
            };
            let upy = if self.grid.cell_type_signed(at + IVec3::Y) == CellType::Solid {
                0.0
            } else {
                vel.y
            };
            let upz = if self.grid.cell_type_signed(at + IVec3::Z) == CellType::Solid {
                0.0
            } else {
                vel.z
            };

            let mut unx = 0.0;
            if pos.x > 0 {
                let nb = self.grid.cells[pos - UVec3::X];
                if nb.cell_type != CellType::Solid {
                    unx = nb.vel_posface.x;
                }
            }
            let mut uny = 0.0;
            if pos.y > 0 {
                let nb = self.grid.cells[pos - UVec3::Y];
                if nb.cell_type != CellType::Solid {
                    uny = nb.vel_posface.y;
                }
            }
            let mut unz = 0.0;
            if pos.z > 0 {
                let nb = self.grid.cells[pos - UVec3::Z];
                if nb.cell_type != CellType::Solid {
                    unz = nb.vel_posface.z;
                }
            }

            b[i] = -scale * ((upx - unx) + (upy - uny) + (upz - unz));
        }
        b
    }

    fn build_preconditioner(&self) -> PreconData {
        match self.params.preconditioner {
            Preconditioner::Diagonal => PreconData::Diagonal(self.build_diagonal()),
            Preconditioner::IncompleteCholesky => PreconData::Cholesky(self.build_mic()),
        }
    }

    fn build_diagonal(&self) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| {
                if row.nonsolid_neighbors > 0 {
                    1.0 / (self.a_scale * f64::from(row.nonsolid_neighbors))
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn build_mic(&self) -> Vec<f64> {
        let mut precon = vec![0.0; self.fluid_cells.len()];
        for i in 0..self.fluid_cells.len() {
            let pos = self.fluid_cells[i];
            let diag = f64::from(self.rows[i].nonsolid_neighbors);
            if diag == 0.0 {
                continue;
            }

            // Dropped fill-in is accumulated separately so it can be lumped
            // back onto the diagonal with weight tau.
            let mut neg_e = 0.0;
            let mut neg_e_tau = 0.0;
            if pos.x > 0 {
                if let Some(j) = self.ordinal(pos - UVec3::X) {
                    let nb = self.rows[j];
                    let a = flag(nb.fluid_xpos) * precon[j];
                    neg_e += a * a;
                    neg_e_tau += flag(nb.fluid_xpos)
                        * (flag(nb.fluid_ypos) + flag(nb.fluid_zpos))
                        * precon[j]
                        * precon[j];
                }
            }
            if pos.y > 0 {
                if let Some(j) = self.ordinal(pos - UVec3::Y) {
                    let nb = self.rows[j];
                    let a = flag(nb.fluid_ypos) * precon[j];
                    neg_e += a * a;
                    neg_e_tau += flag(nb.fluid_ypos)
                        * (flag(nb.fluid_xpos) + flag(nb.fluid_zpos))
                        * precon[j]
                        * precon[j];
                }
            }
            if pos.z > 0 {
                if let Some(j) = self.ordinal(pos - UVec3::Z) {
                    let nb = self.rows[j];
                    let a = flag(nb.fluid_zpos) * precon[j];
                    neg_e += a * a;
                    neg_e_tau += flag(nb.fluid_zpos)
                        * (flag(nb.fluid_xpos) + flag(nb.fluid_ypos))
                        * precon[j]
                        * precon[j];
                }
            }

            let mut e = diag - (neg_e + MIC_TAU * neg_e_tau) * self.a_scale;
            if e < MIC_SIGMA * diag {
                e = diag;
            }
            precon[i] = 1.0 / (e * self.a_scale).sqrt();
        }
        precon
    }

    fn apply_preconditioner(&self, z: &mut [f64], q: &mut [f64], data: &PreconData, r: &[f64]) {
        match data {
            PreconData::Diagonal(inv_diag) => {
                for i in 0..r.len() {
                    z[i] = r[i] * inv_diag[i];
                }
            }
            PreconData::Cholesky(precon) => {
                // Forward solve L q = r.
                for i in 0..r.len() {
                    let pos = self.fluid_cells[i];
                    let mut neg_t = 0.0;
                    if pos.x > 0 {
                        if let Some(j) = self.ordinal(pos - UVec3::X) {
                            neg_t += flag(self.rows[j].fluid_xpos) * precon[j] * q[j];
                        }
                    }
                    if pos.y > 0 {
                        if let Some(j) = self.ordinal(pos - UVec3::Y) {
                            neg_t += flag(self.rows[j].fluid_ypos) * precon[j] * q[j];
                        }
                    }
                    if pos.z > 0 {
                        if let Some(j) = self.ordinal(pos - UVec3::Z) {
                            neg_t += flag(self.rows[j].fluid_zpos) * precon[j] * q[j];
                        }
                    }
                    q[i] = (r[i] - self.a_scale * neg_t) * precon[i];
                }
                // Backward solve L^T z = q.
                let size = self.grid.cells.size();
                for i in (0..r.len()).rev() {
                    let pos = self.fluid_cells[i];
                    let row = self.rows[i];
                    let mut neg_t = 0.0;
                    if pos.x + 1 < size.x {
                        if let Some(j) = self.ordinal(pos + UVec3::X) {
                            neg_t += flag(row.fluid_xpos) * z[j];
                        }
                    }
                    if pos.y + 1 < size.y {
                        if let Some(j) = self.ordinal(pos + UVec3::Y) {
                            neg_t += flag(row.fluid_ypos) * z[j];
                        }
                    }
                    if pos.z + 1 < size.z {
                        if let Some(j) = self.ordinal(pos + UVec3::Z) {
                            neg_t += flag(row.fluid_zpos) * z[j];
                        }
                    }
                    z[i] = (q[i] - self.a_scale * precon[i] * neg_t) * precon[i];
                }
            }
        }
    }

    /// `out = A v`.
    fn apply_a(&self, out: &mut [f64], v: &[f64]) {
        let size = self.grid.cells.size();
        for i in 0..v.len() {
            let pos = self.fluid_cells[i];
            let row = self.rows[i];
            let mut value = f64::from(row.nonsolid_neighbors) * v[i];

            if pos.x > 0 {
                if let Some(j) = self.ordinal(pos - UVec3::X) {
                    value -= flag(self.rows[j].fluid_xpos) * v[j];
                }
            }
            if pos.y > 0 {
                if let Some(j) = self.ordinal(pos - UVec3::Y) {
                    value -= flag(self.rows[j].fluid_ypos) * v[j];
                }
            }
            if pos.z > 0 {
                if let Some(j) = self.ordinal(pos - UVec3::Z) {
                    value -= flag(self.rows[j].fluid_zpos) * v[j];
                }
            }

            if pos.x + 1 < size.x {
                if let Some(j) = self.ordinal(pos + UVec3::X) {
                    value -= flag(row.fluid_xpos) * v[j];
                }
            }
            if pos.y + 1 < size.y {
                if let Some(j) = self.ordinal(pos + UVec3::Y) {
                    value -= flag(row.fluid_ypos) * v[j];
                }
            }
            if pos.z + 1 < size.z {
                if let Some(j) = self.ordinal(pos + UVec3::Z) {
                    value -= flag(row.fluid_zpos) * v[j];
                }
            }

            out[i] = self.a_scale * value;
        }
    }
}

#[inline]
fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Discrete divergence at a cell from the stored face velocities, matching
/// the right-hand-side stencil (faces on the negative domain boundary read
/// zero).
pub fn discrete_divergence(grid: &FluidGrid, cell: UVec3) -> f64 {
    let vel = grid.cells[cell].vel_posface;
    let neg = grid.negative_face_velocities(cell);
    ((vel.x - neg.x) + (vel.y - neg.y) + (vel.z - neg.z)) / grid.cell_size
}

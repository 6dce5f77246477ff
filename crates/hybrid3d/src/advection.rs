//! Particle advection and domain clamping.

use glam::DVec3;

use crate::grid::FluidGrid;
use crate::particle::Particles3D;

/// Move every particle forward by its own velocity (forward Euler).
pub fn advect_particles(particles: &mut Particles3D, dt: f64) {
    for p in &mut particles.list {
        p.position += p.velocity * dt;
    }
}

/// Project particle positions back into the grid, keeping a skin of width
/// `skin` off every wall. Pure clamp: velocities are not reflected.
pub fn clamp_to_domain(particles: &mut Particles3D, grid: &FluidGrid, skin: f64) {
    let min = grid.grid_offset + DVec3::splat(skin);
    let max =
        grid.grid_offset + grid.size().as_dvec3() * grid.cell_size - DVec3::splat(skin);
    for p in &mut particles.list {
        p.position = p.position.clamp(min, max);
    }
}

//! Particle/grid transfer schemes: PIC, FLIP-blend and APIC.
//!
//! P2G: per non-solid cell, weighted averages of particle velocities at the
//! three +face midpoints using the trilinear tent kernel (3x3x3 bucket
//! neighborhood). G2P: per-axis lerp between the six faces of the owning
//! cell, plus scheme-specific extras (FLIP delta blend, APIC affine matrix
//! reconstruction).

use glam::{DVec3, UVec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::MIN_FACE_WEIGHT;
use crate::grid::{unravel_index, CellType, FluidGrid};
use crate::kernels::{lerp, lerp_vec, trilinear};
use crate::particle::{Particle3D, Particles3D};
use crate::spatial_hash::SpatialHash;

/// Which scheme moves velocities between particles and the grid.
///
/// Dispatched once per substep; the inner transfer loops are monomorphized.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferScheme {
    /// Particle-In-Cell: write velocity to the grid, read it back. Maximally
    /// dissipative.
    #[default]
    Pic,
    /// Convex blend between PIC and FLIP (particles keep the *change* in
    /// grid velocity).
    FlipBlend,
    /// Affine PIC: particles carry a velocity gradient matrix C.
    Apic,
}

/// PIC particle-to-grid. Cells with a non-empty bucket become fluid, the
/// rest air; solid cells are never rewritten.
pub fn particles_to_grid_pic(grid: &mut FluidGrid, particles: &Particles3D, hash: &SpatialHash) {
    scatter_to_grid::<false>(grid, particles, hash);
}

/// APIC particle-to-grid: each particle contributes
/// `v + C * (face_center - position)` so a locally affine velocity field
/// survives the round trip.
pub fn particles_to_grid_apic(grid: &mut FluidGrid, particles: &Particles3D, hash: &SpatialHash) {
    scatter_to_grid::<true>(grid, particles, hash);
}

fn scatter_to_grid<const AFFINE: bool>(
    grid: &mut FluidGrid,
    particles: &Particles3D,
    hash: &SpatialHash,
) {
    let h = grid.cell_size;
    let half = 0.5 * h;
    let size = grid.cells.size();
    let offset = grid.grid_offset;

    // Each cell writes only its own faces; particle and bucket reads are
    // shared immutable.
    grid.cells
        .as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(raw, cell)| {
            if cell.cell_type == CellType::Solid {
                return;
            }
            let index = unravel_index(size, raw);
            let center = offset + h * (index.as_dvec3() + DVec3::splat(0.5));
            let faces = [
                center + DVec3::new(half, 0.0, 0.0),
                center + DVec3::new(0.0, half, 0.0),
                center + DVec3::new(0.0, 0.0, half),
            ];

            let mut sum_vel = DVec3::ZERO;
            let mut sum_weight = DVec3::ZERO;
            hash.for_all_nearby(index, UVec3::ONE, UVec3::ONE, |pi| {
                let p = &particles.list[pi as usize];
                let w = DVec3::new(
                    trilinear(p.position - faces[0], h),
                    trilinear(p.position - faces[1], h),
                    trilinear(p.position - faces[2], h),
                );
                let src = if AFFINE {
                    p.velocity
                        + DVec3::new(
                            p.cx.dot(faces[0] - p.position),
                            p.cy.dot(faces[1] - p.position),
                            p.cz.dot(faces[2] - p.position),
                        )
                } else {
                    p.velocity
                };
                sum_weight += w;
                sum_vel += w * src;
            });

            cell.cell_type = if hash.count_at(index) > 0 {
                CellType::Fluid
            } else {
                CellType::Air
            };
            let normalize = |vel: f64, weight: f64| {
                if weight > MIN_FACE_WEIGHT {
                    vel / weight
                } else {
                    0.0
                }
            };
            cell.vel_posface = DVec3::new(
                normalize(sum_vel.x, sum_weight.x),
                normalize(sum_vel.y, sum_weight.y),
                normalize(sum_vel.z, sum_weight.z),
            );
        });
}

/// Interpolate the grid velocity at a particle: per-axis lerp between the
/// -face and +face of the owning cell.
fn sample_cell_velocity(grid: &FluidGrid, p: &Particle3D) -> DVec3 {
    let t = (p.position - grid.grid_offset) / grid.cell_size - p.grid_index.as_dvec3();
    let neg = grid.negative_face_velocities(p.grid_index);
    let pos = grid.cells[p.grid_index].vel_posface;
    lerp_vec(neg, pos, t)
}

/// PIC grid-to-particle: the particle takes the interpolated grid velocity.
pub fn grid_to_particles_pic(grid: &FluidGrid, particles: &mut Particles3D) {
    particles.list.par_iter_mut().for_each(|p| {
        p.velocity = sample_cell_velocity(grid, p);
    });
}

/// FLIP-blend grid-to-particle: `v = new + blend * (v - old)`, where `old`
/// is interpolated identically from the pre-projection snapshot. `blend = 0`
/// degenerates to PIC, `blend = 1` is pure FLIP.
pub fn grid_to_particles_flip(
    grid: &FluidGrid,
    old_grid: &FluidGrid,
    particles: &mut Particles3D,
    blend: f64,
) {
    particles.list.par_iter_mut().for_each(|p| {
        let new_vel = sample_cell_velocity(grid, p);
        let old_vel = sample_cell_velocity(old_grid, p);
        p.velocity = new_vel + blend * (p.velocity - old_vel);
    });
}

/// APIC grid-to-particle: PIC velocity update plus reconstruction of the
/// affine matrix C from the 3x3x3 face neighborhood.
pub fn grid_to_particles_apic(grid: &FluidGrid, particles: &mut Particles3D) {
    particles.list.par_iter_mut().for_each(|p| {
        p.velocity = sample_cell_velocity(grid, p);
        let (cx, cy, cz) = reconstruct_affine(grid, p);
        p.cx = cx;
        p.cy = cy;
        p.cz = cz;
    });
}

/// Clamp a face read `cell + d - 1` for the 3x3x3 gather. Returns the cell
/// whose +face to read and whether the read left the grid; the matching
/// velocity component is then zeroed (boundary faces are rigid).
#[inline]
fn clamp_face_read(coord: u32, d: u32, size: u32) -> (u32, bool) {
    let val = coord + d;
    if val < 1 {
        (0, true)
    } else if val >= size {
        (size - 1, true)
    } else {
        (val - 1, false)
    }
}

/// Analytic gradient of the trilinear interpolant over a unit cell at
/// fraction `f`. Corner order: bit 0 = +x, bit 1 = +y, bit 2 = +z.
fn trilinear_gradient(v: [f64; 8], f: DVec3) -> DVec3 {
    let gx = lerp(
        lerp(v[1] - v[0], v[3] - v[2], f.y),
        lerp(v[5] - v[4], v[7] - v[6], f.y),
        f.z,
    );
    let gy = lerp(
        lerp(v[2] - v[0], v[3] - v[1], f.x),
        lerp(v[6] - v[4], v[7] - v[5], f.x),
        f.z,
    );
    let gz = lerp(
        lerp(v[4] - v[0], v[5] - v[1], f.x),
        lerp(v[6] - v[2], v[7] - v[3], f.x),
        f.y,
    );
    DVec3::new(gx, gy, gz)
}

/// Rebuild the rows of C for one particle.
///
/// Per axis, the face velocities around the owning cell form an 8-point
/// stencil: along the component's own axis the owning cell's -face and +face
/// are read directly, across the other two axes the 2x2x2 window containing
/// the particle's half-shifted position is selected. A `t - 1/2` component
/// exactly at zero keeps the + window.
fn reconstruct_affine(grid: &FluidGrid, p: &Particle3D) -> (DVec3, DVec3, DVec3) {
    let size = grid.size();
    let h = grid.cell_size;

    // vels[dz][dy][dx]: +face velocities of the 3x3x3 cells around the
    // owning cell, with out-of-grid components zeroed.
    let mut vels = [[[DVec3::ZERO; 3]; 3]; 3];
    for dz in 0..3u32 {
        let (cz, z_out) = clamp_face_read(p.grid_index.z, dz, size.z);
        for dy in 0..3u32 {
            let (cy, y_out) = clamp_face_read(p.grid_index.y, dy, size.y);
            for dx in 0..3u32 {
                let (cx, x_out) = clamp_face_read(p.grid_index.x, dx, size.x);
                let mut v = grid.cells[UVec3::new(cx, cy, cz)].vel_posface;
                if x_out {
                    v.x = 0.0;
                }
                if y_out {
                    v.y = 0.0;
                }
                if z_out {
                    v.z = 0.0;
                }
                vels[dz as usize][dy as usize][dx as usize] = v;
            }
        }
    }

    let t = (p.position - grid.grid_offset) / h - p.grid_index.as_dvec3();
    let mut tmid = t - DVec3::splat(0.5);
    let mut wx = 1usize;
    let mut wy = 1usize;
    let mut wz = 1usize;
    if tmid.x < 0.0 {
        wx = 0;
        tmid.x += 1.0;
    }
    if tmid.y < 0.0 {
        wy = 0;
        tmid.y += 1.0;
    }
    if tmid.z < 0.0 {
        wz = 0;
        tmid.z += 1.0;
    }

    let vx = [
        vels[wz][wy][0].x,
        vels[wz][wy][1].x,
        vels[wz][wy + 1][0].x,
        vels[wz][wy + 1][1].x,
        vels[wz + 1][wy][0].x,
        vels[wz + 1][wy][1].x,
        vels[wz + 1][wy + 1][0].x,
        vels[wz + 1][wy + 1][1].x,
    ];
    let vy = [
        vels[wz][0][wx].y,
        vels[wz][0][wx + 1].y,
        vels[wz][1][wx].y,
        vels[wz][1][wx + 1].y,
        vels[wz + 1][0][wx].y,
        vels[wz + 1][0][wx + 1].y,
        vels[wz + 1][1][wx].y,
        vels[wz + 1][1][wx + 1].y,
    ];
    let vz = [
        vels[0][wy][wx].z,
        vels[0][wy][wx + 1].z,
        vels[0][wy + 1][wx].z,
        vels[0][wy + 1][wx + 1].z,
        vels[1][wy][wx].z,
        vels[1][wy][wx + 1].z,
        vels[1][wy + 1][wx].z,
        vels[1][wy + 1][wx + 1].z,
    ];

    let cx = trilinear_gradient(vx, DVec3::new(t.x, tmid.y, tmid.z)) / h;
    let cy = trilinear_gradient(vy, DVec3::new(tmid.x, t.y, tmid.z)) / h;
    let cz = trilinear_gradient(vz, DVec3::new(tmid.x, tmid.y, t.z)) / h;
    (cx, cy, cz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn hash_all(grid: &FluidGrid, particles: &mut Particles3D) -> SpatialHash {
        let mut hash = SpatialHash::new(grid.size());
        for (i, p) in particles.list.iter_mut().enumerate() {
            p.grid_index = grid.world_to_cell_clamped(p.position);
            hash.insert(p.grid_index, i as u32);
        }
        hash
    }

    #[test]
    fn p2g_particle_at_face_center_writes_exact_velocity() {
        let mut grid = FluidGrid::new(UVec3::splat(4), 1.0, DVec3::ZERO);
        let mut particles = Particles3D::new();
        particles.list.push(Particle3D::new(
            DVec3::new(2.0, 1.5, 1.5),
            DVec3::new(3.0, -1.0, 0.5),
        ));
        let hash = hash_all(&grid, &mut particles);

        particles_to_grid_pic(&mut grid, &particles, &hash);

        // The +x face of cell (1,1,1) sits exactly under the particle, so
        // the weighted average is the particle's x velocity.
        assert_relative_eq!(
            grid.cells[UVec3::new(1, 1, 1)].vel_posface.x,
            3.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn p2g_classifies_cells_by_bucket() {
        let mut grid = FluidGrid::new(UVec3::splat(4), 1.0, DVec3::ZERO);
        grid.set_solid(UVec3::new(0, 0, 0));
        let mut particles = Particles3D::new();
        particles
            .list
            .push(Particle3D::new(DVec3::splat(1.5), DVec3::ZERO));
        let hash = hash_all(&grid, &mut particles);

        particles_to_grid_pic(&mut grid, &particles, &hash);

        assert_eq!(
            grid.cells[UVec3::new(1, 1, 1)].cell_type,
            CellType::Fluid
        );
        assert_eq!(grid.cells[UVec3::new(3, 3, 3)].cell_type, CellType::Air);
        // Solid cells are never rewritten.
        assert_eq!(grid.cells[UVec3::new(0, 0, 0)].cell_type, CellType::Solid);
    }

    #[test]
    fn g2p_pic_interpolates_uniform_field() {
        let mut grid = FluidGrid::new(UVec3::splat(4), 1.0, DVec3::ZERO);
        for cell in grid.cells.iter_mut() {
            cell.vel_posface = DVec3::new(1.0, 2.0, 3.0);
        }
        let mut particles = Particles3D::new();
        particles
            .list
            .push(Particle3D::new(DVec3::new(1.7, 2.2, 1.4), DVec3::ZERO));
        particles.list[0].grid_index = UVec3::new(1, 2, 1);

        grid_to_particles_pic(&grid, &mut particles);

        let v = particles.list[0].velocity;
        assert_relative_eq!(v.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(v.y, 2.0, epsilon = 1e-12);
        assert_relative_eq!(v.z, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn flip_blend_zero_is_pic() {
        let mut grid = FluidGrid::new(UVec3::splat(4), 1.0, DVec3::ZERO);
        for cell in grid.cells.iter_mut() {
            cell.vel_posface = DVec3::new(0.5, 0.0, 0.0);
        }
        let old_grid = grid.clone();

        let mut particles = Particles3D::new();
        particles.list.push(Particle3D::new(
            DVec3::new(1.5, 1.5, 1.5),
            DVec3::new(9.0, 9.0, 9.0),
        ));
        particles.list[0].grid_index = UVec3::new(1, 1, 1);

        grid_to_particles_flip(&grid, &old_grid, &mut particles, 0.0);
        let flip_vel = particles.list[0].velocity;

        particles.list[0].velocity = DVec3::new(9.0, 9.0, 9.0);
        grid_to_particles_pic(&grid, &mut particles);
        let pic_vel = particles.list[0].velocity;

        assert_relative_eq!(flip_vel.x, pic_vel.x, epsilon = 1e-12);
        assert_relative_eq!(flip_vel.y, pic_vel.y, epsilon = 1e-12);
        assert_relative_eq!(flip_vel.z, pic_vel.z, epsilon = 1e-12);
    }

    #[test]
    fn trilinear_gradient_of_linear_field() {
        // Corner samples of v = x + 2y + 3z over the unit cell.
        let mut v = [0.0; 8];
        for (corner, value) in v.iter_mut().enumerate() {
            let x = (corner & 1) as f64;
            let y = ((corner >> 1) & 1) as f64;
            let z = ((corner >> 2) & 1) as f64;
            *value = x + 2.0 * y + 3.0 * z;
        }
        for f in [
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(0.5, 0.25, 0.75),
            DVec3::new(1.0, 1.0, 1.0),
        ] {
            let g = trilinear_gradient(v, f);
            assert_relative_eq!(g.x, 1.0, epsilon = 1e-12);
            assert_relative_eq!(g.y, 2.0, epsilon = 1e-12);
            assert_relative_eq!(g.z, 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn apic_roundtrip_preserves_uniform_velocity() {
        let mut grid = FluidGrid::new(UVec3::splat(6), 1.0, DVec3::ZERO);
        let velocity = DVec3::new(1.25, -0.5, 2.0);

        // Two particles per axis per interior cell so every nearby face has
        // support.
        let mut particles = Particles3D::new();
        for z in 0..12 {
            for y in 0..12 {
                for x in 0..12 {
                    particles.list.push(Particle3D::new(
                        DVec3::new(
                            0.25 + x as f64 * 0.5,
                            0.25 + y as f64 * 0.5,
                            0.25 + z as f64 * 0.5,
                        ),
                        velocity,
                    ));
                }
            }
        }
        let hash = hash_all(&grid, &mut particles);

        particles_to_grid_apic(&mut grid, &particles, &hash);
        grid_to_particles_apic(&grid, &mut particles);

        // Interior particles see the constant field: velocity preserved,
        // reconstructed C is zero.
        for p in &particles.list {
            let idx = p.grid_index;
            let interior = (2..4).contains(&idx.x)
                && (2..4).contains(&idx.y)
                && (2..4).contains(&idx.z);
            if !interior {
                continue;
            }
            assert_relative_eq!(p.velocity.x, velocity.x, epsilon = 1e-10);
            assert_relative_eq!(p.velocity.y, velocity.y, epsilon = 1e-10);
            assert_relative_eq!(p.velocity.z, velocity.z, epsilon = 1e-10);
            assert!(p.cx.length() < 1e-10, "cx = {:?}", p.cx);
            assert!(p.cy.length() < 1e-10, "cy = {:?}", p.cy);
            assert!(p.cz.length() < 1e-10, "cz = {:?}", p.cz);
        }
    }
}

//! End-to-end scenarios: cell_size = 1, grid_offset = 0,
//! gravity = (0, -9.81, 0), rho = 1.

use approx::assert_relative_eq;
use hybrid3d::pressure::discrete_divergence;
use hybrid3d::{
    CellType, DVec3, FluidGrid, HybridSimulation3D, Preconditioner, PressureParams,
    PressureSolver, TransferScheme, UVec3,
};

fn tight_params() -> PressureParams {
    PressureParams {
        tolerance: 1e-8,
        ..PressureParams::default()
    }
}

/// S1: one resting particle under gravity, PIC, a single update(0.1).
#[test]
fn s1_single_particle_free_fall() {
    let mut sim = HybridSimulation3D::new(1.0, UVec3::splat(4), DVec3::ZERO).unwrap();
    sim.pressure_params = tight_params();
    sim.reseed(0);
    sim.seed_cell(UVec3::splat(2), DVec3::ZERO, 1);
    let y_before = sim.particles()[0].position.y;

    sim.update(0.1).unwrap();

    let p = &sim.particles()[0];
    assert_relative_eq!(p.velocity.y, -0.981, epsilon = 1e-9);
    let dy = p.position.y - y_before;
    assert!(
        (-0.05..=0.0).contains(&dy),
        "unexpected vertical displacement {dy}"
    );
}

/// S2: APIC block, ten substeps, divergence-free fluid cells after each
/// projection.
#[test]
fn s2_apic_block_stays_divergence_free() {
    let mut sim = HybridSimulation3D::new(1.0, UVec3::splat(8), DVec3::ZERO).unwrap();
    sim.set_scheme(TransferScheme::Apic);
    sim.pressure_params = tight_params();
    sim.reseed(4);
    // 2x2x2 block of cells centered on (4,4,4).
    sim.seed_box(DVec3::splat(3.0), DVec3::splat(2.0), 2);
    assert_eq!(sim.particle_count(), 8 * 8);

    for _ in 0..10 {
        let diag = sim.time_step(0.01).unwrap();
        assert!(diag.solve.converged);

        let grid = sim.grid();
        let size = grid.size();
        for z in 0..size.z {
            for y in 0..size.y {
                for x in 0..size.x {
                    let cell = UVec3::new(x, y, z);
                    if grid.cells[cell].cell_type != CellType::Fluid {
                        continue;
                    }
                    let div = discrete_divergence(grid, cell);
                    assert!(div.abs() <= 1e-6, "divergence {div} at {cell}");
                }
            }
        }
    }
}

/// S3: pure FLIP keeps an interior particle's velocity across a substep.
#[test]
fn s3_pure_flip_preserves_interior_velocity() {
    let mut sim = HybridSimulation3D::new(1.0, UVec3::splat(8), DVec3::ZERO).unwrap();
    sim.set_scheme(TransferScheme::FlipBlend);
    sim.set_blending_factor(1.0).unwrap();
    sim.gravity = DVec3::ZERO;
    sim.pressure_params = tight_params();
    sim.reseed(6);
    sim.seed_cell(UVec3::splat(4), DVec3::new(1.0, 0.0, 0.0), 1);

    sim.time_step(0.01).unwrap();

    let v = sim.particles()[0].velocity;
    assert_relative_eq!(v.x, 1.0, epsilon = 1e-8);
    assert_relative_eq!(v.y, 0.0, epsilon = 1e-8);
    assert_relative_eq!(v.z, 0.0, epsilon = 1e-8);
}

/// S4: stochastic sphere seeding matches the Monte-Carlo expectation
/// 8 * volume(sphere) / h^3 on average.
#[test]
fn s4_sphere_seeding_count_statistics() {
    let center = DVec3::splat(5.0);
    let radius: f64 = 3.0;
    let expected = 8.0 * (4.0 / 3.0) * std::f64::consts::PI * radius.powi(3);

    let mut total = 0usize;
    let seeds = [1u64, 2, 3, 4, 5];
    for &seed in &seeds {
        let mut sim = HybridSimulation3D::new(1.0, UVec3::splat(10), DVec3::ZERO).unwrap();
        sim.reseed(seed);
        sim.seed_sphere(center, radius, 2);
        total += sim.particle_count();
    }
    let mean = total as f64 / seeds.len() as f64;

    assert!(
        (mean - expected).abs() < 0.05 * expected,
        "mean particle count {mean}, expected about {expected}"
    );
}

/// S5: all-fluid cube with inflow on the -x column; projection balances
/// outflow against inflow (net flux zero, every cell divergence-free).
#[test]
fn s5_all_fluid_inflow_is_balanced() {
    for preconditioner in [Preconditioner::Diagonal, Preconditioner::IncompleteCholesky] {
        let size = UVec3::splat(6);
        let mut grid = FluidGrid::new(size, 1.0, DVec3::ZERO);
        let mut fluid_cells = Vec::new();
        for z in 0..size.z {
            for y in 0..size.y {
                for x in 0..size.x {
                    let cell = UVec3::new(x, y, z);
                    grid.cells[cell].cell_type = CellType::Fluid;
                    fluid_cells.push(cell);
                }
            }
        }
        for z in 0..size.z {
            for y in 0..size.y {
                grid.cells[UVec3::new(0, y, z)].vel_posface.x = 1.0;
            }
        }

        let params = PressureParams {
            tolerance: 1e-8,
            max_iterations: 500,
            preconditioner,
        };
        let dt = 0.1;
        let mut solver = PressureSolver::new(&mut grid, &fluid_cells, params);
        let (pressure, stats) = solver.solve(dt, 1.0);
        assert!(stats.converged, "{preconditioner:?} failed: {stats:?}");
        solver.apply_pressure(dt, 1.0, &pressure);

        let mut net_flux = 0.0;
        for &cell in &fluid_cells {
            let div = discrete_divergence(&grid, cell);
            net_flux += div;
            assert!(
                div.abs() <= 1e-6,
                "{preconditioner:?} left divergence {div} at {cell}"
            );
        }
        assert!(
            net_flux.abs() <= 1e-6,
            "{preconditioner:?} net flux {net_flux}"
        );

        // The walls stay closed.
        let max = size - UVec3::ONE;
        for a in 0..size.x {
            for b in 0..size.y {
                assert_eq!(grid.cells[UVec3::new(max.x, a, b)].vel_posface.x, 0.0);
                assert_eq!(grid.cells[UVec3::new(a, max.y, b)].vel_posface.y, 0.0);
                assert_eq!(grid.cells[UVec3::new(a, b, max.z)].vel_posface.z, 0.0);
            }
        }
    }
}

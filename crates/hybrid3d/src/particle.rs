//! Marker particles for the hybrid simulation.

use glam::{DVec3, UVec3};

/// A single marker particle.
///
/// The APIC affine velocity matrix C is stored as its three rows `cx`, `cy`,
/// `cz` to keep the particle flat and cache friendly; PIC and FLIP leave the
/// rows at zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct Particle3D {
    /// World position.
    pub position: DVec3,
    /// Current velocity.
    pub velocity: DVec3,
    /// Row of C multiplying offsets into the x velocity component.
    pub cx: DVec3,
    /// Row of C multiplying offsets into the y velocity component.
    pub cy: DVec3,
    /// Row of C multiplying offsets into the z velocity component.
    pub cz: DVec3,
    /// Index of the cell owning this particle, valid after the last hash.
    pub grid_index: UVec3,
}

impl Particle3D {
    pub fn new(position: DVec3, velocity: DVec3) -> Self {
        Self {
            position,
            velocity,
            ..Self::default()
        }
    }

    /// Affine velocity contribution `C * offset` evaluated row by row.
    #[inline]
    pub fn affine_velocity(&self, offset: DVec3) -> DVec3 {
        DVec3::new(
            self.cx.dot(offset),
            self.cy.dot(offset),
            self.cz.dot(offset),
        )
    }
}

/// Dense particle arena. The spatial hash refers to particles by index into
/// `list`, so pushing never invalidates the hash built afterwards.
#[derive(Clone, Debug, Default)]
pub struct Particles3D {
    pub list: Vec<Particle3D>,
}

impl Particles3D {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }

    /// Largest squared particle speed, zero when empty.
    pub fn max_speed_squared(&self) -> f64 {
        self.list
            .iter()
            .map(|p| p.velocity.length_squared())
            .fold(0.0, f64::max)
    }

    /// Whether every particle position and velocity is finite.
    pub fn all_finite(&self) -> bool {
        self.list
            .iter()
            .all(|p| p.position.is_finite() && p.velocity.is_finite())
    }
}

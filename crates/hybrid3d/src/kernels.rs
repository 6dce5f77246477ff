//! Interpolation kernels for the particle/grid transfers.

use glam::DVec3;

/// 1D tent weight with support `h`: `max(0, 1 - |d| / h)`.
#[inline]
pub fn tent_1d(d: f64, h: f64) -> f64 {
    (1.0 - (d / h).abs()).max(0.0)
}

/// Trilinear (tent-product) kernel with one-cell support. `delta` is the
/// offset from the sample point to the face center.
#[inline]
pub fn trilinear(delta: DVec3, h: f64) -> f64 {
    tent_1d(delta.x, h) * tent_1d(delta.y, h) * tent_1d(delta.z, h)
}

/// Linear interpolation between `a` and `b`.
#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Component-wise linear interpolation.
#[inline]
pub fn lerp_vec(a: DVec3, b: DVec3, t: DVec3) -> DVec3 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tent_peaks_at_zero() {
        assert_eq!(tent_1d(0.0, 1.0), 1.0);
        assert_eq!(tent_1d(0.5, 1.0), 0.5);
        assert_eq!(tent_1d(-0.5, 2.0), 0.75);
    }

    #[test]
    fn tent_zero_outside_support() {
        assert_eq!(tent_1d(1.0, 1.0), 0.0);
        assert_eq!(tent_1d(-2.5, 1.0), 0.0);
        assert_eq!(tent_1d(3.0, 2.0), 0.0);
    }

    #[test]
    fn tent_partition_of_unity() {
        // A point between two faces one cell apart gets complementary
        // weights.
        let h = 0.7;
        for t in [0.0, 0.2, 0.5, 0.9] {
            let sum = tent_1d(t * h, h) + tent_1d((1.0 - t) * h, h);
            assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn trilinear_is_separable() {
        let d = DVec3::new(0.25, -0.5, 0.1);
        let w = trilinear(d, 1.0);
        assert_relative_eq!(w, 0.75 * 0.5 * 0.9, epsilon = 1e-12);
    }

    #[test]
    fn lerp_endpoints() {
        assert_eq!(lerp(2.0, 4.0, 0.0), 2.0);
        assert_eq!(lerp(2.0, 4.0, 1.0), 4.0);
        assert_eq!(lerp(2.0, 4.0, 0.5), 3.0);
    }
}

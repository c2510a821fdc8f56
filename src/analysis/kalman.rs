// src/analysis/kalman.rs
//
// Constant-velocity Kalman filter for a single tracked object.
//
// State:       [x, y, vx, vy]  (pixels, pixels/frame)
// Measurement: [x, y]          (detection box center)
// Transition:  x_{k+1} = F x_k + w,  F = [[I₂, I₂], [0₂, I₂]]  (dt = 1 frame)
//
// Q and R are fixed diagonals from TrackerConfig. Two 4×4 products per
// predict, one 2×2 inversion per update; everything is stack-allocated.

use crate::types::{Point, TrackerConfig};
use tracing::warn;

// ============================================================================
// 4×4 / 2×2 MATRIX MATH (inline, no external dependency)
// ============================================================================

/// 4×4 matrix stored row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Mat4([f32; 16]);

impl Mat4 {
    const ZERO: Self = Self([0.0; 16]);

    fn identity() -> Self {
        Self::diagonal([1.0; 4])
    }

    fn diagonal(d: [f32; 4]) -> Self {
        let mut m = Self::ZERO;
        for (i, v) in d.iter().enumerate() {
            m.0[i * 4 + i] = *v;
        }
        m
    }

    #[inline]
    fn get(&self, r: usize, c: usize) -> f32 {
        self.0[r * 4 + c]
    }

    #[inline]
    fn set(&mut self, r: usize, c: usize, v: f32) {
        self.0[r * 4 + c] = v;
    }

    fn mul(&self, rhs: &Mat4) -> Mat4 {
        let mut out = Mat4::ZERO;
        for i in 0..4 {
            for j in 0..4 {
                let mut sum = 0.0f32;
                for k in 0..4 {
                    sum += self.get(i, k) * rhs.get(k, j);
                }
                out.set(i, j, sum);
            }
        }
        out
    }

    fn add(&self, rhs: &Mat4) -> Mat4 {
        let mut out = Mat4::ZERO;
        for i in 0..16 {
            out.0[i] = self.0[i] + rhs.0[i];
        }
        out
    }

    fn transpose(&self) -> Mat4 {
        let mut out = Mat4::ZERO;
        for i in 0..4 {
            for j in 0..4 {
                out.set(i, j, self.get(j, i));
            }
        }
        out
    }

    fn mul_vec(&self, v: &[f32; 4]) -> [f32; 4] {
        let mut out = [0.0f32; 4];
        for (i, o) in out.iter_mut().enumerate() {
            *o = (0..4).map(|j| self.get(i, j) * v[j]).sum();
        }
        out
    }
}

/// 2×2 matrix stored row-major.
#[derive(Debug, Clone, Copy)]
struct Mat2([f32; 4]);

impl Mat2 {
    fn invert(&self) -> Option<Mat2> {
        let [a, b, c, d] = self.0;
        let det = a * d - b * c;
        if det.abs() < 1e-9 {
            return None;
        }
        let inv = 1.0 / det;
        Some(Mat2([d * inv, -b * inv, -c * inv, a * inv]))
    }
}

// ============================================================================
// FILTER
// ============================================================================

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    /// [x, y, vx, vy]
    x: [f32; 4],
    p: Mat4,
    q: Mat4,
    f: Mat4,
    /// Measurement noise (isotropic)
    r: f32,
}

impl KalmanFilter {
    /// Start a filter at a first measurement with zero velocity.
    pub fn new(position: Point, config: &TrackerConfig) -> Self {
        let mut f = Mat4::identity();
        f.set(0, 2, 1.0);
        f.set(1, 3, 1.0);

        let q = Mat4::diagonal([
            config.process_noise_pos,
            config.process_noise_pos,
            config.process_noise_vel,
            config.process_noise_vel,
        ]);

        let p = Mat4::diagonal([
            config.measurement_noise,
            config.measurement_noise,
            config.initial_velocity_variance,
            config.initial_velocity_variance,
        ]);

        Self {
            x: [position.x, position.y, 0.0, 0.0],
            p,
            q,
            f,
            r: config.measurement_noise,
        }
    }

    /// Advance one frame. Returns the predicted position.
    pub fn predict(&mut self) -> Point {
        self.x = self.f.mul_vec(&self.x);
        // P = F P F' + Q
        self.p = self.f.mul(&self.p).mul(&self.f.transpose()).add(&self.q);
        self.position()
    }

    /// Fold in a position measurement.
    pub fn update(&mut self, measurement: Point) {
        // H = [I₂ | 0₂], so H P H' is the top-left 2×2 block of P
        let s = Mat2([
            self.p.get(0, 0) + self.r,
            self.p.get(0, 1),
            self.p.get(1, 0),
            self.p.get(1, 1) + self.r,
        ]);
        let s_inv = match s.invert() {
            Some(inv) => inv,
            None => {
                warn!("📐 Kalman: singular innovation covariance, skipping update");
                return;
            }
        };

        // K = P H' S⁻¹  (4×2); P H' is the first two columns of P
        let mut k = [[0.0f32; 2]; 4];
        for (i, row) in k.iter_mut().enumerate() {
            let (p0, p1) = (self.p.get(i, 0), self.p.get(i, 1));
            row[0] = p0 * s_inv.0[0] + p1 * s_inv.0[2];
            row[1] = p0 * s_inv.0[1] + p1 * s_inv.0[3];
        }

        let innovation = [measurement.x - self.x[0], measurement.y - self.x[1]];
        for i in 0..4 {
            self.x[i] += k[i][0] * innovation[0] + k[i][1] * innovation[1];
        }

        // P = (I - K H) P
        let mut i_kh = Mat4::identity();
        for (i, row) in k.iter().enumerate() {
            i_kh.set(i, 0, i_kh.get(i, 0) - row[0]);
            i_kh.set(i, 1, i_kh.get(i, 1) - row[1]);
        }
        self.p = i_kh.mul(&self.p);
    }

    pub fn position(&self) -> Point {
        Point::new(self.x[0], self.x[1])
    }

    pub fn velocity(&self) -> Point {
        Point::new(self.x[2], self.x[3])
    }

    /// Trace of the position block of P, a rough uncertainty measure.
    pub fn position_variance(&self) -> f32 {
        self.p.get(0, 0) + self.p.get(1, 1)
    }
}

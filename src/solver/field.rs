use nalgebra::Vector2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use wide::f64x4;

/// One 2-vector per cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorField {
    pub vx: Vec<f64>,
    pub vy: Vec<f64>,
}

impl VectorField {
    pub fn new(n: usize, val: Vector2<f64>) -> Self {
        Self {
            vx: vec![val.x; n],
            vy: vec![val.y; n],
        }
    }

    pub fn zeros(n: usize) -> Self {
        Self::new(n, Vector2::zeros())
    }

    pub fn from_fn<F>(n: usize, f: F) -> Self
    where
        F: Fn(usize) -> Vector2<f64>,
    {
        let (vx, vy) = (0..n)
            .map(|i| {
                let v = f(i);
                (v.x, v.y)
            })
            .unzip();
        Self { vx, vy }
    }

    pub fn len(&self) -> usize {
        self.vx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vx.is_empty()
    }

    pub fn get(&self, i: usize) -> Vector2<f64> {
        Vector2::new(self.vx[i], self.vy[i])
    }

    pub fn set(&mut self, i: usize, v: Vector2<f64>) {
        self.vx[i] = v.x;
        self.vy[i] = v.y;
    }

    /// `vx` and `vy` have the same length.
    pub fn is_consistent(&self) -> bool {
        self.vx.len() == self.vy.len()
    }

    pub fn is_finite(&self) -> bool {
        self.vx.iter().chain(&self.vy).all(|v| v.is_finite())
    }

    /// `self - other`, cell by cell.
    pub fn sub(&self, other: &VectorField) -> VectorField {
        assert_eq!(self.len(), other.len(), "field length mismatch");
        VectorField {
            vx: self.vx.iter().zip(&other.vx).map(|(a, b)| a - b).collect(),
            vy: self.vy.iter().zip(&other.vy).map(|(a, b)| a - b).collect(),
        }
    }

    /// `self += alpha * x`
    pub fn axpy(&mut self, alpha: f64, x: &VectorField) {
        assert_eq!(self.len(), x.len(), "field length mismatch");
        axpy_slice(&mut self.vx, alpha, &x.vx);
        axpy_slice(&mut self.vy, alpha, &x.vy);
    }

    pub fn scale(&mut self, s: f64) {
        self.vx.iter_mut().chain(self.vy.iter_mut()).for_each(|v| *v *= s);
    }

    pub fn max_abs_diff(&self, other: &VectorField) -> f64 {
        assert_eq!(self.len(), other.len(), "field length mismatch");
        self.vx
            .iter()
            .zip(&other.vx)
            .chain(self.vy.iter().zip(&other.vy))
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    /// Volume-weighted dot product `sum_c w_c (a_c . b_c)`.
    pub fn weighted_dot(&self, other: &VectorField, weights: &[f64]) -> f64 {
        assert_eq!(self.len(), other.len(), "field length mismatch");
        assert_eq!(self.len(), weights.len(), "weight length mismatch");
        weighted_dot_slice(&self.vx, &other.vx, weights)
            + weighted_dot_slice(&self.vy, &other.vy, weights)
    }
}

/// Per-cell 2x2 tensor, `T_ij = d_i u_j` (row = derivative direction).
#[derive(Clone, Debug, PartialEq)]
pub struct TensorField {
    pub xx: Vec<f64>,
    pub xy: Vec<f64>,
    pub yx: Vec<f64>,
    pub yy: Vec<f64>,
}

impl TensorField {
    pub fn zeros(n: usize) -> Self {
        Self {
            xx: vec![0.0; n],
            xy: vec![0.0; n],
            yx: vec![0.0; n],
            yy: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.xx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xx.is_empty()
    }

    /// Left contraction `(a . T)_j = sum_i a_i T_ij`, i.e. `(a . grad) u`
    /// when `self` is `grad u`.
    pub fn contract_left(&self, a: &VectorField) -> VectorField {
        assert_eq!(self.len(), a.len(), "field length mismatch");
        let (vx, vy) = (0..self.len())
            .into_par_iter()
            .map(|c| {
                let (ax, ay) = (a.vx[c], a.vy[c]);
                (
                    ax * self.xx[c] + ay * self.yx[c],
                    ax * self.xy[c] + ay * self.yy[c],
                )
            })
            .unzip();
        VectorField { vx, vy }
    }
}

fn axpy_slice(y: &mut [f64], alpha: f64, x: &[f64]) {
    let n = y.len();
    let v_alpha = f64x4::splat(alpha);
    let mut i = 0;
    while i + 4 <= n {
        let vy = f64x4::from(&y[i..i + 4]);
        let vx = f64x4::from(&x[i..i + 4]);
        let res: [f64; 4] = (vy + v_alpha * vx).into();
        y[i..i + 4].copy_from_slice(&res);
        i += 4;
    }
    while i < n {
        y[i] += alpha * x[i];
        i += 1;
    }
}

fn weighted_dot_slice(a: &[f64], b: &[f64], w: &[f64]) -> f64 {
    let mut sum = f64x4::splat(0.0);
    let n = a.len();
    let mut i = 0;
    while i + 4 <= n {
        let va = f64x4::from(&a[i..i + 4]);
        let vb = f64x4::from(&b[i..i + 4]);
        let vw = f64x4::from(&w[i..i + 4]);
        sum += va * vb * vw;
        i += 4;
    }
    let mut s = sum.reduce_add();
    while i < n {
        s += a[i] * b[i] * w[i];
        i += 1;
    }
    s
}

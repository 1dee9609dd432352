use crate::error::{PodError, PodResult};
use crate::pod::basis::check_shape;
use crate::solver::{FieldOperators, TensorField, VectorField};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

/// Dense `N x N x N` coefficient tensor, flat index `k + N*m + N*N*n`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticTensor {
    n: usize,
    data: Vec<f64>,
}

impl QuadraticTensor {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * n * n],
        }
    }

    pub fn from_flat(n: usize, data: Vec<f64>) -> PodResult<Self> {
        if data.len() != n * n * n {
            return Err(PodError::InvalidConfig(format!(
                "quadratic tensor of dimension {n} needs {} entries, got {}",
                n * n * n,
                data.len()
            )));
        }
        Ok(Self { n, data })
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn index(&self, k: usize, m: usize, n: usize) -> usize {
        k + self.n * m + self.n * self.n * n
    }

    #[inline]
    pub fn get(&self, k: usize, m: usize, n: usize) -> f64 {
        self.data[self.index(k, m, n)]
    }

    #[inline]
    pub fn set(&mut self, k: usize, m: usize, n: usize, value: f64) {
        let idx = self.index(k, m, n);
        self.data[idx] = value;
    }

    pub fn as_flat(&self) -> &[f64] {
        &self.data
    }

    /// `sum_{m,n} Q[k,m,n] a_m a_n`
    pub fn contract(&self, k: usize, a: &DVector<f64>) -> f64 {
        let mut sum = 0.0;
        for n in 0..self.n {
            let an = a[n];
            for m in 0..self.n {
                sum += self.get(k, m, n) * a[m] * an;
            }
        }
        sum
    }

    /// Leading `dim^3` block.
    pub fn truncate(&self, dim: usize) -> Self {
        let mut out = Self::zeros(dim);
        for n in 0..dim {
            for m in 0..dim {
                for k in 0..dim {
                    out.set(k, m, n, self.get(k, m, n));
                }
            }
        }
        out
    }
}

/// Reduced-order coefficients of the projected momentum equation:
///
/// `da_k/dt = C_k + sum_m L_km a_m + sum_{m,n} Q_kmn a_m a_n`
#[derive(Debug, Clone, PartialEq)]
pub struct GalerkinSystem {
    pub constant: DVector<f64>,
    /// Row `k`, column `m`.
    pub linear: DMatrix<f64>,
    pub quadratic: QuadraticTensor,
}

impl GalerkinSystem {
    pub fn dim(&self) -> usize {
        self.constant.len()
    }

    pub fn is_consistent(&self) -> bool {
        let n = self.dim();
        self.linear.nrows() == n && self.linear.ncols() == n && self.quadratic.dim() == n
    }

    /// Keeps the leading `dim` modes. Fails when asked for more than were
    /// assembled.
    pub fn truncate(&self, dim: usize) -> PodResult<Self> {
        if dim > self.dim() {
            return Err(PodError::DimensionExceedsTensors {
                requested: dim,
                available: self.dim(),
            });
        }
        Ok(Self {
            constant: self.constant.rows(0, dim).into_owned(),
            linear: self.linear.view((0, 0), (dim, dim)).into_owned(),
            quadratic: self.quadratic.truncate(dim),
        })
    }

    /// Right-hand side of the reduced system at state `a`.
    pub fn rhs(&self, a: &DVector<f64>) -> DVector<f64> {
        let lin = &self.linear * a;
        DVector::from_fn(self.dim(), |k, _| {
            self.constant[k] + lin[k] + self.quadratic.contract(k, a)
        })
    }
}

/// Builds the Galerkin coefficients for `modes` around `mean`, with total
/// kinematic viscosity `nu_total` (molecular plus artificial).
///
/// Every derived field (gradients, Laplacians and convective products) is
/// evaluated once up front; the tensor fill is then pure inner products.
pub fn assemble<O>(
    modes: &[VectorField],
    mean: &VectorField,
    nu_total: f64,
    ops: &O,
) -> PodResult<GalerkinSystem>
where
    O: FieldOperators + Sync,
{
    let n_cells = ops.n_cells();
    check_shape("mean field", mean, n_cells)?;
    for mode in modes {
        check_shape("basis mode", mode, n_cells)?;
    }
    if !nu_total.is_finite() {
        return Err(PodError::InvalidConfig(format!(
            "total viscosity must be finite, got {nu_total}"
        )));
    }

    let n = modes.len();
    log::info!("Assembling Galerkin system for {} modes on {} cells", n, n_cells);

    let grad_mean = ops.gradient(mean);
    let lap_mean = ops.laplacian(mean);
    let mean_conv_mean = grad_mean.contract_left(mean);

    let grad_modes: Vec<TensorField> = modes.par_iter().map(|m| ops.gradient(m)).collect();
    let lap_modes: Vec<VectorField> = modes.par_iter().map(|m| ops.laplacian(m)).collect();
    // U . grad(sigma_m) and sigma_m . grad(U)
    let mean_conv_mode: Vec<VectorField> =
        grad_modes.iter().map(|g| g.contract_left(mean)).collect();
    let mode_conv_mean: Vec<VectorField> =
        modes.iter().map(|m| grad_mean.contract_left(m)).collect();
    // sigma_m . grad(sigma_n), stored at m + N*n
    let mode_conv_mode: Vec<VectorField> = (0..n * n)
        .into_par_iter()
        .map(|idx| {
            let (m, nn) = (idx % n, idx / n);
            grad_modes[nn].contract_left(&modes[m])
        })
        .collect();

    log::debug!("Derived fields ready, filling coefficient tensors");

    let constant = DVector::from_fn(n, |k, _| {
        -ops.inner_product(&modes[k], &mean_conv_mean)
            + nu_total * ops.inner_product(&modes[k], &lap_mean)
    });

    let linear = DMatrix::from_fn(n, n, |k, m| {
        -ops.inner_product(&modes[k], &mean_conv_mode[m])
            - ops.inner_product(&modes[k], &mode_conv_mean[m])
            + nu_total * ops.inner_product(&modes[k], &lap_modes[m])
    });

    let flat: Vec<f64> = (0..n * n * n)
        .into_par_iter()
        .map(|idx| {
            let k = idx % n;
            let mn = idx / n;
            -ops.inner_product(&modes[k], &mode_conv_mode[mn])
        })
        .collect();
    let quadratic = QuadraticTensor::from_flat(n, flat)?;

    Ok(GalerkinSystem {
        constant,
        linear,
        quadratic,
    })
}

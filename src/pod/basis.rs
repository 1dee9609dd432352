use crate::error::{PodError, PodResult};
use crate::solver::{InnerProduct, VectorField};
use nalgebra::{DMatrix, DVector, SymmetricEigen};

/// Iteration cap handed to the symmetric eigensolver; exceeding it counts as
/// non-convergence.
pub const EIGEN_MAX_ITERATIONS: usize = 10_000;

/// Modes whose eigenvalue is below this fraction of the largest eigenvalue
/// span the null space of the snapshot set and are emitted as zero fields.
pub const DEGENERATE_EIGENVALUE_RATIO: f64 = 1e-12;

/// Eigen-pairs of the correlation matrix, sorted by eigenvalue descending.
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub eigenvalues: Vec<f64>,
    pub eigenvectors: Vec<DVector<f64>>,
}

/// One row of the energy table. `mode` is 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyRow {
    pub mode: usize,
    pub individual: f64,
    pub cumulative: f64,
    pub eigenvalue: f64,
}

#[derive(Debug, Clone)]
pub struct PodBasis {
    pub modes: Vec<VectorField>,
    /// All `nDim` eigenvalues, descending, even when fewer modes were built.
    pub eigenvalues: Vec<f64>,
    pub energy: Vec<EnergyRow>,
}

impl PodBasis {
    pub fn n_modes(&self) -> usize {
        self.modes.len()
    }
}

/// Fluctuation fields `snapshot_i - mean`.
pub fn fluctuations(snapshots: &[VectorField], mean: &VectorField) -> Vec<VectorField> {
    snapshots.iter().map(|s| s.sub(mean)).collect()
}

/// `C[m,n] = <f_m, f_n> / nDim`. Only `n >= m` is evaluated, the lower
/// triangle is mirrored.
pub fn correlation_matrix<P>(fluct: &[VectorField], ip: &P) -> DMatrix<f64>
where
    P: InnerProduct + ?Sized,
{
    let n_dim = fluct.len();
    let mut cmn = DMatrix::zeros(n_dim, n_dim);
    for m in 0..n_dim {
        for n in m..n_dim {
            let value = ip.inner_product(&fluct[m], &fluct[n]) / n_dim as f64;
            cmn[(m, n)] = value;
            cmn[(n, m)] = value;
        }
    }
    cmn
}

/// Solves the symmetric eigenproblem and orders the pairs by eigenvalue
/// descending. Negative round-off eigenvalues are clamped to zero.
pub fn solve_spectrum(cmn: &DMatrix<f64>) -> PodResult<Spectrum> {
    let dim = cmn.nrows();
    let eig = SymmetricEigen::try_new(cmn.clone(), f64::EPSILON, EIGEN_MAX_ITERATIONS)
        .ok_or(PodError::EigenNonConvergence { dim })?;

    if eig.eigenvalues.iter().any(|v| !v.is_finite()) {
        return Err(PodError::EigenNonConvergence { dim });
    }

    let mut indexed: Vec<(usize, f64)> = eig.eigenvalues.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));

    let eigenvalues = indexed
        .iter()
        .map(|&(_, e)| {
            if e < 0.0 {
                log::debug!("Clamping negative eigenvalue {:e} to zero", e);
            }
            e.max(0.0)
        })
        .collect();
    let eigenvectors = indexed
        .iter()
        .map(|&(i, _)| eig.eigenvectors.column(i).into_owned())
        .collect();

    Ok(Spectrum {
        eigenvalues,
        eigenvectors,
    })
}

/// Individual and cumulative energy percentages per mode.
///
/// A spectrum with zero total energy (all fluctuations vanish) reports 0%
/// for every mode instead of 0/0.
pub fn energy_table(eigenvalues: &[f64]) -> Vec<EnergyRow> {
    let total: f64 = eigenvalues.iter().sum();
    if total <= 0.0 {
        log::warn!("Snapshot set carries no fluctuation energy; reporting 0% for all modes");
    }

    let mut cumulative = 0.0;
    eigenvalues
        .iter()
        .enumerate()
        .map(|(i, &eigenvalue)| {
            let individual = if total > 0.0 {
                100.0 * eigenvalue / total
            } else {
                0.0
            };
            cumulative += individual;
            EnergyRow {
                mode: i + 1,
                individual,
                cumulative,
                eigenvalue,
            }
        })
        .collect()
}

/// Smallest number of modes whose cumulative energy reaches `percent`.
pub fn modes_for_energy(table: &[EnergyRow], percent: f64) -> Option<usize> {
    table
        .iter()
        .find(|row| row.cumulative + 1e-9 >= percent)
        .map(|row| row.mode)
}

/// `sigma_k = 1/(nDim λ_k) * sum_i v_k[i] sqrt(λ_k nDim) f_i`
///
/// Every fluctuation snapshot contributes, not only the first `nBasis`.
pub fn build_mode(fluct: &[VectorField], eigenvector: &DVector<f64>, eigenvalue: f64) -> VectorField {
    let n_dim = fluct.len() as f64;
    let n_cells = fluct.first().map_or(0, |f| f.len());
    let mut sigma = VectorField::zeros(n_cells);

    let scale = (eigenvalue * n_dim).sqrt();
    for (f, &v) in fluct.iter().zip(eigenvector.iter()) {
        sigma.axpy(v * scale, f);
    }
    sigma.scale(1.0 / (n_dim * eigenvalue));
    sigma
}

/// Extracts the first `n_basis` POD modes of `snapshots` around `mean`.
/// `n_basis == 0` selects all `nDim` modes.
pub fn extract_basis<P>(
    snapshots: &[VectorField],
    mean: &VectorField,
    ip: &P,
    n_basis: usize,
) -> PodResult<PodBasis>
where
    P: InnerProduct + ?Sized,
{
    let n_dim = snapshots.len();
    if n_dim == 0 {
        return Err(PodError::NoSnapshots);
    }
    if n_basis > n_dim {
        return Err(PodError::BasisCountExceedsSnapshots {
            requested: n_basis,
            available: n_dim,
        });
    }
    let n_basis = if n_basis == 0 { n_dim } else { n_basis };

    let n_cells = ip.n_cells();
    check_shape("mean field", mean, n_cells)?;
    for s in snapshots {
        check_shape("snapshot", s, n_cells)?;
    }

    let fluct = fluctuations(snapshots, mean);

    log::info!("Assembling {}x{} correlation matrix", n_dim, n_dim);
    let cmn = correlation_matrix(&fluct, ip);

    log::info!("Solving eigenvalue problem");
    let spectrum = solve_spectrum(&cmn)?;
    let energy = energy_table(&spectrum.eigenvalues);

    let lambda_max = spectrum.eigenvalues.first().copied().unwrap_or(0.0);
    let cutoff = lambda_max * DEGENERATE_EIGENVALUE_RATIO;

    let mut modes = Vec::with_capacity(n_basis);
    for k in 0..n_basis {
        let eigenvalue = spectrum.eigenvalues[k];
        if eigenvalue <= cutoff || eigenvalue <= 0.0 {
            log::warn!(
                "Mode {} has degenerate eigenvalue {:e}; writing a zero mode",
                k,
                eigenvalue
            );
            modes.push(VectorField::zeros(n_cells));
            continue;
        }
        log::debug!("Building mode {} (eigenvalue {:e})", k, eigenvalue);
        modes.push(build_mode(&fluct, &spectrum.eigenvectors[k], eigenvalue));
    }

    Ok(PodBasis {
        modes,
        eigenvalues: spectrum.eigenvalues,
        energy,
    })
}

pub(crate) fn check_shape(
    context: &'static str,
    field: &VectorField,
    expected: usize,
) -> PodResult<()> {
    if field.len() != expected || !field.is_consistent() {
        return Err(PodError::ShapeMismatch {
            context,
            expected,
            found: field.len(),
        });
    }
    Ok(())
}

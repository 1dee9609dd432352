use crate::error::PodResult;
use crate::pod::basis::check_shape;
use crate::solver::{InnerProduct, VectorField};
use nalgebra::DVector;

/// Modal coefficients `a_k = <sigma_k, snapshot - mean>` for one snapshot.
pub fn project_snapshot<P>(
    modes: &[VectorField],
    mean: &VectorField,
    snapshot: &VectorField,
    ip: &P,
) -> PodResult<DVector<f64>>
where
    P: InnerProduct + ?Sized,
{
    let n_cells = ip.n_cells();
    check_shape("snapshot", snapshot, n_cells)?;
    check_shape("mean field", mean, n_cells)?;
    for mode in modes {
        check_shape("basis mode", mode, n_cells)?;
    }

    let fluct = snapshot.sub(mean);
    Ok(project_fluctuation(modes, &fluct, ip))
}

/// Same as [`project_snapshot`] for a field that already has the mean removed.
pub fn project_fluctuation<P>(modes: &[VectorField], fluct: &VectorField, ip: &P) -> DVector<f64>
where
    P: InnerProduct + ?Sized,
{
    DVector::from_iterator(
        modes.len(),
        modes.iter().map(|mode| ip.inner_product(mode, fluct)),
    )
}

/// Projects every snapshot independently, preserving input order.
pub fn project_snapshots<P>(
    modes: &[VectorField],
    mean: &VectorField,
    snapshots: &[VectorField],
    ip: &P,
) -> PodResult<Vec<DVector<f64>>>
where
    P: InnerProduct + ?Sized,
{
    snapshots
        .iter()
        .map(|s| project_snapshot(modes, mean, s, ip))
        .collect()
}

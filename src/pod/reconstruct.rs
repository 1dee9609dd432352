use crate::error::{PodError, PodResult};
use crate::solver::VectorField;
use nalgebra::DVector;

/// `mean + sum_k a_k sigma_k`. Uses the leading `a.len()` modes.
pub fn reconstruct_field(
    mean: &VectorField,
    modes: &[VectorField],
    a: &DVector<f64>,
) -> PodResult<VectorField> {
    if a.len() > modes.len() {
        return Err(PodError::DimensionExceedsTensors {
            requested: a.len(),
            available: modes.len(),
        });
    }

    let mut field = mean.clone();
    for (mode, &coeff) in modes.iter().zip(a.iter()) {
        if mode.len() != mean.len() {
            return Err(PodError::ShapeMismatch {
                context: "basis mode",
                expected: mean.len(),
                found: mode.len(),
            });
        }
        field.axpy(coeff, mode);
    }
    Ok(field)
}

/// Reconstructs one field per coefficient vector, in the given order.
pub fn reconstruct_series<'a, I>(
    mean: &VectorField,
    modes: &[VectorField],
    coefficients: I,
) -> PodResult<Vec<VectorField>>
where
    I: IntoIterator<Item = &'a DVector<f64>>,
{
    coefficients
        .into_iter()
        .map(|a| reconstruct_field(mean, modes, a))
        .collect()
}

pub mod field;
pub mod fvm;
pub mod mesh;

pub use field::{TensorField, VectorField};
pub use fvm::{CellVolumes, FieldOperators, FvOperators, InnerProduct};

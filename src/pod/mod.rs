//! The POD / Galerkin reduced-order pipeline: basis extraction, projection,
//! Galerkin assembly, time integration and reconstruction.

pub mod basis;
pub mod galerkin;
pub mod projection;
pub mod reconstruct;
pub mod rom;

pub use basis::{energy_table, extract_basis, modes_for_energy, EnergyRow, PodBasis, Spectrum};
pub use galerkin::{assemble, GalerkinSystem, QuadraticTensor};
pub use projection::{project_snapshot, project_snapshots};
pub use reconstruct::{reconstruct_field, reconstruct_series};
pub use rom::{integrate, RomSettings, RomTrajectory};

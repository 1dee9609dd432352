//! File-based case handling: snapshot storage, dictionaries, the CSV files
//! passed between stages and the stage drivers.

pub mod config;
pub mod csv;
pub mod pipeline;
pub mod store;
pub mod synthetic;

pub use config::{CaseCadence, ControlDict, PodDict};
pub use pipeline::{
    case_summary, run_basis, run_precompute, run_project, run_reconstruct, run_rom, CaseSummary,
};
pub use store::{CaseDir, SnapshotStore, TimeDir, TimeSelection};
pub use synthetic::{write_synthetic_case, SyntheticCase};

pub mod case;
pub mod error;
pub mod pod;
pub mod solver;
pub mod trace;

pub use error::{PodError, PodResult};

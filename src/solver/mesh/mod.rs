pub mod structs;
pub mod structured;


pub use structs::*;
pub use structured::*;

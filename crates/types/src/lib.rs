// crates/types/src/lib.rs
pub mod job;
pub mod wire;

pub use job::*;
pub use wire::*;

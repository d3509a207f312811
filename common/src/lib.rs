pub mod job;
pub mod worker;

pub use job::*;
pub use worker::*;

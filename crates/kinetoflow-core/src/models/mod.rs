//! Domain models for KinetoFlow.

mod appointment;
mod catalog;
mod plan;
mod user;

pub use appointment::*;
pub use catalog::*;
pub use plan::*;
pub use user::*;

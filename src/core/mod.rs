//! Core constants, error types, and collaborator traits.
//!
//! Everything in here is shared by both roles and has no dependency on the
//! client or server lifecycles.

pub mod constants;
mod error;
mod traits;

pub use error::*;
pub use traits::*;

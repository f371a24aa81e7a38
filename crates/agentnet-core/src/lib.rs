//! Agentnet Core - Types, traits, and error handling

pub mod error;
pub mod protocol;
pub mod provenance;
pub mod sly;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use protocol::*;
pub use provenance::*;
pub use sly::{SlyData, SlyDelta};
pub use types::*;

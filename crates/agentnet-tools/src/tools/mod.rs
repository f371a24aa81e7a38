//! Individual tool implementations.
//!
//! Each tool is a self-contained module. To add a new tool, create a file
//! here, implement the Tool trait, and register it in
//! create_default_registry() in ../lib.rs.

pub mod bulletin;
pub mod clock;

//! preseed-iso library.
//!
//! The binary is a thin CLI over [`pipeline::run`]; every stage is exposed
//! here so integration tests can drive them individually.

pub mod acquire;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod inject;
pub mod interrupt;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod release;
pub mod repack;
pub mod scratch;
pub mod timing;
pub mod verify;

pub use error::{Error, Result, VerifyStep};

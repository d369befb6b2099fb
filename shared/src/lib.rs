//! Vortex shared library
//!
//! Wire types, the HTTP message codec, and the error taxonomy shared
//! between the tunnel client and tooling built on top of it.

pub mod codec;
pub mod error;
pub mod protocol;

pub use error::{Error, Result};

//! Error Handling Module
//!
//! - `RequestError`: every failure a start call can end with
//! - `ErrorKind`: coarse classification (transport, cancelled, duplicate, ...)
//! - `From` conversions for reqwest, serde_json and I/O errors
//!
//! Cache errors are part of the taxonomy but the engine only logs them; they
//! never reach a failure callback.

mod conversions;
pub mod types;

pub use types::*;

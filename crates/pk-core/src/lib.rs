//! pk-core: shared foundation for pdekit.
//!
//! Contains:
//! - comm (process group: single process and in-process thread groups)
//! - numeric (Real + tolerances + float helpers)
//! - error (shared error types)

pub mod comm;
pub mod error;
pub mod numeric;

pub use comm::{Comm, Communicator};
pub use error::{PkError, PkResult};
pub use numeric::*;

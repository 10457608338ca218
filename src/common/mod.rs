//! Common types and abstractions
//!
//! - Stream: unified async I/O abstraction
//! - Address: network address representation
//! - Error: unified error types

mod address;
mod stream;

pub use address::Address;
pub use stream::{AsyncReadWrite, IntoStream, Stream};

// Re-export error types from crate root
pub use crate::error::{Error, Result};

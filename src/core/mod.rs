//! Core types shared across depforge: the error taxonomy and the
//! user-facing error display path.

pub mod error;

pub use error::{DepforgeError, user_friendly_error};

//! Core broker types
//!
//! - Errors: the failure taxonomy shared by every component
//! - Exceptions: system and user exceptions as carried in replies
//! - Object references: type id, endpoint and object key, IOR encoding
//! - Locators: `corbaloc:`, `corbaname:` and `IOR:` strings

mod error;
mod exception;
mod locator;
mod objref;

pub use error::*;
pub use exception::*;
pub use locator::*;
pub use objref::*;

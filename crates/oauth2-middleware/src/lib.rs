#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![forbid(unsafe_code)]

mod client;
pub mod error;
pub mod grant_types;
mod middleware;
mod storage;
#[cfg(test)]
mod test_support;
mod token;
mod transport;

pub use client::*;
pub use error::{Error, Result};
pub use grant_types::{Grant, GrantType};
pub use middleware::*;
pub use storage::*;
pub use token::*;
pub use transport::{HttpRequest, HttpResponse, HttpTransport};

/// Helper function to ensure that a string is ASCII.
///
/// # Errors
/// Fails with `InvalidHeaderValue` if the string is not ASCII.
pub(crate) fn require_ascii(s: &str) -> Result<()> {
    if s.is_ascii() {
        Ok(())
    } else {
        Err(Error::InvalidHeaderValue)
    }
}

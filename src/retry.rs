//! Bounded retry without backoff.

use std::fmt::Display;

use log::warn;

/// Run `operation` until it succeeds or `max_attempts` attempts have failed,
/// returning the last error. The operation receives the 1-based attempt
/// number and is retried with identical inputs.
pub fn with_retry<T, E, F>(max_attempts: u32, label: &str, mut operation: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                warn!("Attempt {attempt}/{max_attempts} failed for {label}: {e} -- retrying");
                attempt += 1;
            }
            Err(e) => {
                warn!("Giving up on {label} after {max_attempts} attempts: {e}");
                return Err(e);
            }
        }
    }
}

/*!

This library provides the Testbed `Test` custom resource definition and its API client.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub use clients::create_test_crd;
pub use crd_ext::CrdExt;
pub use error::{Error, Result};
pub use test::{Component, Phase, Test, TestSpec, TestStatus};

pub mod clients;
pub mod constants;
mod crd_ext;
mod error;
pub mod system;

use constants::{MAX_NAME_LEN, RESERVED_NAMESPACES, RESERVED_PREFIX};
use snafu::ensure;

/// Check that `name` can be used as both a `Test` name and the name of its namespace, i.e. that it
/// is a DNS-1123 label which names neither the controller's namespace nor one of the cluster's
/// own.
pub fn validate_name(name: &str, controller_namespace: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_ends = !name.starts_with('-') && !name.ends_with('-');
    ensure!(
        !name.is_empty() && name.len() <= MAX_NAME_LEN && valid_chars && valid_ends,
        error::InvalidNameSnafu {
            name,
            max: MAX_NAME_LEN
        }
    );
    ensure!(
        name != controller_namespace
            && !RESERVED_NAMESPACES.contains(&name)
            && !name.starts_with(RESERVED_PREFIX),
        error::ReservedNameSnafu { name }
    );
    Ok(())
}

//! Secret resolution.
//!
//! `${NAME}` references in the resolved tree are filled from an injected
//! [`SecretSource`]. Resolved values live only in memory for the duration
//! of one resolution run; nothing in this module writes to disk.

mod http;
mod resolver;
mod source;

use regex::Regex;
use std::sync::LazyLock;

pub use http::HttpSecretSource;
pub use resolver::{SecretResolver, REQUIRED_SECRETS_PATH};
pub use source::{
    ChainSecretSource, DotenvSecretSource, EnvSecretSource, MapSecretSource, SecretSource, SecretValue,
};

/// A `${NAME}` secret reference. Capture group 1 is the name.
#[allow(clippy::expect_used)]
pub static SECRET_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("secret reference pattern is valid")
});

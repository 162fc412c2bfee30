// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Deploy Forge
//!
//! Layered configuration resolution and deployment-artifact generation for
//! a self-hosted LLM service running on several platforms.
//!
//! ## Overview
//!
//! Deploy Forge takes a target (environment × platform) and:
//!
//! - Loads the YAML layers that apply to it, flattening `extends` chains
//! - Deep-merges them in a fixed precedence order
//! - Fills `${NAME}` secret references from an injected source
//! - Rejects leftover `REPLACE_WITH_*` markers and unsafe production flags
//! - Assigns non-conflicting ports per environment
//! - Emits an env file, compose services and health-check specs
//!
//! ## Architecture
//!
//! Every stage is a pure function of the previous stage's output, driven by
//! the [`pipeline::Pipeline`]:
//!
//! 1. **Load**: `base` < `env-<env>` < `platform-<platform>` < `local`
//! 2. **Merge**: mappings merge recursively, everything else is replaced
//! 3. **Secrets**: resolved values stay in memory only
//! 4. **Validate**: every violation is reported in one error
//! 5. **Ports**: external, then platform overrides, then range scan
//! 6. **Emit**: artifacts are written only when every stage succeeded
//!
//! ## Modules
//!
//! - [`config`]: Layers, merging, validation and fingerprints
//! - [`secrets`]: Secret sources and substitution
//! - [`ports`]: Port planning and allocation
//! - [`emit`]: Artifact projections and the artifact writer
//! - [`pipeline`]: The end-to-end resolution pipeline
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! # base.yaml
//! auth:
//!   enabled: false
//! ports:
//!   ranges:
//!     production: { start: 9001, end: 9999 }
//! services:
//!   app: { image: ghcr.io/my-org/app:1, healthcheck: { endpoint: /health } }
//!
//! # env-prod.yaml
//! auth:
//!   enabled: true
//!   jwt_secret: "${AUTH_JWT_SECRET}"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod emit;
pub mod error;
pub mod pipeline;
pub mod ports;
pub mod secrets;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{
    ConfigHasher, ConfigLayer, ConfigMerger, ConfigValidator, Environment, LayerLoader, Platform, ResolvedConfig,
    Target,
};
pub use emit::{Artifact, ArtifactKind, ArtifactWriter, BuildManifest};
pub use error::{ForgeError, Result};
pub use pipeline::{BuildOutput, Pipeline, PipelineOptions, ResolvedTarget};
pub use ports::{PortAllocation, PortAllocator, PortPlan};
pub use secrets::{SecretResolver, SecretSource};

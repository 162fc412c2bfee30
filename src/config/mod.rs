//! Configuration module for the deploy-forge engine.
//!
//! This module handles everything up to a validated document:
//! - Selecting a target and its layer chain
//! - Loading YAML layers and flattening `extends` chains
//! - Deep-merging layers in precedence order
//! - Validating placeholders and production security flags
//! - Computing configuration fingerprints

mod hash;
mod layer;
mod merger;
mod policy;
mod resolved;
mod target;
pub mod tree;
mod validator;

pub use hash::ConfigHasher;
pub use layer::{ConfigLayer, FsLayerSource, LayerLoader, LayerSource, MemoryLayerSource, EXTENDS_KEY};
pub use merger::{deep_merge, ConfigMerger, ENVIRONMENTS_KEY};
pub use policy::{FlagRule, SecurityFlag, SecurityPolicy};
pub use resolved::{ResolvedConfig, ENGINE_ORIGIN};
pub use target::{Environment, LayerSlot, Platform, Target, BASE_LAYER, LOCAL_OVERRIDE_LAYER};
pub use validator::{ConfigValidator, ValidationReport, PLACEHOLDER_MARKER};

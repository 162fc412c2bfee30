//! Security-relevant flags checked for production-class targets.
//!
//! The list is explicit so it can be reviewed: a flag is only checked if it
//! appears here. Anything not listed is never inferred to be sensitive.

use serde_yaml::Value;
use std::fmt;

use super::tree::scalar_text;

/// What a flag's resolved value must look like in production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagRule {
    /// The flag must read as this boolean.
    Must(bool),
    /// The flag must not be any of these values (compared case-insensitively).
    Forbid(Vec<String>),
}

impl fmt::Display for FlagRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Must(safe) => write!(f, "{safe}"),
            Self::Forbid(values) => write!(f, "a value other than {}", values.join(" or ")),
        }
    }
}

/// A security-relevant setting checked in production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityFlag {
    /// Dotted path of the flag.
    pub path: String,
    /// The accepted values in production.
    pub rule: FlagRule,
    /// Why the permissive value is rejected.
    pub reason: String,
}

/// The reviewable allow-list of security flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    flags: Vec<SecurityFlag>,
}

/// Default boolean flags: `(path, safe value, reason)`.
///
/// `auth` covers the scalar shorthand `auth: disabled`; the mapping form is
/// checked through `auth.enabled`.
const DEFAULT_FLAGS: &[(&str, bool, &str)] = &[
    ("auth", true, "authentication must be enabled"),
    ("auth.enabled", true, "authentication must be enabled"),
    ("security.public_access", false, "public access must be disabled"),
    ("security.rate_limiting.enabled", true, "rate limiting must be enabled"),
    ("security.cors.allow_all_origins", false, "CORS must not allow every origin"),
    ("server.debug", false, "debug mode must be off"),
];

/// Default forbidden values: `(path, values, reason)`.
const DEFAULT_FORBIDDEN: &[(&str, &[&str], &str)] = &[(
    "authentication.method",
    &["none", "disabled", "off"],
    "an authentication method must be configured",
)];

impl SecurityPolicy {
    /// A policy with no flags.
    #[must_use]
    pub const fn empty() -> Self {
        Self { flags: Vec::new() }
    }

    /// Adds a boolean flag to the policy, replacing any flag with the same path.
    #[must_use]
    pub fn with_flag(self, path: impl Into<String>, safe: bool, reason: impl Into<String>) -> Self {
        self.with_rule(path, FlagRule::Must(safe), reason)
    }

    /// Adds a flag that must not take any of `values` in production.
    #[must_use]
    pub fn with_forbidden_values<I, S>(self, path: impl Into<String>, values: I, reason: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.with_rule(path, FlagRule::Forbid(values), reason)
    }

    fn with_rule(mut self, path: impl Into<String>, rule: FlagRule, reason: impl Into<String>) -> Self {
        let path = path.into();
        self.flags.retain(|f| f.path != path);
        self.flags.push(SecurityFlag {
            path,
            rule,
            reason: reason.into(),
        });
        self
    }

    /// The flags in this policy.
    #[must_use]
    pub fn flags(&self) -> &[SecurityFlag] {
        &self.flags
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        let policy = DEFAULT_FLAGS
            .iter()
            .fold(Self::empty(), |policy, (path, safe, reason)| {
                policy.with_flag(*path, *safe, *reason)
            });
        DEFAULT_FORBIDDEN
            .iter()
            .fold(policy, |policy, (path, values, reason)| {
                policy.with_forbidden_values(*path, values.iter().copied(), *reason)
            })
    }
}

impl SecurityFlag {
    /// Returns true if `value` is a permissive setting of this flag.
    ///
    /// Strings such as `"false"`, `"disabled"` or `"off"` count as booleans,
    /// because YAML authors write them that way. Mappings and sequences never
    /// match, so `auth` only fires for its scalar form.
    #[must_use]
    pub fn is_permissive(&self, value: &Value) -> bool {
        match &self.rule {
            FlagRule::Must(safe) => as_flag(value).is_some_and(|v| v != *safe),
            FlagRule::Forbid(values) => {
                scalar_text(value).is_some_and(|text| values.iter().any(|v| v.eq_ignore_ascii_case(text.trim())))
            }
        }
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "enabled" => Some(true),
            "false" | "no" | "off" | "disabled" | "none" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_u64().and_then(|n| match n {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_contains_auth() {
        let policy = SecurityPolicy::default();
        let auth = policy.flags().iter().find(|f| f.path == "auth.enabled").unwrap();
        assert_eq!(auth.rule, FlagRule::Must(true));
        assert!(policy.flags().iter().any(|f| f.path == "auth"));
        assert!(policy.flags().iter().any(|f| f.path == "authentication.method"));
    }

    #[test]
    fn test_with_flag_replaces_existing() {
        let policy = SecurityPolicy::default().with_flag("auth.enabled", false, "inverted");
        let matching: Vec<_> = policy.flags().iter().filter(|f| f.path == "auth.enabled").collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].rule, FlagRule::Must(false));
    }

    #[test]
    fn test_permissive_values() {
        let flag = SecurityFlag {
            path: String::from("auth.enabled"),
            rule: FlagRule::Must(true),
            reason: String::new(),
        };
        assert!(flag.is_permissive(&Value::Bool(false)));
        assert!(flag.is_permissive(&Value::from("disabled")));
        assert!(!flag.is_permissive(&Value::Bool(true)));
        assert!(!flag.is_permissive(&Value::from("maybe")));
        assert!(!flag.is_permissive(&serde_yaml::from_str::<Value>("{enabled: false}").unwrap()));
    }

    #[test]
    fn test_forbidden_values() {
        let policy = SecurityPolicy::empty().with_forbidden_values("authentication.method", ["none"], "needs auth");
        let flag = &policy.flags()[0];
        assert!(flag.is_permissive(&Value::from("none")));
        assert!(flag.is_permissive(&Value::from(" NONE ")));
        assert!(!flag.is_permissive(&Value::from("jwt")));
        assert!(!flag.is_permissive(&serde_yaml::from_str::<Value>("[none]").unwrap()));
        assert_eq!(flag.rule.to_string(), "a value other than none");
    }
}

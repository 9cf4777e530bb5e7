//! # Model Registry
//!
//! Tracks which upstream recognition models clients may ask for. Both the
//! batch relay and the stream bridge resolve the client's requested model
//! through the same registry, so the fallback rule is identical in both modes:
//!
//! - requested model in the allow-list → use it
//! - anything else (unknown, empty, absent) → use the configured default
//!
//! Resolution never fails and never has side effects.

use crate::config::ModelsConfig;
use std::collections::HashSet;

/// Resolve a requested model against an allow-list.
///
/// Returns `requested` if it is a member of `allowed`, otherwise `default`.
pub fn resolve_model<'a>(
    requested: Option<&'a str>,
    default: &'a str,
    allowed: &HashSet<String>,
) -> &'a str {
    match requested {
        Some(model) if allowed.contains(model) => model,
        _ => default,
    }
}

/// Read-only allow-list built once from configuration.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    default_model: String,
    allowed: HashSet<String>,
}

impl ModelRegistry {
    pub fn new(default_model: impl Into<String>, allowed: impl IntoIterator<Item = String>) -> Self {
        Self {
            default_model: default_model.into(),
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn from_config(config: &ModelsConfig) -> Self {
        Self::new(config.default_model.clone(), config.allowed.iter().cloned())
    }

    /// Pick the model to use for one request or session.
    pub fn resolve<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        resolve_model(requested, &self.default_model, &self.allowed)
    }

    pub fn is_allowed(&self, model: &str) -> bool {
        self.allowed.contains(model)
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Allowed models in a stable (sorted) order, for reporting.
    pub fn allowed_models(&self) -> Vec<&str> {
        let mut models: Vec<&str> = self.allowed.iter().map(String::as_str).collect();
        models.sort_unstable();
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelRegistry {
        ModelRegistry::new("nova-2", ["nova-2".to_string(), "nova-3".to_string()])
    }

    #[test]
    fn test_allowed_model_is_used() {
        assert_eq!(registry().resolve(Some("nova-3")), "nova-3");
        assert_eq!(registry().resolve(Some("nova-2")), "nova-2");
    }

    #[test]
    fn test_unknown_model_falls_back_to_default() {
        assert_eq!(registry().resolve(Some("unknown-model")), "nova-2");
        assert_eq!(registry().resolve(Some("NOVA-3")), "nova-2");
    }

    #[test]
    fn test_missing_or_empty_model_falls_back_to_default() {
        assert_eq!(registry().resolve(None), "nova-2");
        assert_eq!(registry().resolve(Some("")), "nova-2");
    }

    /// The resolved model is always in the allow-list when the default is.
    #[test]
    fn test_resolution_stays_inside_allow_list() {
        let registry = registry();
        for requested in [None, Some(""), Some("nova-3"), Some("whisper"), Some(" nova-2")] {
            assert!(registry.is_allowed(registry.resolve(requested)));
        }
    }

    #[test]
    fn test_free_function_matches_registry() {
        let allowed: HashSet<String> = ["a".to_string(), "b".to_string()].into();
        assert_eq!(resolve_model(Some("b"), "a", &allowed), "b");
        assert_eq!(resolve_model(Some("c"), "a", &allowed), "a");
        assert_eq!(resolve_model(None, "a", &allowed), "a");
    }

    #[test]
    fn test_from_config_and_sorted_listing() {
        let registry = ModelRegistry::from_config(&ModelsConfig::default());
        assert_eq!(registry.default_model(), "nova-2");
        assert_eq!(registry.allowed_models(), vec!["nova-2", "nova-3"]);
    }
}

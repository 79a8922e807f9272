//! Model catalog, aliasing, and the on-disk model cache.
//!
//! The upstream exposes a small set of model slugs. The registry starts
//! from a built-in catalog, optionally refreshed from upstream in the
//! background, and resolves client-supplied names in two passes: the alias
//! table first, then stripping a trailing reasoning-effort suffix.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use config::ReasoningEffort;

/// A known upstream model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelEntry {
    /// The upstream slug.
    pub slug: String,
    /// Who owns the model, surfaced in `/v1/models`.
    #[serde(default = "default_owner")]
    pub owned_by: String,
}

fn default_owner() -> String {
    "openai".to_string()
}

/// Built-in catalog used before (and alongside) any upstream refresh.
fn builtin_catalog() -> Vec<ModelEntry> {
    ["gpt-5", "gpt-5.1", "gpt-5.2", "gpt-5.1-codex", "gpt-5.1-codex-max", "codex-mini"]
        .into_iter()
        .map(|slug| ModelEntry {
            slug: slug.to_string(),
            owned_by: default_owner(),
        })
        .collect()
}

/// Alias table applied before effort-suffix stripping.
const ALIASES: &[(&str, &str)] = &[
    ("gpt5", "gpt-5"),
    ("gpt5.1", "gpt-5.1"),
    ("gpt5.2", "gpt-5.2"),
    ("codex", "gpt-5.1-codex"),
    ("codex-max", "gpt-5.1-codex-max"),
    ("codex-mini-latest", "codex-mini"),
];

/// Reasoning efforts a model family accepts.
pub fn allowed_efforts(model: &str) -> &'static [ReasoningEffort] {
    use ReasoningEffort::{High, Low, Medium, Minimal, Xhigh};

    if model.starts_with("gpt-5.2") || model.starts_with("gpt-5.1-codex-max") {
        &[Low, Medium, High, Xhigh]
    } else if model.starts_with("gpt-5.1") {
        &[Low, Medium, High]
    } else if model.starts_with("gpt-5") {
        &[Minimal, Low, Medium, High]
    } else {
        &[Low, Medium, High]
    }
}

/// Clamp an effort to the model family, falling back to medium.
pub fn clamp_effort(model: &str, effort: ReasoningEffort) -> ReasoningEffort {
    if allowed_efforts(model).contains(&effort) {
        effort
    } else {
        ReasoningEffort::Medium
    }
}

/// Outcome of name normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedModel {
    /// The resolved slug.
    pub slug: String,
    /// Effort captured from a trailing suffix, if any.
    pub effort_override: Option<ReasoningEffort>,
}

/// Resolve aliases and strip a trailing `{-|_|:}{effort}` suffix.
pub fn normalize_name(name: &str) -> NormalizedModel {
    let aliased = ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, slug)| *slug)
        .unwrap_or(name);

    for separator in ['-', '_', ':'] {
        if let Some((base, suffix)) = aliased.rsplit_once(separator)
            && let Some(effort) = ReasoningEffort::parse(suffix)
        {
            // The base may itself be an alias, e.g. `gpt5-high`.
            let base = ALIASES
                .iter()
                .find(|(alias, _)| *alias == base)
                .map(|(_, slug)| *slug)
                .unwrap_or(base);

            return NormalizedModel {
                slug: base.to_string(),
                effort_override: Some(effort),
            };
        }
    }

    NormalizedModel {
        slug: aliased.to_string(),
        effort_override: None,
    }
}

/// On-disk cache shape for the fetched model list.
#[derive(Debug, Serialize, Deserialize)]
struct ModelCacheFile {
    fetched_at: u64,
    #[serde(default)]
    etag: Option<String>,
    models: Vec<ModelEntry>,
}

/// The model registry: built-in catalog plus whatever a refresh brought in.
pub struct ModelRegistry {
    models: RwLock<Vec<ModelEntry>>,
    cache_path: Option<PathBuf>,
}

impl ModelRegistry {
    /// Build a registry seeded from the built-in catalog, overlaid with a
    /// previously cached list when one is readable.
    pub fn new(cache_path: Option<PathBuf>) -> Self {
        let mut models = builtin_catalog();

        if let Some(path) = &cache_path
            && let Some(cached) = read_cache(path)
        {
            merge(&mut models, cached.models);
        }

        Self {
            models: RwLock::new(models),
            cache_path,
        }
    }

    /// All visible model slugs, for `/v1/models` and unknown-model errors.
    pub fn visible_models(&self) -> Vec<ModelEntry> {
        self.read().clone()
    }

    /// Whether a normalized slug names a known model. An empty registry
    /// never rejects.
    pub fn is_known(&self, slug: &str) -> bool {
        let models = self.read();
        models.is_empty() || models.iter().any(|m| m.slug == slug)
    }

    /// Merge freshly fetched models in and persist the cache file.
    pub fn absorb(&self, fetched: Vec<ModelEntry>, etag: Option<String>) {
        {
            let mut models = match self.models.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            merge(&mut models, fetched);
        }

        if let Some(path) = &self.cache_path {
            let file = ModelCacheFile {
                fetched_at: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs(),
                etag,
                models: self.read().clone(),
            };

            if let Err(e) = write_cache(path, &file) {
                log::warn!("Failed to persist model cache to {}: {e}", path.display());
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ModelEntry>> {
        match self.models.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn merge(into: &mut Vec<ModelEntry>, fetched: Vec<ModelEntry>) {
    for model in fetched {
        if !into.iter().any(|m| m.slug == model.slug) {
            into.push(model);
        }
    }
}

fn read_cache(path: &Path) -> Option<ModelCacheFile> {
    let content = std::fs::read_to_string(path).ok()?;

    match serde_json::from_str(&content) {
        Ok(file) => Some(file),
        Err(e) => {
            log::warn!("Ignoring unreadable model cache {}: {e}", path.display());
            None
        }
    }
}

fn write_cache(path: &Path, file: &ModelCacheFile) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, serde_json::to_vec_pretty(file)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_before_suffix_stripping() {
        assert_eq!(
            normalize_name("gpt5"),
            NormalizedModel {
                slug: "gpt-5".to_string(),
                effort_override: None,
            }
        );
    }

    #[test]
    fn effort_suffix_survives_alias_normalization() {
        assert_eq!(
            normalize_name("gpt5-high"),
            NormalizedModel {
                slug: "gpt-5".to_string(),
                effort_override: Some(ReasoningEffort::High),
            }
        );
    }

    #[test]
    fn all_suffix_separators_are_accepted() {
        for name in ["gpt-5.1_low", "gpt-5.1:low", "gpt-5.1-low"] {
            assert_eq!(
                normalize_name(name),
                NormalizedModel {
                    slug: "gpt-5.1".to_string(),
                    effort_override: Some(ReasoningEffort::Low),
                },
                "failed for {name}"
            );
        }
    }

    #[test]
    fn non_effort_suffixes_stay_in_the_name() {
        assert_eq!(
            normalize_name("gpt-5.1-codex"),
            NormalizedModel {
                slug: "gpt-5.1-codex".to_string(),
                effort_override: None,
            }
        );
    }

    #[test]
    fn effort_families() {
        assert!(allowed_efforts("gpt-5").contains(&ReasoningEffort::Minimal));
        assert!(!allowed_efforts("gpt-5.1").contains(&ReasoningEffort::Minimal));
        assert!(allowed_efforts("gpt-5.2").contains(&ReasoningEffort::Xhigh));
        assert!(allowed_efforts("gpt-5.1-codex-max").contains(&ReasoningEffort::Xhigh));
        assert!(!allowed_efforts("gpt-5.1-codex").contains(&ReasoningEffort::Xhigh));
    }

    #[test]
    fn clamping_falls_back_to_medium() {
        assert_eq!(clamp_effort("gpt-5.1", ReasoningEffort::Minimal), ReasoningEffort::Medium);
        assert_eq!(clamp_effort("gpt-5.2", ReasoningEffort::Xhigh), ReasoningEffort::Xhigh);
    }

    #[test]
    fn unknown_model_is_rejected_only_when_registry_is_populated() {
        let registry = ModelRegistry::new(None);

        assert!(registry.is_known("gpt-5"));
        assert!(!registry.is_known("made-up-model"));
    }

    #[test]
    fn cache_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");

        let registry = ModelRegistry::new(Some(path.clone()));
        registry.absorb(
            vec![ModelEntry {
                slug: "gpt-5.3".to_string(),
                owned_by: "openai".to_string(),
            }],
            Some("etag-1".to_string()),
        );

        let reloaded = ModelRegistry::new(Some(path));
        assert!(reloaded.is_known("gpt-5.3"));
    }
}

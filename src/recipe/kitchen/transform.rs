// src/recipe/kitchen/transform.rs

//! Source transform hooks
//!
//! Some source fixes are not diffs but targeted edits, such as dropping a
//! feature flag from one line on ARM hosts. A recipe lists them as
//! `[[transform]]` entries naming a registered hook; they run after every
//! patch and before the first install step.

use crate::error::{Error, Result};
use crate::recipe::model::Transform;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A named edit applied to one file of the source tree
pub trait SourceTransform: Send + Sync {
    fn name(&self) -> &str;

    /// Check parameters without touching the tree
    fn validate(&self, transform: &Transform) -> std::result::Result<(), String>;

    /// Return the new file content
    fn apply(&self, transform: &Transform, content: &str) -> std::result::Result<String, String>;
}

/// Literal find/replace
///
/// Parameters: `find` (required, must occur in the file) and `replace`
/// (defaults to empty). Every occurrence is replaced.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplaceText;

impl SourceTransform for ReplaceText {
    fn name(&self) -> &str {
        "replace"
    }

    fn validate(&self, transform: &Transform) -> std::result::Result<(), String> {
        match transform.param("find") {
            Some(find) if !find.is_empty() => {}
            _ => return Err("'find' must be a non-empty string".to_string()),
        }
        for key in transform.params().keys() {
            if key != "find" && key != "replace" {
                return Err(format!("unknown parameter '{}'", key));
            }
        }
        Ok(())
    }

    fn apply(&self, transform: &Transform, content: &str) -> std::result::Result<String, String> {
        let find = transform.param("find").unwrap_or_default();
        let replace = transform.param("replace").unwrap_or_default();
        if find.is_empty() || !content.contains(find) {
            return Err(format!("text '{}' not found", find));
        }
        Ok(content.replace(find, replace))
    }
}

/// Hooks available to recipes, by name
#[derive(Clone)]
pub struct TransformRegistry {
    hooks: BTreeMap<String, Arc<dyn SourceTransform>>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TransformRegistry {
    pub fn empty() -> Self {
        Self {
            hooks: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ReplaceText));
        registry
    }

    pub fn register(&mut self, hook: Arc<dyn SourceTransform>) {
        self.hooks.insert(hook.name().to_string(), hook);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SourceTransform>> {
        self.hooks.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }

    /// Check a recipe's transform against its hook
    pub fn validate(&self, recipe: &str, transform: &Transform) -> Result<()> {
        let hook = self.get(transform.hook()).ok_or_else(|| {
            Error::validation(recipe, format!("unknown transform hook '{}'", transform.hook()))
        })?;
        hook.validate(transform).map_err(|e| {
            Error::validation(recipe, format!("transform on {}: {}", transform.file(), e))
        })
    }

    /// Apply a transform to the tree rooted at `source_dir`
    ///
    /// Failures are reported as patch errors naming the transform.
    pub fn apply(&self, source_dir: &Path, transform: &Transform) -> Result<()> {
        let label = format!("transform:{}", transform.hook());
        let fail = |hunk: String| Error::Patch {
            patch: label.clone(),
            file: transform.file().to_string(),
            hunk,
        };

        let hook = self
            .get(transform.hook())
            .ok_or_else(|| fail("hook is not registered".to_string()))?;

        let target = source_dir.join(transform.file());
        let content =
            fs::read_to_string(&target).map_err(|e| fail(format!("cannot read file: {}", e)))?;
        let updated = hook.apply(transform, &content).map_err(&fail)?;

        debug!("Applied {} to {}", label, transform.file());
        fs::write(&target, updated)?;
        Ok(())
    }
}

//! Reason templates: `$alias` tokens expanded at hit time.
//!
//! Expansion is a bounded fixed-point: up to ten passes, each replacing
//! every known token, longest alias first so `$user_reason` is never
//! clobbered by `$user`. Self-referential templates terminate at the
//! pass cap instead of erroring.

use std::collections::HashMap;

const MAX_PASSES: usize = 10;

/// In-memory mirror of the reason template table.
#[derive(Debug, Default, Clone)]
pub struct ReasonTemplates {
    templates: HashMap<String, String>,
}

impl ReasonTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.templates.clear();
    }

    pub fn insert(&mut self, alias: &str, text: impl Into<String>) {
        self.templates.insert(alias.to_lowercase(), text.into());
    }

    pub fn remove(&mut self, alias: &str) -> bool {
        self.templates.remove(&alias.to_lowercase()).is_some()
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.templates.contains_key(&alias.to_lowercase())
    }

    /// All templates, sorted by alias for stable listings.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .templates
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        entries.sort_by_key(|(alias, _)| *alias);
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Expand every `$alias` token in `input`, with `extras` taking part
    /// in the substitution alongside the stored templates.
    pub fn expand(&self, input: &str, extras: &[(&str, &str)]) -> String {
        let mut entries: Vec<(&str, &str)> = self
            .templates
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        entries.extend_from_slice(extras);
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let mut out = input.to_string();
        for _ in 0..MAX_PASSES {
            let mut changed = false;
            for (alias, text) in &entries {
                let token = format!("${alias}");
                if out.contains(&token) {
                    out = out.replace(&token, text);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        out.trim_end().to_string()
    }
}

/// Split an expanded reason on its first `|` into user-visible and
/// operator-visible halves.
pub fn split_reason(reason: &str) -> (&str, &str) {
    match reason.split_once('|') {
        Some((user, oper)) => (user, oper),
        None => (reason, ""),
    }
}

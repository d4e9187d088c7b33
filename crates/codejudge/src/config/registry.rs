//! Language registry
//!
//! Immutable lookup table from language id to toolchain descriptor, built once
//! when the configuration is loaded.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, Language};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageRegistry {
    languages: HashMap<String, Language>,
}

impl LanguageRegistry {
    /// Look up a language by id
    pub fn resolve(&self, id: &str) -> Result<&Language, ConfigError> {
        self.languages
            .get(id)
            .ok_or_else(|| ConfigError::UnsupportedLanguage(id.to_owned()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.languages.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    /// Entries sorted by id
    pub fn iter_sorted(&self) -> Vec<(&str, &Language)> {
        let mut entries: Vec<_> = self
            .languages
            .iter()
            .map(|(id, lang)| (id.as_str(), lang))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }
}

impl FromIterator<(String, Language)> for LanguageRegistry {
    fn from_iter<T: IntoIterator<Item = (String, Language)>>(iter: T) -> Self {
        Self {
            languages: iter.into_iter().collect(),
        }
    }
}

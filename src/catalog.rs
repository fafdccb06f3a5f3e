//! Provider catalog and per-producer execution options.
//!
//! A [`ProviderCatalog`] maps producer aliases to the provider that serves
//! them and the models that provider offers under short selection keys.
//! [`ProducerOptions`] carry per-producer overrides: a model choice (fixed or
//! driven by an external input) and free-form settings that feed the job's
//! input hash.
//!
//! Resolution happens during assembly. A model chosen by an input makes that
//! input part of the job's dependency set, so changing the selection at a
//! later revision marks the job dirty like any other input change.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::value::{InputValues, Value};

/// Catalog and option resolution failures, raised during assembly.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum CatalogError {
    /// A producer alias has no catalog entry at all.
    #[error("no catalog entry for producer alias {alias:?}")]
    #[diagnostic(
        code(planloom::catalog::missing_entry),
        help("register the alias with ProviderCatalog::with_entry before assembling")
    )]
    MissingCatalogEntry { alias: String },

    /// The entry exists but no provider model could be resolved for it.
    #[error("cannot resolve option {option:?} for producer alias {alias:?}: {reason}")]
    #[diagnostic(
        code(planloom::catalog::missing_option),
        help("check the entry's model keys and the producer's model binding")
    )]
    MissingOption {
        alias: String,
        option: String,
        reason: String,
    },
}

/// One catalog entry: the provider behind an alias and its model table.
///
/// `models` maps short selection keys (what blueprints and inputs name) to
/// provider model identifiers (what the adapter sends upstream).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub provider: String,
    #[serde(default)]
    pub models: BTreeMap<String, String>,
    /// Selection key used when a producer does not choose a model itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl CatalogEntry {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            models: BTreeMap::new(),
            default_model: None,
        }
    }

    #[must_use]
    pub fn model(mut self, key: impl Into<String>, model_id: impl Into<String>) -> Self {
        self.models.insert(key.into(), model_id.into());
        self
    }

    #[must_use]
    pub fn default_model(mut self, key: impl Into<String>) -> Self {
        self.default_model = Some(key.into());
        self
    }
}

/// How a producer chooses among an entry's models.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelBinding {
    /// A fixed selection key.
    Key(String),
    /// The selection key is read from an external input at plan time.
    FromInput(String),
}

/// Per-producer execution options, keyed by producer path in
/// [`ProducerOptionsMap`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerOptions {
    /// Overrides the catalog entry's provider when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelBinding>,
    /// Free-form settings handed to the provider adapter and folded into the
    /// job's input hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

impl ProducerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn model_key(mut self, key: impl Into<String>) -> Self {
        self.model = Some(ModelBinding::Key(key.into()));
        self
    }

    #[must_use]
    pub fn model_from_input(mut self, input: impl Into<String>) -> Self {
        self.model = Some(ModelBinding::FromInput(input.into()));
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: Value) -> Self {
        self.settings = Some(settings);
        self
    }
}

/// Options per producer path.
pub type ProducerOptionsMap = BTreeMap<String, ProducerOptions>;

/// A producer binding after catalog resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedBinding {
    pub provider: String,
    pub provider_model: String,
    /// Inputs that participated in model selection. The assembler adds these
    /// to the job's dependency set.
    pub selection_inputs: Vec<String>,
}

/// Alias → entry table consulted by the assembler.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entry(mut self, alias: impl Into<String>, entry: CatalogEntry) -> Self {
        self.entries.insert(alias.into(), entry);
        self
    }

    pub fn entry(&self, alias: &str) -> Option<&CatalogEntry> {
        self.entries.get(alias)
    }

    /// Resolves the provider and model for one producer alias.
    ///
    /// Model resolution order: the producer's own binding (fixed key or
    /// selection input), then the entry's default key, then the entry's sole
    /// model if it has exactly one.
    pub fn resolve(
        &self,
        alias: &str,
        options: Option<&ProducerOptions>,
        inputs: &InputValues,
    ) -> Result<ResolvedBinding, CatalogError> {
        let entry = self
            .entry(alias)
            .ok_or_else(|| CatalogError::MissingCatalogEntry {
                alias: alias.to_string(),
            })?;
        let provider = options
            .and_then(|o| o.provider.clone())
            .unwrap_or_else(|| entry.provider.clone());

        let mut selection_inputs = Vec::new();
        let key = match options.and_then(|o| o.model.as_ref()) {
            Some(ModelBinding::Key(key)) => Some(key.clone()),
            Some(ModelBinding::FromInput(input)) => {
                selection_inputs.push(input.clone());
                match inputs.get(input) {
                    Some(Value::String(key)) => Some(key.clone()),
                    Some(other) => {
                        return Err(CatalogError::MissingOption {
                            alias: alias.to_string(),
                            option: "model".to_string(),
                            reason: format!(
                                "selection input {input:?} must be a string, got {other:?}"
                            ),
                        });
                    }
                    None => {
                        return Err(CatalogError::MissingOption {
                            alias: alias.to_string(),
                            option: "model".to_string(),
                            reason: format!("selection input {input:?} is not bound"),
                        });
                    }
                }
            }
            None => entry.default_model.clone(),
        };

        let provider_model = match key {
            Some(key) => entry
                .models
                .get(&key)
                .cloned()
                .ok_or_else(|| CatalogError::MissingOption {
                    alias: alias.to_string(),
                    option: "model".to_string(),
                    reason: format!("entry has no model under key {key:?}"),
                })?,
            // A single-model entry needs no selection at all.
            None => {
                let mut models = entry.models.values();
                match (models.next(), models.next()) {
                    (Some(only), None) => only.clone(),
                    _ => {
                        return Err(CatalogError::MissingOption {
                            alias: alias.to_string(),
                            option: "model".to_string(),
                            reason: "no model binding, no default, and the entry is not \
                                     single-model"
                                .to_string(),
                        });
                    }
                }
            }
        };

        Ok(ResolvedBinding {
            provider,
            provider_model,
            selection_inputs,
        })
    }
}

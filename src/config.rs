//! Declarative configuration: which credentials to request and which stores
//! to put them in.
//!
//! The wire format is YAML or JSON; the canonical shape is:
//!
//! ```yaml
//! version: 1
//! namespace: team-x
//! stores:
//!   - type: secretsmanager
//!     config:
//!       secret_template: "/concourse/{{ .Namespace }}/{{ .Name }}"
//! requests:
//!   - type: aws:sts
//!     store: secretsmanager
//!     credentials:
//!       - name: open-source-dev-read-only
//!         role_arn: arn:aws:iam::role/role-name
//!         duration: 900
//! ```
//!
//! Provider-specific fields (`role_arn`, `duration` above) are opaque to
//! the core: they are captured verbatim and handed to the provider that
//! serves the request. They may sit beside `name` or be nested under a
//! `config` key; both forms are accepted.

use std::collections::HashSet;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CredentialType, StoreType};

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub stores: Vec<StoreConfig>,
    #[serde(default)]
    pub requests: Vec<CredentialRequest>,
}

/// A declared secret store and its implementation-private config blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub store_type: StoreType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl StoreConfig {
    /// The alias used to reference this store from requests. Defaults to
    /// the store type's tag when not set explicitly.
    pub fn effective_alias(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| self.store_type.to_string())
    }
}

/// A group of credential requests sharing a destination store and,
/// optionally, a default credential type inherited by its entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRequest {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub credential_type: Option<CredentialType>,
    #[serde(default)]
    pub store: String,
    #[serde(default, alias = "creds")]
    pub credentials: Vec<Request>,
}

impl CredentialRequest {
    /// The effective credential type for one of this group's entries: the
    /// entry's own type wins over the group default.
    pub fn effective_type<'a>(&'a self, request: &'a Request) -> Option<&'a CredentialType> {
        request.credential_type.as_ref().or(self.credential_type.as_ref())
    }
}

/// A single requested credential. Fields other than `name` and `type` are
/// provider-specific and kept opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub credential_type: Option<CredentialType>,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl Request {
    /// Stable identity of this request in state. Deterministic and immune
    /// to config reordering: it is simply the request name, which is unique
    /// within its group.
    pub fn state_id(&self) -> &str {
        &self.name
    }

    /// The provider-specific config blob: the `config` key when present,
    /// otherwise every field captured beside `name`/`type`.
    pub fn provider_config(&self) -> serde_json::Value {
        match self.config.get("config") {
            Some(nested) => nested.clone(),
            None => serde_json::Value::Object(self.config.clone()),
        }
    }

    /// Deserialize the provider config blob into a provider's own config
    /// type.
    pub fn parse_config<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_value(self.provider_config())
            .with_context(|| format!("invalid config for credential {:?}", self.name))
    }
}

/// Positional validation errors. `Display` names the offending entry the
/// way operators see it in the config file: `stores[1]: duplicate alias "x"`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid configuration version: {0}")]
    InvalidVersion(i64),

    #[error("\"namespace\" must be defined")]
    MissingNamespace,

    #[error("stores[{index}]: duplicate alias {alias:?}")]
    DuplicateAlias { index: usize, alias: String },

    #[error("requests[{index}]: unknown type: {credential_type}")]
    UnknownCredentialType {
        index: usize,
        credential_type: String,
    },

    #[error("requests[{index}]: invalid store alias: {store:?}")]
    UnknownStoreAlias { index: usize, store: String },

    #[error("requests[{index}]: duplicate request: {{Type:{credential_type} Store:{store}}}")]
    DuplicateRequest {
        index: usize,
        credential_type: String,
        store: String,
    },

    #[error("requests[{index}]: invalid request: \"store\" must be defined")]
    MissingStore { index: usize },

    #[error(
        "requests[{index}]: invalid request: credentials[{credential_index}]: \"name\" must be defined"
    )]
    MissingName {
        index: usize,
        credential_index: usize,
    },

    #[error(
        "requests[{index}]: invalid request: credentials[{credential_index}]: duplicate name {name:?}"
    )]
    DuplicateCredentialName {
        index: usize,
        credential_index: usize,
        name: String,
    },

    #[error(
        "requests[{index}]: invalid request: credentials[{credential_index}]: unknown type: {credential_type}"
    )]
    UnknownEntryType {
        index: usize,
        credential_index: usize,
        credential_type: String,
    },
}

impl Config {
    /// Validate the configuration. Total and side-effect-free: every input
    /// either passes or yields a positional [`ValidationError`].
    ///
    /// An empty `credentials` list is valid; it expresses that previously
    /// minted credentials for the store should be cleaned up.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version != 1 {
            return Err(ValidationError::InvalidVersion(self.version));
        }
        if self.namespace.is_empty() {
            return Err(ValidationError::MissingNamespace);
        }

        let mut aliases = HashSet::with_capacity(self.stores.len());
        for (i, store) in self.stores.iter().enumerate() {
            let alias = store.effective_alias();
            if !aliases.insert(alias.clone()) {
                return Err(ValidationError::DuplicateAlias { index: i, alias });
            }
        }

        let mut seen = HashSet::with_capacity(self.requests.len());
        for (i, request) in self.requests.iter().enumerate() {
            request.validate(i)?;
            if let Some(t) = &request.credential_type {
                if !t.is_recognized() {
                    return Err(ValidationError::UnknownCredentialType {
                        index: i,
                        credential_type: t.to_string(),
                    });
                }
            }
            if !aliases.contains(&request.store) {
                return Err(ValidationError::UnknownStoreAlias {
                    index: i,
                    store: request.store.clone(),
                });
            }
            let key = (request.credential_type.clone(), request.store.clone());
            if !seen.insert(key) {
                return Err(ValidationError::DuplicateRequest {
                    index: i,
                    credential_type: request
                        .credential_type
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                    store: request.store.clone(),
                });
            }
        }

        Ok(())
    }

    /// Look up a declared store by its effective alias.
    pub fn store_config(&self, alias: &str) -> Option<&StoreConfig> {
        self.stores.iter().find(|s| s.effective_alias() == alias)
    }
}

impl CredentialRequest {
    fn validate(&self, index: usize) -> Result<(), ValidationError> {
        if self.store.is_empty() {
            return Err(ValidationError::MissingStore { index });
        }

        let mut names = HashSet::with_capacity(self.credentials.len());
        for (i, request) in self.credentials.iter().enumerate() {
            if request.name.is_empty() {
                return Err(ValidationError::MissingName {
                    index,
                    credential_index: i,
                });
            }
            if !names.insert(request.name.as_str()) {
                return Err(ValidationError::DuplicateCredentialName {
                    index,
                    credential_index: i,
                    name: request.name.clone(),
                });
            }
            if let Some(t) = &request.credential_type {
                if !t.is_recognized() {
                    return Err(ValidationError::UnknownEntryType {
                        index,
                        credential_index: i,
                        credential_type: t.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

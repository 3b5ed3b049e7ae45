//! Persisted reconciler memory.
//!
//! State is a value tree: provider partitions own [`Resource`] entries,
//! store partitions own [`Secret`] entries, and secrets reference resources
//! by ID rather than by pointer, which keeps serialization trivial and
//! ownership acyclic. The host persists the whole document between passes
//! via a [`crate::backend::StateBackend`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::{Metadata, ProviderType, StoreType};

/// The full state document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub providers: Vec<ProviderState>,
    #[serde(default)]
    pub stores: Vec<StoreState>,
}

/// Resources owned by one provider, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderState {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// Secrets owned by one store, in insertion order. The partition key is the
/// (type, alias) pair so two aliases of the same store type do not share
/// secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(rename = "type")]
    pub store_type: StoreType,
    pub alias: String,
    #[serde(default)]
    pub secrets: Vec<Secret>,
}

/// The provider-side record of a minted credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub expiration: DateTime<Utc>,
    #[serde(default)]
    pub in_use: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// The store-side record of a written credential, linked to its resource
/// by ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub resource_id: String,
    pub path: String,
    pub expiration: DateTime<Utc>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resource to the partition for `provider_type`, creating the
    /// partition on first use.
    pub fn add_resource(&mut self, provider_type: ProviderType, resource: Resource) {
        match self
            .providers
            .iter_mut()
            .find(|p| p.provider_type == provider_type)
        {
            Some(partition) => partition.resources.push(resource),
            None => self.providers.push(ProviderState {
                provider_type,
                resources: vec![resource],
            }),
        }
    }

    /// Look up a resource by ID within a provider partition. When several
    /// entries share the ID (a fresh resource and its deposed predecessor)
    /// the most recently appended one is the current one and wins.
    pub fn resource_mut(&mut self, provider_type: &ProviderType, id: &str) -> Option<&mut Resource> {
        self.providers
            .iter_mut()
            .find(|p| &p.provider_type == provider_type)?
            .resources
            .iter_mut()
            .rev()
            .find(|r| r.id == id)
    }

    /// Clear the `in_use` marker on every resource. Runs at the start of a
    /// reconciliation pass; Phase 1 re-marks what is still requested.
    pub fn reset_in_use(&mut self) {
        for partition in &mut self.providers {
            for resource in &mut partition.resources {
                resource.in_use = false;
            }
        }
    }

    /// Append a secret to the partition for the given store declaration,
    /// creating the partition on first use. A secret at an already-recorded
    /// path replaces the old entry, mirroring the overwrite semantics of
    /// store writes.
    pub fn add_secret(&mut self, store: &StoreConfig, secret: Secret) {
        let alias = store.effective_alias();
        match self
            .stores
            .iter_mut()
            .find(|s| s.store_type == store.store_type && s.alias == alias)
        {
            Some(partition) => {
                match partition.secrets.iter_mut().find(|s| s.path == secret.path) {
                    Some(existing) => *existing = secret,
                    None => partition.secrets.push(secret),
                }
            }
            None => self.stores.push(StoreState {
                store_type: store.store_type,
                alias,
                secrets: vec![secret],
            }),
        }
    }

    /// Whether any provider partition holds a resource with this ID.
    pub fn has_resource(&self, id: &str) -> bool {
        self.providers
            .iter()
            .any(|p| p.resources.iter().any(|r| r.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn resource(id: &str) -> Resource {
        Resource {
            id: id.to_string(),
            expiration: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            in_use: true,
            metadata: None,
        }
    }

    fn inprocess_store() -> StoreConfig {
        StoreConfig {
            store_type: StoreType::Inprocess,
            alias: None,
            config: None,
        }
    }

    #[test]
    fn resources_keep_insertion_order_within_a_partition() {
        let mut state = State::new();
        state.add_resource(ProviderType::Random, resource("a"));
        state.add_resource(ProviderType::Random, resource("b"));
        state.add_resource(ProviderType::Aws, resource("c"));

        assert_eq!(state.providers.len(), 2);
        let ids: Vec<&str> = state.providers[0]
            .resources
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn lookup_prefers_the_most_recent_entry_for_a_shared_id() {
        let mut state = State::new();
        let mut old = resource("shared");
        old.expiration = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        state.add_resource(ProviderType::Random, old);
        state.add_resource(ProviderType::Random, resource("shared"));

        let found = state.resource_mut(&ProviderType::Random, "shared").unwrap();
        assert_eq!(
            found.expiration,
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn reset_in_use_clears_every_partition() {
        let mut state = State::new();
        state.add_resource(ProviderType::Random, resource("a"));
        state.add_resource(ProviderType::Aws, resource("b"));
        state.reset_in_use();
        for partition in &state.providers {
            assert!(partition.resources.iter().all(|r| !r.in_use));
        }
    }

    #[test]
    fn secrets_partition_by_type_and_alias() {
        let mut state = State::new();
        let secret = Secret {
            resource_id: "a".to_string(),
            path: "p".to_string(),
            expiration: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        };
        state.add_secret(&inprocess_store(), secret.clone());
        let aliased = StoreConfig {
            alias: Some("other".to_string()),
            ..inprocess_store()
        };
        state.add_secret(&aliased, secret);

        assert_eq!(state.stores.len(), 2);
        assert_eq!(state.stores[0].alias, "inprocess");
        assert_eq!(state.stores[1].alias, "other");
    }

    #[test]
    fn a_secret_at_a_known_path_replaces_the_old_entry() {
        let mut state = State::new();
        let old = Secret {
            resource_id: "a".to_string(),
            path: "team.key".to_string(),
            expiration: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        };
        let new = Secret {
            expiration: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            ..old.clone()
        };
        state.add_secret(&inprocess_store(), old);
        state.add_secret(&inprocess_store(), new.clone());

        assert_eq!(state.stores[0].secrets, vec![new]);
    }

    #[test]
    fn state_document_round_trips_through_json() {
        let mut state = State::new();
        state.add_resource(ProviderType::Github, resource("deploy-key"));
        state.add_secret(
            &inprocess_store(),
            Secret {
                resource_id: "deploy-key".to_string(),
                path: "team.deploy-key".to_string(),
                expiration: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            },
        );

        let doc = serde_json::to_string(&state).unwrap();
        let restored: State = serde_json::from_str(&doc).unwrap();
        assert_eq!(restored, state);
        assert!(restored.has_resource("deploy-key"));
        assert!(!restored.has_resource("gone"));
    }
}

//! The reconciliation engine.
//!
//! One [`Reconciler::process`] call drives a full pass over
//! (requests × resources × secrets):
//!
//! 1. **Reset** - every resource's `in_use` marker is cleared.
//! 2. **Create** - each requested credential is either claimed (a live
//!    resource exists outside the rotation window) or minted fresh, with
//!    its secrets written to the destination store.
//! 3. **Destroy deposed** - resources left unclaimed are destroyed through
//!    their provider and dropped from state, along with their secrets.
//! 4. **Orphan sweep** - secrets whose resource no longer exists anywhere
//!    are deleted. This covers crashes between a secret write and the
//!    matching resource record.
//!
//! Per-request upstream failures are logged and skipped so one broken
//! credential cannot starve the rest; the next pass retries. Only
//! unresolvable configuration (an unknown store alias or an unregistered
//! store type) aborts the pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::provider::Provider;
use crate::state::{Resource, Secret, State};
use crate::store::SecretStore;
use crate::{ProviderType, StoreType};

/// Construction-time errors: the provider and store sets must be unique by
/// type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcilerError {
    #[error("duplicate provider: {0}")]
    DuplicateProvider(ProviderType),

    #[error("duplicate store: {0}")]
    DuplicateStore(StoreType),
}

/// Fatal errors for a single `process` pass. Everything else is absorbed
/// per-request and surfaced through logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("unknown store alias: {0:?}")]
    UnknownStoreAlias(String),

    #[error("no store registered for type: {0}")]
    UnknownStoreType(StoreType),
}

pub struct Reconciler {
    providers: HashMap<ProviderType, Arc<dyn Provider>>,
    stores: HashMap<StoreType, Arc<dyn SecretStore>>,
    rotation_window: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .field("rotation_window", &self.rotation_window)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Build a reconciler over the given provider and store sets.
    ///
    /// `rotation_window` is how long before expiration a resource is
    /// proactively re-minted: zero disables proactive rotation, a window
    /// larger than any credential lifetime rotates every pass.
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        stores: Vec<Arc<dyn SecretStore>>,
        rotation_window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ReconcilerError> {
        let mut provider_map: HashMap<ProviderType, Arc<dyn Provider>> =
            HashMap::with_capacity(providers.len());
        for provider in providers {
            let provider_type = provider.provider_type();
            if provider_map.insert(provider_type.clone(), provider).is_some() {
                return Err(ReconcilerError::DuplicateProvider(provider_type));
            }
        }

        let mut store_map: HashMap<StoreType, Arc<dyn SecretStore>> =
            HashMap::with_capacity(stores.len());
        for store in stores {
            let store_type = store.store_type();
            if store_map.insert(store_type, store).is_some() {
                return Err(ReconcilerError::DuplicateStore(store_type));
            }
        }

        Ok(Self {
            providers: provider_map,
            stores: store_map,
            rotation_window,
            clock,
        })
    }

    /// Run one reconciliation pass.
    ///
    /// Expects a config that already passed [`Config::validate`] and a
    /// state that is empty or was produced by a prior pass. On success the
    /// state is fully reconciled; on a fatal error it reflects the partial
    /// progress made so far, and a following pass converges.
    pub async fn process(
        &self,
        namespace: &str,
        config: &Config,
        state: &mut State,
    ) -> Result<(), ProcessError> {
        let now = self.clock.now();
        info!(namespace, requests = config.requests.len(), "starting reconciliation");

        state.reset_in_use();
        self.create_requested(now, namespace, config, state).await?;
        self.destroy_deposed(config, state).await;
        self.sweep_orphaned_secrets(config, state).await;

        info!(namespace, "reconciliation complete");
        Ok(())
    }

    /// Phase 1: walk the requests in declaration order, claim resources
    /// that are still fresh and mint replacements for everything else.
    async fn create_requested(
        &self,
        now: DateTime<Utc>,
        namespace: &str,
        config: &Config,
        state: &mut State,
    ) -> Result<(), ProcessError> {
        for group in &config.requests {
            for request in &group.credentials {
                let Some(credential_type) = group.effective_type(request).cloned() else {
                    info!(
                        namespace,
                        store = %group.store,
                        name = %request.name,
                        "request has no credential type, skipping"
                    );
                    continue;
                };
                let provider_type = credential_type.provider_type();
                let Some(provider) = self.providers.get(&provider_type) else {
                    info!(
                        namespace,
                        r#type = %credential_type,
                        name = %request.name,
                        "no provider for credential type, skipping"
                    );
                    continue;
                };
                let store_config = config
                    .store_config(&group.store)
                    .ok_or_else(|| ProcessError::UnknownStoreAlias(group.store.clone()))?;
                let store = self
                    .stores
                    .get(&store_config.store_type)
                    .ok_or(ProcessError::UnknownStoreType(store_config.store_type))?;

                info!(
                    namespace,
                    r#type = %credential_type,
                    store = %group.store,
                    name = %request.name,
                    "processing request"
                );

                let id = request.state_id().to_string();
                if let Some(existing) = state.resource_mut(&provider_type, &id) {
                    if existing.expiration > now + self.rotation_window {
                        existing.in_use = true;
                        debug!(
                            namespace,
                            r#type = %credential_type,
                            name = %request.name,
                            expiration = %existing.expiration,
                            "credentials exist and are outside the rotation window"
                        );
                        continue;
                    }
                }

                // Hand the provider the resolved type so one provider can
                // serve several credential types.
                let mut resolved = request.clone();
                resolved.credential_type = Some(credential_type.clone());

                let (credentials, metadata) = match provider.create(&resolved).await {
                    Ok(created) => created,
                    Err(e) => {
                        error!(
                            namespace,
                            r#type = %credential_type,
                            request = %request.name,
                            "failed to create credentials: {e:#}"
                        );
                        continue;
                    }
                };
                let Some(expiration) = credentials.iter().map(|c| c.expiration).min() else {
                    error!(
                        namespace,
                        r#type = %credential_type,
                        request = %request.name,
                        "provider returned no credentials"
                    );
                    continue;
                };
                info!(
                    namespace,
                    r#type = %credential_type,
                    store = %group.store,
                    count = credentials.len(),
                    "created new credentials"
                );

                let mut secrets = Vec::with_capacity(credentials.len());
                for credential in &credentials {
                    match store
                        .write(namespace, credential, store_config.config.as_ref())
                        .await
                    {
                        Ok(path) => {
                            debug!(
                                namespace,
                                r#type = %credential_type,
                                store = %group.store,
                                path = %path,
                                "stored credential"
                            );
                            secrets.push(Secret {
                                resource_id: id.clone(),
                                path,
                                expiration: credential.expiration,
                            });
                        }
                        Err(e) => {
                            error!(
                                namespace,
                                r#type = %credential_type,
                                request = %request.name,
                                "failed to store credential: {e:#}"
                            );
                        }
                    }
                }

                // The upstream resource exists as soon as create succeeds,
                // so it is recorded even when a store write failed; the
                // failed credential is retried by rotation, not leaked.
                state.add_resource(
                    provider_type.clone(),
                    Resource {
                        id,
                        expiration,
                        in_use: true,
                        metadata,
                    },
                );
                for secret in secrets {
                    state.add_secret(store_config, secret);
                }
            }
            info!(namespace, store = %group.store, "done processing");
        }
        Ok(())
    }

    /// Phase 2: destroy every resource left unclaimed by phase 1 and drop
    /// its secrets. A failed destroy keeps the resource (and its secrets)
    /// in state for the next pass.
    async fn destroy_deposed(&self, config: &Config, state: &mut State) {
        for partition_index in 0..state.providers.len() {
            let provider_type = state.providers[partition_index].provider_type.clone();
            let deposed: Vec<Resource> = state.providers[partition_index]
                .resources
                .iter()
                .filter(|r| !r.in_use)
                .cloned()
                .collect();
            if deposed.is_empty() {
                continue;
            }
            let Some(provider) = self.providers.get(&provider_type) else {
                warn!(
                    provider = %provider_type,
                    count = deposed.len(),
                    "no provider for deposed resources, leaving them in state"
                );
                continue;
            };
            for resource in deposed {
                if let Err(e) = provider.destroy(&resource).await {
                    error!(
                        provider = %provider_type,
                        id = %resource.id,
                        "failed to destroy resource, will retry next pass: {e:#}"
                    );
                    continue;
                }
                info!(provider = %provider_type, id = %resource.id, "destroyed deposed resource");
                let partition = &mut state.providers[partition_index].resources;
                if let Some(position) = partition.iter().position(|r| *r == resource) {
                    partition.remove(position);
                }
                self.delete_secrets_for(config, state, &resource.id).await;
            }
        }
    }

    /// Delete the secrets recorded for a destroyed resource. When a
    /// successor with the same identity exists (the resource was rotated
    /// this pass), its secrets occupy the same paths and must survive.
    async fn delete_secrets_for(&self, config: &Config, state: &mut State, resource_id: &str) {
        if state.has_resource(resource_id) {
            debug!(
                resource_id,
                "a successor resource owns these secret paths, keeping them"
            );
            return;
        }
        for partition_index in 0..state.stores.len() {
            let matching: Vec<Secret> = state.stores[partition_index]
                .secrets
                .iter()
                .filter(|s| s.resource_id == resource_id)
                .cloned()
                .collect();
            self.delete_from_partition(config, state, partition_index, matching, "deleted secret")
                .await;
        }
    }

    /// Phase 3: delete secrets whose resource no longer exists in any
    /// provider partition.
    async fn sweep_orphaned_secrets(&self, config: &Config, state: &mut State) {
        let live: HashSet<String> = state
            .providers
            .iter()
            .flat_map(|p| p.resources.iter().map(|r| r.id.clone()))
            .collect();
        for partition_index in 0..state.stores.len() {
            let orphaned: Vec<Secret> = state.stores[partition_index]
                .secrets
                .iter()
                .filter(|s| !live.contains(&s.resource_id))
                .cloned()
                .collect();
            self.delete_from_partition(
                config,
                state,
                partition_index,
                orphaned,
                "deleted orphaned secret",
            )
            .await;
        }
    }

    /// Delete the given secrets from one store partition, removing each
    /// state entry only after the store confirmed the delete.
    async fn delete_from_partition(
        &self,
        config: &Config,
        state: &mut State,
        partition_index: usize,
        secrets: Vec<Secret>,
        log_message: &'static str,
    ) {
        if secrets.is_empty() {
            return;
        }
        let store_type = state.stores[partition_index].store_type;
        let alias = state.stores[partition_index].alias.clone();
        let Some(store) = self.stores.get(&store_type) else {
            warn!(
                store = %store_type,
                count = secrets.len(),
                "no store registered for recorded secrets, leaving them in state"
            );
            return;
        };
        // The store may have been dropped from the config since the secret
        // was written; the blob is then simply absent.
        let store_config = config
            .store_config(&alias)
            .and_then(|s| s.config.clone());

        for secret in secrets {
            match store.delete(&secret.path, store_config.as_ref()).await {
                Ok(()) => {
                    info!(
                        store = %store_type,
                        path = %secret.path,
                        resource_id = %secret.resource_id,
                        "{log_message}"
                    );
                    let partition = &mut state.stores[partition_index].secrets;
                    if let Some(position) = partition.iter().position(|s| *s == secret) {
                        partition.remove(position);
                    }
                }
                Err(e) => {
                    error!(
                        store = %store_type,
                        path = %secret.path,
                        "failed to delete secret, will retry next pass: {e:#}"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::InprocessStore;
    use crate::{Credential, Metadata, Request};
    use anyhow::Result;
    use async_trait::async_trait;

    struct NamedProvider(ProviderType);

    #[async_trait]
    impl Provider for NamedProvider {
        fn provider_type(&self) -> ProviderType {
            self.0.clone()
        }

        async fn create(&self, _request: &Request) -> Result<(Vec<Credential>, Option<Metadata>)> {
            unimplemented!("not exercised")
        }

        async fn destroy(&self, _resource: &Resource) -> Result<()> {
            Ok(())
        }
    }

    fn reconciler(
        providers: Vec<Arc<dyn Provider>>,
        stores: Vec<Arc<dyn SecretStore>>,
    ) -> Result<Reconciler, ReconcilerError> {
        Reconciler::new(
            providers,
            stores,
            Duration::minutes(10),
            Arc::new(FixedClock::new(Utc::now())),
        )
    }

    #[test]
    fn rejects_duplicate_providers() {
        let err = reconciler(
            vec![
                Arc::new(NamedProvider(ProviderType::Random)),
                Arc::new(NamedProvider(ProviderType::Random)),
            ],
            vec![Arc::new(InprocessStore::new())],
        )
        .unwrap_err();
        assert_eq!(err, ReconcilerError::DuplicateProvider(ProviderType::Random));
        assert_eq!(err.to_string(), "duplicate provider: random");
    }

    #[test]
    fn rejects_duplicate_stores() {
        let err = reconciler(
            vec![Arc::new(NamedProvider(ProviderType::Random))],
            vec![
                Arc::new(InprocessStore::new()),
                Arc::new(InprocessStore::new()),
            ],
        )
        .unwrap_err();
        assert_eq!(err, ReconcilerError::DuplicateStore(StoreType::Inprocess));
    }

    #[tokio::test]
    async fn unknown_store_alias_is_fatal_for_the_pass() {
        let engine = reconciler(
            vec![Arc::new(NamedProvider(ProviderType::Random))],
            vec![Arc::new(InprocessStore::new())],
        )
        .unwrap();
        let config: Config = serde_yaml::from_str(
            "
version: 1
namespace: team-x
stores:
  - type: inprocess
requests:
  - store: missing
    type: random
    credentials:
      - name: example
",
        )
        .unwrap();

        let mut state = State::new();
        let err = engine.process("team-x", &config, &mut state).await.unwrap_err();
        assert_eq!(err, ProcessError::UnknownStoreAlias("missing".to_string()));
    }

    #[tokio::test]
    async fn unregistered_store_type_is_fatal_for_the_pass() {
        let engine = reconciler(
            vec![Arc::new(NamedProvider(ProviderType::Random))],
            vec![Arc::new(InprocessStore::new())],
        )
        .unwrap();
        let config: Config = serde_yaml::from_str(
            "
version: 1
namespace: team-x
stores:
  - type: file
requests:
  - store: file
    type: random
    credentials:
      - name: example
",
        )
        .unwrap();

        let mut state = State::new();
        let err = engine.process("team-x", &config, &mut state).await.unwrap_err();
        assert_eq!(err, ProcessError::UnknownStoreType(StoreType::File));
    }
}

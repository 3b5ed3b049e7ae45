//! End-to-end scenarios for the reconciliation engine, driven through a
//! fake provider and the in-process store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use credrotate::provider::Provider;
use credrotate::store::{InprocessStore, SecretStore};
use credrotate::{
    Config, Credential, FixedClock, Metadata, ProviderType, Reconciler, Request, Resource, Secret,
    State, StoreConfig, StoreType,
};

const ROTATION_WINDOW_MINUTES: i64 = 10;

/// Provider serving the `fake` credential type, counting its calls.
struct FakeProvider {
    create_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    expiration: DateTime<Utc>,
}

impl FakeProvider {
    fn new(expiration: DateTime<Utc>) -> Self {
        Self {
            create_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            expiration,
        }
    }

    fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Other("fake".to_string())
    }

    async fn create(&self, _request: &Request) -> Result<(Vec<Credential>, Option<Metadata>)> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok((
            vec![Credential::new("fake-credential", "fake-value", self.expiration)],
            None,
        ))
    }

    async fn destroy(&self, _resource: &Resource) -> Result<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn resource(id: &str, expiration: DateTime<Utc>, in_use: bool) -> Resource {
    Resource {
        id: id.to_string(),
        expiration,
        in_use,
        metadata: None,
    }
}

struct Scenario {
    description: &'static str,
    config: &'static str,
    resources: Vec<Resource>,
    expected_secrets: Vec<(&'static str, &'static str)>,
    expected_resources: Vec<Resource>,
    expected_create_calls: usize,
    expected_destroy_calls: usize,
}

#[tokio::test]
async fn process_scenarios() {
    let now = Utc::now();
    let test_time = now + Duration::hours(1);

    let scenarios = vec![
        Scenario {
            description: "first run creates credentials",
            config: "
version: 1
namespace: team-name
stores:
  - type: inprocess
requests:
  - store: inprocess
    credentials:
      - type: fake
        name: fake.state.id
",
            resources: vec![],
            expected_secrets: vec![("team-name.fake-credential", "fake-value")],
            expected_resources: vec![resource("fake.state.id", test_time, true)],
            expected_create_calls: 1,
            expected_destroy_calls: 0,
        },
        Scenario {
            description: "does not create credentials when they exist in state",
            config: "
version: 1
namespace: team-name
stores:
  - type: inprocess
requests:
  - store: inprocess
    credentials:
      - type: fake
        name: fake.state.id
",
            resources: vec![resource("fake.state.id", test_time, false)],
            expected_secrets: vec![],
            expected_resources: vec![resource("fake.state.id", test_time, true)],
            expected_create_calls: 0,
            expected_destroy_calls: 0,
        },
        Scenario {
            description: "replaces resources within the rotation window",
            config: "
version: 1
namespace: team-name
stores:
  - type: inprocess
requests:
  - store: inprocess
    credentials:
      - type: fake
        name: fake.state.id
",
            resources: vec![resource("fake.state.id", now + Duration::minutes(3), false)],
            expected_secrets: vec![("team-name.fake-credential", "fake-value")],
            expected_resources: vec![resource("fake.state.id", test_time, true)],
            expected_create_calls: 1,
            expected_destroy_calls: 1,
        },
        Scenario {
            description: "replaces expired resources",
            config: "
version: 1
namespace: team-name
stores:
  - type: inprocess
requests:
  - store: inprocess
    credentials:
      - type: fake
        name: fake.state.id
",
            resources: vec![resource("fake.state.id", now, false)],
            expected_secrets: vec![("team-name.fake-credential", "fake-value")],
            expected_resources: vec![resource("fake.state.id", test_time, true)],
            expected_create_calls: 1,
            expected_destroy_calls: 1,
        },
        Scenario {
            description: "destroys resources that are no longer requested",
            config: "
version: 1
namespace: team-name
stores:
  - type: inprocess
requests:
  - store: inprocess
    credentials: []
",
            resources: vec![resource("other.state.id", test_time, false)],
            expected_secrets: vec![],
            expected_resources: vec![],
            expected_create_calls: 0,
            expected_destroy_calls: 1,
        },
        Scenario {
            description: "does nothing if there are no requests",
            config: "
version: 1
namespace: team-name
stores:
  - type: inprocess
requests:
  - store: inprocess
    credentials: []
",
            resources: vec![],
            expected_secrets: vec![],
            expected_resources: vec![],
            expected_create_calls: 0,
            expected_destroy_calls: 0,
        },
        Scenario {
            description: "does nothing if there is no provider for the request",
            config: "
version: 1
namespace: team-name
stores:
  - type: inprocess
requests:
  - store: inprocess
    credentials:
      - type: aws:sts
        name: fake.state.id
",
            resources: vec![],
            expected_secrets: vec![],
            expected_resources: vec![],
            expected_create_calls: 0,
            expected_destroy_calls: 0,
        },
        Scenario {
            description: "credentials can inherit the type of the request group",
            config: "
version: 1
namespace: team-name
stores:
  - type: inprocess
requests:
  - store: inprocess
    type: fake
    credentials:
      - name: fake.state.id
",
            resources: vec![],
            expected_secrets: vec![("team-name.fake-credential", "fake-value")],
            expected_resources: vec![resource("fake.state.id", test_time, true)],
            expected_create_calls: 1,
            expected_destroy_calls: 0,
        },
    ];

    for scenario in scenarios {
        let config: Config = serde_yaml::from_str(scenario.config)
            .unwrap_or_else(|e| panic!("{}: config parses: {e}", scenario.description));

        let provider = Arc::new(FakeProvider::new(test_time));
        let store = Arc::new(InprocessStore::new());

        let mut state = State::new();
        for r in scenario.resources {
            state.add_resource(provider.provider_type(), r);
        }

        let reconciler = Reconciler::new(
            vec![provider.clone()],
            vec![store.clone()],
            Duration::minutes(ROTATION_WINDOW_MINUTES),
            Arc::new(FixedClock::new(now)),
        )
        .unwrap();

        reconciler
            .process("team-name", &config, &mut state)
            .await
            .unwrap_or_else(|e| panic!("{}: process succeeds: {e}", scenario.description));

        assert_eq!(
            provider.create_calls(),
            scenario.expected_create_calls,
            "{}: create calls",
            scenario.description
        );
        assert_eq!(
            provider.destroy_calls(),
            scenario.expected_destroy_calls,
            "{}: destroy calls",
            scenario.description
        );

        for partition in &state.providers {
            assert_eq!(
                partition.resources, scenario.expected_resources,
                "{}: resources",
                scenario.description
            );
        }

        for (path, value) in scenario.expected_secrets {
            let stored = store
                .read(path, None)
                .await
                .unwrap_or_else(|e| panic!("{}: read succeeds: {e}", scenario.description));
            assert_eq!(
                stored.as_deref(),
                Some(value),
                "{}: secret {path}",
                scenario.description
            );
        }
    }
}

/// Cleaning up expired resources and their secrets iterates collections
/// while removing from them, which is easy to get subtly wrong. This pins
/// the behavior: every deposed resource is destroyed exactly once and no
/// resource or secret entry survives.
#[tokio::test]
async fn cleanup_removes_every_deposed_resource_and_secret() {
    let now = Utc::now();
    let provider = Arc::new(FakeProvider::new(now + Duration::hours(1)));
    let store = Arc::new(InprocessStore::new());

    let mut state = State::new();
    for id in ["r1", "r2", "r3"] {
        state.add_resource(provider.provider_type(), resource(id, now, false));
    }
    let store_config = StoreConfig {
        store_type: StoreType::Inprocess,
        alias: None,
        config: None,
    };
    for (resource_id, path) in [("r1", "path1"), ("r1", "path2"), ("r2", "path3")] {
        state.add_secret(
            &store_config,
            Secret {
                resource_id: resource_id.to_string(),
                path: path.to_string(),
                expiration: now,
            },
        );
    }

    let reconciler = Reconciler::new(
        vec![provider.clone()],
        vec![store.clone()],
        Duration::minutes(ROTATION_WINDOW_MINUTES),
        Arc::new(FixedClock::new(now)),
    )
    .unwrap();

    let config: Config = serde_yaml::from_str("{version: 1, namespace: team-name}").unwrap();
    reconciler
        .process("team-name", &config, &mut state)
        .await
        .unwrap();

    assert_eq!(provider.destroy_calls(), 3, "destroy calls");
    assert_eq!(provider.create_calls(), 0, "create calls");
    for partition in &state.providers {
        assert!(partition.resources.is_empty(), "resources remain in state");
    }
    for partition in &state.stores {
        assert!(partition.secrets.is_empty(), "secrets remain in state");
    }
}

/// Two consecutive passes over the same config and time source: the second
/// neither creates nor destroys anything and leaves state byte-identical.
#[tokio::test]
async fn a_second_pass_is_a_no_op() {
    let now = Utc::now();
    let provider = Arc::new(FakeProvider::new(now + Duration::hours(1)));
    let store = Arc::new(InprocessStore::new());

    let config: Config = serde_yaml::from_str(
        "
version: 1
namespace: team-name
stores:
  - type: inprocess
requests:
  - store: inprocess
    type: fake
    credentials:
      - name: fake.state.id
",
    )
    .unwrap();

    let reconciler = Reconciler::new(
        vec![provider.clone()],
        vec![store.clone()],
        Duration::minutes(ROTATION_WINDOW_MINUTES),
        Arc::new(FixedClock::new(now)),
    )
    .unwrap();

    let mut state = State::new();
    reconciler.process("team-name", &config, &mut state).await.unwrap();
    let after_first = state.clone();

    reconciler.process("team-name", &config, &mut state).await.unwrap();
    assert_eq!(state, after_first, "state changed on the second pass");
    assert_eq!(provider.create_calls(), 1, "create calls");
    assert_eq!(provider.destroy_calls(), 0, "destroy calls");
}

/// A crash between writing a secret and recording its resource leaves a
/// dangling secret; the orphan sweep deletes it from both the store and
/// state.
#[tokio::test]
async fn orphaned_secrets_are_swept() {
    let now = Utc::now();
    let provider = Arc::new(FakeProvider::new(now + Duration::hours(1)));
    let store = Arc::new(InprocessStore::new());

    let orphan_path = "team-name.orphan";
    store
        .write(
            "team-name",
            &Credential::new("orphan", "dangling-value", now),
            None,
        )
        .await
        .unwrap();

    let mut state = State::new();
    state.add_secret(
        &StoreConfig {
            store_type: StoreType::Inprocess,
            alias: None,
            config: None,
        },
        Secret {
            resource_id: "never.recorded".to_string(),
            path: orphan_path.to_string(),
            expiration: now,
        },
    );

    let reconciler = Reconciler::new(
        vec![provider.clone()],
        vec![store.clone()],
        Duration::minutes(ROTATION_WINDOW_MINUTES),
        Arc::new(FixedClock::new(now)),
    )
    .unwrap();

    let config: Config = serde_yaml::from_str("{version: 1, namespace: team-name}").unwrap();
    reconciler
        .process("team-name", &config, &mut state)
        .await
        .unwrap();

    assert_eq!(provider.destroy_calls(), 0, "destroy calls");
    assert_eq!(store.read(orphan_path, None).await.unwrap(), None);
    for partition in &state.stores {
        assert!(partition.secrets.is_empty(), "secrets remain in state");
    }
}

/// A rotation must not tear down the secrets its successor just wrote:
/// the deposed resource shares its identity with the fresh one, and their
/// secrets occupy the same store paths.
#[tokio::test]
async fn rotation_preserves_the_fresh_secret() {
    let now = Utc::now();
    let provider = Arc::new(FakeProvider::new(now + Duration::hours(1)));
    let store = Arc::new(InprocessStore::new());

    let mut state = State::new();
    state.add_resource(
        provider.provider_type(),
        resource("fake.state.id", now, false),
    );
    let store_config = StoreConfig {
        store_type: StoreType::Inprocess,
        alias: None,
        config: None,
    };
    state.add_secret(
        &store_config,
        Secret {
            resource_id: "fake.state.id".to_string(),
            path: "team-name.fake-credential".to_string(),
            expiration: now,
        },
    );

    let reconciler = Reconciler::new(
        vec![provider.clone()],
        vec![store.clone()],
        Duration::minutes(ROTATION_WINDOW_MINUTES),
        Arc::new(FixedClock::new(now)),
    )
    .unwrap();

    let config: Config = serde_yaml::from_str(
        "
version: 1
namespace: team-name
stores:
  - type: inprocess
requests:
  - store: inprocess
    type: fake
    credentials:
      - name: fake.state.id
",
    )
    .unwrap();
    reconciler
        .process("team-name", &config, &mut state)
        .await
        .unwrap();

    assert_eq!(provider.create_calls(), 1, "create calls");
    assert_eq!(provider.destroy_calls(), 1, "destroy calls");
    assert_eq!(
        store
            .read("team-name.fake-credential", None)
            .await
            .unwrap()
            .as_deref(),
        Some("fake-value"),
        "fresh secret survived the rotation"
    );
    assert_eq!(state.stores.len(), 1);
    assert_eq!(state.stores[0].secrets.len(), 1);
}

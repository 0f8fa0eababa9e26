//! In-memory implementations of the cluster and credential store used by unit tests.

use crate::cluster::{ClusterClient, Manifest};
use crate::credentials::{FederatedCredential, FederatedCredentialStore};
use crate::error::{self, Result};
use k8s_openapi::api::core::v1::{Namespace, NamespaceStatus, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ObjectMeta;
use kube::error::ErrorResponse;
use maplit::btreemap;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::sync::Mutex;
use testbed_model::constants::{APP_MANAGED_BY, LABEL_TEST_NAME, TESTBED};
use testbed_model::{CrdExt, Phase, Test, TestStatus};

fn api_error(code: u16) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: "injected by the mock cluster".to_string(),
        reason: "InternalError".to_string(),
        code,
    })
}

#[derive(Default)]
struct ClusterState {
    tests: BTreeMap<String, Test>,
    namespaces: BTreeMap<String, Namespace>,
    /// (namespace, kind, name) of the namespaced objects that exist, in creation order.
    objects: Vec<(String, &'static str, String)>,
    /// Every successful create call, including namespaces, never pruned.
    history: Vec<(String, &'static str, String)>,
    secrets: BTreeMap<(String, String), Secret>,
    /// Stands in for `resourceVersion`, bumped on every write to a test.
    version: u64,
    /// When an object of this kind is created, the test is moved to the phase behind the
    /// reconciler's back.
    phase_on_create: Option<(&'static str, String, Phase)>,
    fail_create: Option<&'static str>,
    fail_list: bool,
    fail_get_namespace: bool,
    not_ready: bool,
    creates: usize,
}

impl ClusterState {
    /// Store `phase` on the test as some other writer would, without any precondition.
    fn write_phase(&mut self, test_name: &str, phase: Phase) {
        self.version += 1;
        let version = self.version.to_string();
        if let Some(test) = self.tests.get_mut(test_name) {
            test.status.get_or_insert_with(TestStatus::default).phase = phase;
            test.metadata.resource_version = Some(version);
        }
    }
}

/// A cluster that keeps everything in memory.
#[derive(Default)]
pub(crate) struct MockCluster {
    state: Mutex<ClusterState>,
}

impl MockCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_test(&self, mut test: Test) {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        test.metadata.resource_version = Some(state.version.to_string());
        state
            .tests
            .insert(test.metadata.name.clone().unwrap_or_default(), test);
    }

    /// Another client, e.g. `testbed cancel` or the results callback, sets the test's phase.
    pub(crate) fn update_phase(&self, test_name: &str, phase: Phase) {
        self.state.lock().unwrap().write_phase(test_name, phase);
    }

    /// The first time an object of `kind` is created, another client sets the test's phase.
    pub(crate) fn update_phase_on_create(&self, kind: &'static str, test_name: &str, phase: Phase) {
        self.state.lock().unwrap().phase_on_create = Some((kind, test_name.to_string(), phase));
    }

    pub(crate) fn add_secret(&self, namespace: &str, name: &str) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert((namespace.to_string(), name.to_string()), secret);
    }

    /// Pretend the controller created the namespace of test `name` `age` ago, and that it is in
    /// `phase`.
    pub(crate) fn add_namespace(&self, name: &str, phase: &str, age: chrono::Duration) {
        let labels = btreemap! {
            APP_MANAGED_BY.to_string() => TESTBED.to_string(),
            LABEL_TEST_NAME.to_string() => name.to_string(),
        };
        self.insert_namespace(name, phase, age, Some(labels));
    }

    /// A namespace that has nothing to do with testbed.
    pub(crate) fn add_foreign_namespace(&self, name: &str, phase: &str, age: chrono::Duration) {
        self.insert_namespace(name, phase, age, None);
    }

    fn insert_namespace(
        &self,
        name: &str,
        phase: &str,
        age: chrono::Duration,
        labels: Option<BTreeMap<String, String>>,
    ) {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                creation_timestamp: Some(Time(chrono::Utc::now() - age)),
                labels,
                ..Default::default()
            },
            status: Some(NamespaceStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .namespaces
            .insert(name.to_string(), namespace);
    }

    /// Every creation of an object of `kind` fails.
    pub(crate) fn fail_create(&self, kind: &'static str) {
        self.state.lock().unwrap().fail_create = Some(kind);
    }

    pub(crate) fn fail_list(&self, fail: bool) {
        self.state.lock().unwrap().fail_list = fail;
    }

    pub(crate) fn fail_get_namespace(&self, fail: bool) {
        self.state.lock().unwrap().fail_get_namespace = fail;
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.state.lock().unwrap().not_ready = !ready;
    }

    pub(crate) fn test(&self, name: &str) -> Test {
        self.state.lock().unwrap().tests[name].clone()
    }

    pub(crate) fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().unwrap().namespaces.contains_key(name)
    }

    /// `(kind, name)` of the objects that currently exist in `namespace`, in creation order.
    pub(crate) fn objects_in(&self, namespace: &str) -> Vec<(&'static str, String)> {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .filter(|(ns, _, _)| ns == namespace)
            .map(|(_, kind, name)| (*kind, name.clone()))
            .collect()
    }

    /// `(kind, name)` of every object ever created in `namespace`, deleted or not.
    pub(crate) fn history_in(&self, namespace: &str) -> Vec<(&'static str, String)> {
        self.state
            .lock()
            .unwrap()
            .history
            .iter()
            .filter(|(ns, _, _)| ns == namespace)
            .map(|(_, kind, name)| (*kind, name.clone()))
            .collect()
    }

    /// How many create calls succeeded, including ones for objects that already existed.
    pub(crate) fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }
}

#[async_trait::async_trait]
impl ClusterClient for MockCluster {
    async fn list_tests(&self) -> Result<Vec<Test>> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(api_error(500)).context(error::KubeApiSnafu {
                action: "list tests",
                namespace: "testbed",
            });
        }
        Ok(state.tests.values().cloned().collect())
    }

    async fn transition(&self, test: &Test, phase: Phase) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let name = test.object_name();
        let stored = match state.tests.get(name) {
            Some(stored) => stored,
            None => return Ok(false),
        };
        if test.resource_version().is_some() && stored.resource_version() != test.resource_version()
        {
            return Ok(false);
        }
        state.write_phase(name, phase);
        Ok(true)
    }

    async fn set_complete(&self, test_name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.version += 1;
        let version = state.version.to_string();
        if let Some(test) = state.tests.get_mut(test_name) {
            test.status.get_or_insert_with(TestStatus::default).complete = true;
            test.metadata.resource_version = Some(version);
        }
        Ok(())
    }

    async fn create(&self, manifest: &Manifest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create == Some(manifest.kind()) {
            return Err(api_error(500)).context(error::KubeApiSnafu {
                action: format!("create {}", manifest),
                namespace: manifest.namespace(),
            });
        }
        state.creates += 1;
        if let Some((kind, test_name, phase)) = state.phase_on_create.take() {
            if kind == manifest.kind() {
                state.write_phase(&test_name, phase);
            } else {
                state.phase_on_create = Some((kind, test_name, phase));
            }
        }
        let namespace = manifest.namespace().to_string();
        state.history.push((
            namespace.clone(),
            manifest.kind(),
            manifest.name().to_string(),
        ));
        match manifest {
            Manifest::Namespace(ns) => {
                if !state.namespaces.contains_key(&namespace) {
                    let mut ns = ns.clone();
                    ns.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
                    ns.status = Some(NamespaceStatus {
                        phase: Some("Active".to_string()),
                        ..Default::default()
                    });
                    state.namespaces.insert(namespace, ns);
                }
            }
            _ => {
                let key = (namespace, manifest.kind(), manifest.name().to_string());
                if !state.objects.contains(&key) {
                    state.objects.push(key);
                }
            }
        }
        Ok(())
    }

    async fn ready(&self, manifest: &Manifest) -> Result<bool> {
        Ok(!manifest.is_workload() || !self.state.lock().unwrap().not_ready)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let state = self.state.lock().unwrap();
        if state.fail_get_namespace {
            return Err(api_error(500)).context(error::KubeApiSnafu {
                action: "get namespace",
                namespace: name,
            });
        }
        Ok(state.namespaces.get(name).cloned())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.namespaces.remove(name);
        state.objects.retain(|(ns, _, _)| ns != name);
        state.secrets.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// A credential store that keeps registrations in memory, keyed by identity and name.
#[derive(Default)]
pub(crate) struct MockStore {
    credentials: Mutex<BTreeMap<(String, String), FederatedCredential>>,
    calls: Mutex<usize>,
    fail_upsert: Mutex<bool>,
}

impl MockStore {
    pub(crate) fn get(&self, identity: &str, name: &str) -> Option<FederatedCredential> {
        self.credentials
            .lock()
            .unwrap()
            .get(&(identity.to_string(), name.to_string()))
            .cloned()
    }

    pub(crate) fn count(&self, identity: &str) -> usize {
        self.credentials
            .lock()
            .unwrap()
            .keys()
            .filter(|(i, _)| i == identity)
            .count()
    }

    pub(crate) fn total(&self) -> usize {
        self.credentials.lock().unwrap().len()
    }

    pub(crate) fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub(crate) fn fail_upsert(&self, fail: bool) {
        *self.fail_upsert.lock().unwrap() = fail;
    }
}

#[async_trait::async_trait]
impl FederatedCredentialStore for MockStore {
    async fn upsert(&self, identity: &str, credential: &FederatedCredential) -> Result<()> {
        *self.calls.lock().unwrap() += 1;
        if *self.fail_upsert.lock().unwrap() {
            return error::AzureResponseSnafu {
                action: format!("create federated credential '{}'", credential.name),
                status: 500u16,
                body: "injected by the mock store",
            }
            .fail();
        }
        self.credentials.lock().unwrap().insert(
            (identity.to_string(), credential.name.clone()),
            credential.clone(),
        );
        Ok(())
    }

    async fn delete(&self, identity: &str, name: &str) -> Result<()> {
        *self.calls.lock().unwrap() += 1;
        self.credentials
            .lock()
            .unwrap()
            .remove(&(identity.to_string(), name.to_string()));
        Ok(())
    }

    async fn list(&self, identity: &str) -> Result<Vec<String>> {
        *self.calls.lock().unwrap() += 1;
        Ok(self
            .credentials
            .lock()
            .unwrap()
            .keys()
            .filter(|(i, _)| i == identity)
            .map(|(_, name)| name.clone())
            .collect())
    }
}

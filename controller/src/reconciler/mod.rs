//! The polling loop that drives every `Test` through its lifecycle, and the sweeper that removes
//! federated credentials left behind by tests that no longer exist.
//!
//! A pass lists every test and takes one action per test. All actions are idempotent, so an
//! action that fails half way is simply taken again on a later pass.

mod action;
mod deploy;
mod destroy;
mod timeout;

use crate::builder::Builder;
use crate::cluster::ClusterClient;
use crate::credentials::{CredentialManager, FederatedCredentialStore};
use crate::error::Result;
use crate::settings::Settings;
use action::{determine_action, Action};
use log::{debug, error, info, trace};
use std::collections::HashSet;
use testbed_model::{CrdExt, Test};

pub(crate) struct Reconciler<C, S>
where
    C: ClusterClient,
    S: FederatedCredentialStore,
{
    cluster: C,
    credentials: CredentialManager<S>,
    builder: Builder,
    settings: Settings,
}

impl<C, S> Reconciler<C, S>
where
    C: ClusterClient,
    S: FederatedCredentialStore,
{
    pub(crate) fn new(
        cluster: C,
        credentials: CredentialManager<S>,
        builder: Builder,
        settings: Settings,
    ) -> Self {
        Self {
            cluster,
            credentials,
            builder,
            settings,
        }
    }

    /// Reconcile forever, once per poll interval.
    pub(crate) async fn run(&self) {
        info!(
            "Watching tests in namespace '{}' every {:?}",
            self.settings.namespace, self.settings.poll_interval
        );
        loop {
            self.tick().await;
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// One pass over every test. A failure to list tests skips the pass, a failure to reconcile
    /// one test does not stop the others.
    pub(crate) async fn tick(&self) {
        let tests = match self.cluster.list_tests().await {
            Ok(tests) => tests,
            Err(e) => {
                error!("Unable to list tests, skipping this pass: {}", e);
                return;
            }
        };
        trace!("Reconciling {} tests", tests.len());
        for test in &tests {
            let action = determine_action(test);
            if let Err(e) = self.reconcile(test, action).await {
                error!("Unable to {} test '{}': {}", action, test.object_name(), e);
            }
        }
    }

    async fn reconcile(&self, test: &Test, action: Action) -> Result<()> {
        debug!("Action '{}' for test '{}'", action, test.object_name());
        match action {
            Action::Skip => Ok(()),
            Action::Deploy => self.deploy(test).await,
            Action::Destroy => self.destroy(test).await,
            Action::CheckTimeout => self.check_timeout(test).await,
        }
    }

    /// Sweep at startup and then once per sweep interval.
    pub(crate) async fn run_sweeper(&self) {
        loop {
            match self.sweep().await {
                Ok(deleted) => info!("Sweep removed {} orphaned federated credentials", deleted),
                Err(e) => error!("Unable to sweep federated credentials: {}", e),
            }
            tokio::time::sleep(self.settings.sweep_interval).await;
        }
    }

    /// Remove every credential that does not belong to a test which still has, or may still get,
    /// a namespace. Credentials are listed before tests so that one granted during the sweep is
    /// never mistaken for an orphan.
    pub(crate) async fn sweep(&self) -> Result<usize> {
        let registered = self.credentials.registered().await?;
        let live: HashSet<String> = self
            .cluster
            .list_tests()
            .await?
            .iter()
            .filter(|test| !test.is_complete())
            .map(|test| test.namespace_name().to_string())
            .collect();
        Ok(self.credentials.sweep_orphans(registered, &live).await)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{MockCluster, MockStore};
    use crate::settings::CredentialSettings;
    use maplit::btreemap;
    use std::time::Duration;
    use testbed_model::{Component, Phase, TestSpec, TestStatus};

    const NAME: &str = "quick-red-fox";

    fn settings() -> Settings {
        Settings {
            namespace: "testbed".to_string(),
            poll_interval: Duration::from_secs(10),
            max_test_duration: Duration::from_secs(7200),
            sweep_interval: Duration::from_secs(1800),
            source_namespace: "default".to_string(),
            shared_secrets: vec!["azure-storage".to_string()],
            image_pull_secret: "binkcore.azurecr.io".to_string(),
            identity_secret: "azure-identities".to_string(),
            registry: "binkcore.azurecr.io".to_string(),
            readiness_gate: false,
            readiness_timeout: Duration::from_secs(0),
            credentials: CredentialSettings {
                identities: vec!["hermes".to_string(), "pytest".to_string()],
                ignored_prefixes: vec!["staging-".to_string()],
                resource_group: "uksouth-ait".to_string(),
                subscription_id: "0000".to_string(),
                issuer_url: "https://oidc.example.com/".to_string(),
            },
        }
    }

    fn reconciler(settings: Settings) -> Reconciler<MockCluster, MockStore> {
        let cluster = MockCluster::new();
        cluster.add_secret("default", "azure-storage");
        cluster.add_secret("default", "binkcore.azurecr.io");
        let builder = Builder::new(
            &settings.registry,
            &settings.image_pull_secret,
            btreemap! { "hermes".to_string() => "hermes-client-id".to_string() },
        );
        let credentials =
            CredentialManager::new(MockStore::default(), settings.credentials.clone());
        Reconciler::new(cluster, credentials, builder, settings)
    }

    fn new_test(name: &str, infrastructure: &[&str], applications: &[&str], suite: &str) -> Test {
        Test::new(
            name,
            TestSpec {
                infrastructure: infrastructure.iter().map(|c| Component::new(*c)).collect(),
                applications: applications.iter().map(|c| Component::new(*c)).collect(),
                test: Component::new(suite),
            },
        )
    }

    fn with_status(mut test: Test, phase: Phase, complete: bool) -> Test {
        test.status = Some(TestStatus {
            phase,
            results: None,
            complete,
        });
        test
    }

    fn has(objects: &[(&'static str, String)], kind: &str, name: &str) -> bool {
        objects.iter().any(|(k, n)| *k == kind && n == name)
    }

    #[tokio::test]
    async fn pending_test_is_deployed() {
        let r = reconciler(settings());
        r.cluster
            .add_test(new_test(NAME, &["postgres"], &["hermes"], "pytest"));
        r.tick().await;

        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Running);
        assert!(!test.is_complete());
        assert!(r.cluster.has_namespace(NAME));

        let objects = r.cluster.objects_in(NAME);
        assert!(has(&objects, "Role", "k8s-wait-for"));
        assert!(has(&objects, "Secret", "azure-storage"));
        assert!(has(&objects, "Secret", "binkcore.azurecr.io"));
        assert!(has(&objects, "Deployment", "postgres"));
        assert!(has(&objects, "Job", "hermes-migrator"));
        assert!(has(&objects, "Deployment", "hermes"));
        assert!(has(&objects, "Job", "pytest"));

        // Layers are created in order.
        let position = |kind: &str, name: &str| {
            objects
                .iter()
                .position(|(k, n)| *k == kind && n == name)
                .unwrap()
        };
        assert!(position("Deployment", "postgres") < position("Deployment", "hermes"));
        assert!(position("Deployment", "hermes") < position("Job", "pytest"));

        let store = r.credentials.store();
        let hermes = store.get("hermes", "quick-red-fox-hermes").unwrap();
        assert_eq!(hermes.subject, "system:serviceaccount:quick-red-fox:hermes");
        assert!(store.get("pytest", "quick-red-fox-pytest").is_some());
    }

    #[tokio::test]
    async fn missing_shared_secret_is_skipped() {
        let r = reconciler(settings());
        r.cluster.add_test(new_test(NAME, &[], &[], "pytest"));
        let mut settings = settings();
        settings.shared_secrets.push("not-there".to_string());
        let r = Reconciler { settings, ..r };
        r.tick().await;
        assert_eq!(r.cluster.test(NAME).phase(), Phase::Running);
        assert!(!has(&r.cluster.objects_in(NAME), "Secret", "not-there"));
    }

    #[tokio::test]
    async fn finished_test_is_torn_down() {
        for phase in [Phase::Completed, Phase::Failed, Phase::Cancelled] {
            let r = reconciler(settings());
            r.cluster.add_test(with_status(
                new_test(NAME, &[], &[], "pytest"),
                phase,
                false,
            ));
            r.cluster
                .add_namespace(NAME, "Active", chrono::Duration::minutes(5));
            r.credentials.grant(NAME).await.unwrap();

            r.tick().await;
            let test = r.cluster.test(NAME);
            assert_eq!(test.phase(), phase);
            assert!(test.is_complete());
            assert!(!r.cluster.has_namespace(NAME));
            assert_eq!(r.credentials.store().total(), 0);
        }
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let r = reconciler(settings());
        let test = with_status(new_test(NAME, &[], &[], "pytest"), Phase::Failed, false);
        r.cluster.add_test(test.clone());
        r.cluster
            .add_namespace(NAME, "Active", chrono::Duration::minutes(5));
        r.destroy(&test).await.unwrap();
        r.destroy(&test).await.unwrap();
        assert!(r.cluster.test(NAME).is_complete());
        assert!(!r.cluster.has_namespace(NAME));
    }

    #[tokio::test]
    async fn complete_test_is_left_alone() {
        let r = reconciler(settings());
        r.cluster.add_test(with_status(
            new_test(NAME, &[], &[], "pytest"),
            Phase::Failed,
            true,
        ));
        // Someone reused the name for a namespace of their own.
        r.cluster
            .add_foreign_namespace(NAME, "Active", chrono::Duration::minutes(5));
        r.tick().await;
        assert!(r.cluster.has_namespace(NAME));
        assert_eq!(r.cluster.creates(), 0);
    }

    #[tokio::test]
    async fn running_test_times_out() {
        let r = reconciler(settings());
        r.cluster.add_test(with_status(
            new_test(NAME, &[], &[], "pytest"),
            Phase::Running,
            false,
        ));
        r.cluster
            .add_namespace(NAME, "Active", chrono::Duration::hours(3));

        r.tick().await;
        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Failed);
        assert!(!test.is_complete());

        r.tick().await;
        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Failed);
        assert!(test.is_complete());
        assert!(!r.cluster.has_namespace(NAME));
    }

    #[tokio::test]
    async fn running_test_within_limit() {
        let r = reconciler(settings());
        r.cluster.add_test(with_status(
            new_test(NAME, &[], &[], "pytest"),
            Phase::Running,
            false,
        ));
        r.cluster
            .add_namespace(NAME, "Active", chrono::Duration::minutes(30));
        r.tick().await;
        assert_eq!(r.cluster.test(NAME).phase(), Phase::Running);
        assert!(r.cluster.has_namespace(NAME));
    }

    #[tokio::test]
    async fn running_test_without_namespace_fails() {
        let r = reconciler(settings());
        r.cluster.add_test(with_status(
            new_test(NAME, &[], &[], "pytest"),
            Phase::Running,
            false,
        ));
        r.tick().await;
        assert_eq!(r.cluster.test(NAME).phase(), Phase::Failed);
    }

    #[tokio::test]
    async fn unknown_application_fails_before_its_layer() {
        let r = reconciler(settings());
        r.cluster
            .add_test(new_test(NAME, &["postgres"], &["hermes", "atlantis"], "pytest"));
        r.tick().await;

        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Failed);
        assert!(test.is_complete());
        assert!(!r.cluster.has_namespace(NAME));
        assert_eq!(r.credentials.store().total(), 0);

        let history = r.cluster.history_in(NAME);
        assert!(has(&history, "Deployment", "postgres"));
        assert!(!has(&history, "ServiceAccount", "hermes"));
        assert!(!has(&history, "Deployment", "hermes"));
        assert!(!has(&history, "Job", "pytest"));
    }

    #[tokio::test]
    async fn terminating_namespace_defers_deploy() {
        let r = reconciler(settings());
        r.cluster.add_test(new_test(NAME, &[], &[], "pytest"));
        r.cluster
            .add_namespace(NAME, "Terminating", chrono::Duration::minutes(1));
        r.tick().await;
        assert_eq!(r.cluster.test(NAME).phase(), Phase::Pending);
        assert_eq!(r.cluster.creates(), 0);
        assert_eq!(r.credentials.store().calls(), 0);
    }

    #[tokio::test]
    async fn readiness_gate_times_out() {
        let mut settings = settings();
        settings.readiness_gate = true;
        let r = reconciler(settings);
        r.cluster.set_ready(false);
        r.cluster
            .add_test(new_test(NAME, &["postgres"], &["hermes"], "pytest"));
        r.tick().await;

        assert_eq!(r.cluster.test(NAME).phase(), Phase::Failed);
        let history = r.cluster.history_in(NAME);
        assert!(has(&history, "Deployment", "postgres"));
        assert!(!has(&history, "Deployment", "hermes"));
    }

    #[tokio::test]
    async fn readiness_gate_passes() {
        let mut settings = settings();
        settings.readiness_gate = true;
        let r = reconciler(settings);
        r.cluster
            .add_test(new_test(NAME, &["postgres"], &["hermes"], "pytest"));
        r.tick().await;
        assert_eq!(r.cluster.test(NAME).phase(), Phase::Running);
    }

    #[tokio::test]
    async fn create_failure_rolls_back() {
        let r = reconciler(settings());
        r.cluster.fail_create("Deployment");
        r.cluster
            .add_test(new_test(NAME, &["postgres"], &[], "pytest"));
        r.tick().await;
        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Failed);
        assert!(test.is_complete());
        assert!(!r.cluster.has_namespace(NAME));
    }

    #[tokio::test]
    async fn credential_failure_rolls_back() {
        let r = reconciler(settings());
        r.credentials.store().fail_upsert(true);
        r.cluster.add_test(new_test(NAME, &[], &[], "pytest"));
        r.tick().await;
        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Failed);
        assert!(test.is_complete());
        assert!(!r.cluster.has_namespace(NAME));
    }

    #[tokio::test]
    async fn list_failure_skips_the_pass() {
        let r = reconciler(settings());
        r.cluster.add_test(new_test(NAME, &[], &[], "pytest"));
        r.cluster.fail_list(true);
        r.tick().await;
        assert!(r.cluster.test(NAME).status.is_none());
        assert_eq!(r.cluster.creates(), 0);

        r.cluster.fail_list(false);
        r.tick().await;
        assert_eq!(r.cluster.test(NAME).phase(), Phase::Running);
    }

    #[tokio::test]
    async fn one_bad_test_does_not_block_others() {
        let r = reconciler(settings());
        r.cluster.add_test(new_test("a-broken", &[], &[], "atlantis"));
        r.cluster.add_test(new_test("b-working", &[], &[], "pytest"));
        r.tick().await;
        assert_eq!(r.cluster.test("a-broken").phase(), Phase::Failed);
        assert_eq!(r.cluster.test("b-working").phase(), Phase::Running);
    }

    #[tokio::test]
    async fn test_lifecycle_end_to_end() {
        let r = reconciler(settings());
        r.cluster
            .add_test(new_test(NAME, &["postgres"], &["hermes"], "pytest"));
        r.tick().await;
        assert_eq!(r.cluster.test(NAME).phase(), Phase::Running);
        assert_eq!(r.credentials.store().total(), 2);

        // The test suite reports a failure.
        r.cluster.update_phase(NAME, Phase::Failed);
        r.tick().await;
        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Failed);
        assert!(test.is_complete());
        assert!(!r.cluster.has_namespace(NAME));
        assert!(r.cluster.objects_in(NAME).is_empty());
        assert_eq!(r.credentials.store().total(), 0);

        // Nothing else happens to a complete test.
        let creates = r.cluster.creates();
        r.tick().await;
        assert_eq!(r.cluster.creates(), creates);
        assert_eq!(r.credentials.store().total(), 0);
    }

    #[tokio::test]
    async fn resubmitted_name_starts_fresh() {
        let r = reconciler(settings());
        r.cluster.add_test(new_test(NAME, &["redis"], &[], "pytest"));
        r.tick().await;
        r.cluster.update_phase(NAME, Phase::Completed);
        r.tick().await;
        assert!(r.cluster.test(NAME).is_complete());

        // The old object is deleted and a new one is submitted under the same name.
        r.cluster.add_test(new_test(NAME, &["postgres"], &[], "pytest"));
        r.tick().await;

        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Running);
        assert!(!test.is_complete());
        assert!(test.results().is_none());
        assert!(r.cluster.has_namespace(NAME));
        let objects = r.cluster.objects_in(NAME);
        assert!(has(&objects, "Deployment", "postgres"));
        assert!(!has(&objects, "Deployment", "redis"));
        assert_eq!(r.credentials.store().total(), 2);
    }

    #[tokio::test]
    async fn reserved_names_are_refused() {
        for name in ["testbed", "default", "kube-system"] {
            let r = reconciler(settings());
            r.cluster
                .add_foreign_namespace(name, "Active", chrono::Duration::days(30));
            r.cluster.add_test(new_test(name, &[], &["hermes"], "pytest"));
            for _ in 0..3 {
                r.tick().await;
            }
            let test = r.cluster.test(name);
            assert_eq!(test.phase(), Phase::Failed);
            assert!(test.is_complete());
            assert!(r.cluster.has_namespace(name));
            assert_eq!(r.cluster.creates(), 0);
            assert_eq!(r.credentials.store().calls(), 0);
        }
    }

    #[tokio::test]
    async fn foreign_namespace_is_never_adopted() {
        let r = reconciler(settings());
        r.cluster
            .add_foreign_namespace(NAME, "Active", chrono::Duration::days(30));
        r.cluster.add_test(new_test(NAME, &[], &["hermes"], "pytest"));
        for _ in 0..3 {
            r.tick().await;
        }
        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Failed);
        assert!(test.is_complete());
        assert!(r.cluster.has_namespace(NAME));
        assert_eq!(r.cluster.creates(), 0);
        assert_eq!(r.credentials.store().calls(), 0);
    }

    #[tokio::test]
    async fn destroy_leaves_foreign_namespace() {
        let r = reconciler(settings());
        r.cluster.add_test(with_status(
            new_test(NAME, &[], &[], "pytest"),
            Phase::Cancelled,
            false,
        ));
        r.cluster
            .add_foreign_namespace(NAME, "Active", chrono::Duration::days(30));
        r.credentials.grant(NAME).await.unwrap();
        r.tick().await;
        assert!(r.cluster.test(NAME).is_complete());
        assert!(r.cluster.has_namespace(NAME));
        assert_eq!(r.credentials.store().total(), 2);
    }

    #[tokio::test]
    async fn replaced_namespace_fails_running_test() {
        let r = reconciler(settings());
        r.cluster.add_test(with_status(
            new_test(NAME, &[], &[], "pytest"),
            Phase::Running,
            false,
        ));
        r.cluster
            .add_foreign_namespace(NAME, "Active", chrono::Duration::minutes(5));
        r.tick().await;
        assert_eq!(r.cluster.test(NAME).phase(), Phase::Failed);
        r.tick().await;
        assert!(r.cluster.test(NAME).is_complete());
        assert!(r.cluster.has_namespace(NAME));
    }

    #[tokio::test]
    async fn cancel_during_deploy_is_honored() {
        let r = reconciler(settings());
        r.cluster.update_phase_on_create("Deployment", NAME, Phase::Cancelled);
        r.cluster
            .add_test(new_test(NAME, &["postgres"], &["hermes"], "pytest"));
        r.tick().await;
        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Cancelled);
        assert!(!test.is_complete());

        r.tick().await;
        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Cancelled);
        assert!(test.is_complete());
        assert!(!r.cluster.has_namespace(NAME));
        assert_eq!(r.credentials.store().total(), 0);
    }

    #[tokio::test]
    async fn cancel_during_failed_deploy_is_honored() {
        let r = reconciler(settings());
        r.cluster.update_phase_on_create("Role", NAME, Phase::Cancelled);
        r.cluster
            .add_test(new_test(NAME, &["postgres"], &["atlantis"], "pytest"));
        r.tick().await;
        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Cancelled);
        assert!(!test.is_complete());

        r.tick().await;
        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Cancelled);
        assert!(test.is_complete());
        assert!(!r.cluster.has_namespace(NAME));
    }

    #[tokio::test]
    async fn results_win_over_timeout() {
        let r = reconciler(settings());
        r.cluster.add_test(with_status(
            new_test(NAME, &[], &[], "pytest"),
            Phase::Running,
            false,
        ));
        r.cluster
            .add_namespace(NAME, "Active", chrono::Duration::hours(3));
        let listed = r.cluster.test(NAME);

        // The results callback lands between listing and the timeout check.
        r.cluster.update_phase(NAME, Phase::Completed);
        r.check_timeout(&listed).await.unwrap();
        assert_eq!(r.cluster.test(NAME).phase(), Phase::Completed);

        r.tick().await;
        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Completed);
        assert!(test.is_complete());
    }

    #[tokio::test]
    async fn namespace_lookup_failure_fails_deploy() {
        let r = reconciler(settings());
        r.cluster.add_test(new_test(NAME, &[], &[], "pytest"));
        r.cluster.fail_get_namespace(true);
        r.tick().await;
        let test = r.cluster.test(NAME);
        assert_eq!(test.phase(), Phase::Failed);
        assert!(!test.is_complete());
        assert_eq!(r.cluster.creates(), 0);

        r.cluster.fail_get_namespace(false);
        r.tick().await;
        assert!(r.cluster.test(NAME).is_complete());
    }

    #[tokio::test]
    async fn sweep_removes_orphans() {
        let r = reconciler(settings());
        r.cluster.add_test(with_status(
            new_test("alive", &[], &[], "pytest"),
            Phase::Running,
            false,
        ));
        r.cluster.add_test(with_status(
            new_test("done", &[], &[], "pytest"),
            Phase::Completed,
            true,
        ));
        for namespace in ["alive", "done", "deleted", "staging-shared"] {
            r.credentials.grant(namespace).await.unwrap();
        }

        // Two identities each for "done" and "deleted".
        assert_eq!(r.sweep().await.unwrap(), 4);
        let store = r.credentials.store();
        assert!(store.get("hermes", "alive-hermes").is_some());
        assert!(store.get("pytest", "staging-shared-pytest").is_some());
        assert!(store.get("hermes", "done-hermes").is_none());
        assert!(store.get("pytest", "deleted-pytest").is_none());
    }

    #[tokio::test]
    async fn sweep_fails_when_tests_cannot_be_listed() {
        let r = reconciler(settings());
        r.credentials.grant("deleted").await.unwrap();
        r.cluster.fail_list(true);
        assert!(r.sweep().await.is_err());
        assert_eq!(r.credentials.store().total(), 2);
    }
}

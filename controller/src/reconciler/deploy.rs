use super::Reconciler;
use crate::builder::Layer;
use crate::cluster::{belongs_to, namespace_phase, ClusterClient, Manifest, TERMINATING};
use crate::constants::READINESS_POLL_INTERVAL;
use crate::credentials::FederatedCredentialStore;
use crate::error::{self, Error, Result};
use futures::join;
use log::{debug, error, info, warn};
use snafu::ensure;
use std::slice;
use testbed_model::{validate_name, CrdExt, Phase, Test};
use tokio::time::Instant;

impl<C, S> Reconciler<C, S>
where
    C: ClusterClient,
    S: FederatedCredentialStore,
{
    /// Create the test's environment and mark it `Running`. If anything goes wrong the test is
    /// marked `Failed` and whatever was created is torn down again straight away.
    ///
    /// A namespace of the same name that the controller did not create for this test is never
    /// adopted. The test fails and nothing is torn down.
    pub(super) async fn deploy(&self, test: &Test) -> Result<()> {
        let name = test.object_name();
        let namespace = test.namespace_name();

        if let Err(e) = validate_name(name, &self.settings.namespace) {
            warn!("Refusing to deploy test '{}': {}", name, e);
            return self.reject(test).await;
        }

        let existing = match self.cluster.get_namespace(namespace).await {
            Ok(existing) => existing,
            Err(e) => return self.fail_deploy(test, e).await,
        };
        if let Some(existing) = existing {
            if namespace_phase(&existing) == Some(TERMINATING) {
                info!(
                    "Namespace '{}' is still terminating, deferring test '{}'",
                    namespace, name
                );
                return Ok(());
            }
            if !belongs_to(&existing, name) {
                warn!(
                    "Namespace '{}' already exists and was not created for test '{}', refusing to deploy",
                    namespace, name
                );
                return self.reject(test).await;
            }
        }

        info!("Deploying test '{}'", name);
        match self.create_environment(test).await {
            Ok(()) => {
                if self.cluster.transition(test, Phase::Running).await? {
                    info!("Test '{}' is running", name);
                } else {
                    info!(
                        "Test '{}' changed while it was being deployed, leaving it to the next pass",
                        name
                    );
                }
                Ok(())
            }
            Err(e) => self.fail_deploy(test, e).await,
        }
    }

    /// Fail the test and tear down whatever part of its environment exists, then return `error`.
    async fn fail_deploy(&self, test: &Test, error: Error) -> Result<()> {
        let name = test.object_name();
        if !self.cluster.transition(test, Phase::Failed).await? {
            info!(
                "Test '{}' changed while it was being deployed, leaving it to the next pass",
                name
            );
            return Err(error);
        }
        if let Err(destroy_error) = self.destroy(test).await {
            error!(
                "Unable to tear down test '{}' after a failed deploy, it will be retried: {}",
                name, destroy_error
            );
        }
        Err(error)
    }

    /// Fail a test that must not be deployed and mark it complete without touching its namespace.
    async fn reject(&self, test: &Test) -> Result<()> {
        let name = test.object_name();
        if self.cluster.transition(test, Phase::Failed).await? {
            self.cluster.set_complete(name).await?;
        }
        Ok(())
    }

    async fn create_environment(&self, test: &Test) -> Result<()> {
        let namespace = test.namespace_name();

        // Workloads may authenticate as soon as they start, so the grant has to be in place
        // before the first layer is created.
        let (granted, created) = join!(
            self.credentials.grant(namespace),
            self.create_namespace(namespace)
        );
        granted?;
        created?;

        let layers = [
            (Layer::Infrastructure, test.spec.infrastructure.as_slice()),
            (Layer::Application, test.spec.applications.as_slice()),
            (Layer::Test, slice::from_ref(&test.spec.test)),
        ];
        for (layer, components) in layers {
            let manifests = self.builder.build_layer(layer, components, namespace)?;
            debug!(
                "Creating {} {} objects for test '{}'",
                manifests.len(),
                layer,
                test.object_name()
            );
            self.create_all(&manifests).await?;
            if self.settings.readiness_gate && layer != Layer::Test {
                self.wait_until_ready(&manifests).await?;
            }
        }
        Ok(())
    }

    /// The namespace, its wait-for role and copies of the shared secrets.
    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        self.create_all(&self.builder.namespace(namespace)).await?;
        let source = &self.settings.source_namespace;
        let secrets = self
            .settings
            .shared_secrets
            .iter()
            .chain(Some(&self.settings.image_pull_secret));
        for secret_name in secrets {
            match self.cluster.get_secret(source, secret_name).await? {
                Some(secret) => {
                    self.cluster
                        .create(&self.builder.shared_secret(&secret, namespace))
                        .await?
                }
                None => warn!(
                    "Secret '{}' does not exist in namespace '{}', not copying it to '{}'",
                    secret_name, source, namespace
                ),
            }
        }
        Ok(())
    }

    async fn create_all(&self, manifests: &[Manifest]) -> Result<()> {
        for manifest in manifests {
            self.cluster.create(manifest).await?;
        }
        Ok(())
    }

    /// Block until every workload in `manifests` is ready, giving up after the readiness timeout.
    async fn wait_until_ready(&self, manifests: &[Manifest]) -> Result<()> {
        let timeout = self.settings.readiness_timeout;
        let deadline = Instant::now() + timeout;
        for manifest in manifests.iter().filter(|m| m.is_workload()) {
            while !self.cluster.ready(manifest).await? {
                ensure!(
                    Instant::now() < deadline,
                    error::NotReadySnafu {
                        kind: manifest.kind(),
                        name: manifest.name(),
                        namespace: manifest.namespace(),
                        timeout,
                    }
                );
                tokio::time::sleep(READINESS_POLL_INTERVAL).await;
            }
            debug!("{} is ready", manifest);
        }
        Ok(())
    }
}

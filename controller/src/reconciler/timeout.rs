use super::Reconciler;
use crate::cluster::{belongs_to, namespace_phase, ClusterClient};
use crate::credentials::FederatedCredentialStore;
use crate::error::Result;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Namespace;
use log::{info, trace, warn};
use std::time::Duration;
use testbed_model::{CrdExt, Phase, Test};

const ACTIVE: &str = "Active";

impl<C, S> Reconciler<C, S>
where
    C: ClusterClient,
    S: FederatedCredentialStore,
{
    /// Fail a running test whose namespace has outlived the maximum test duration, or whose
    /// namespace has disappeared or been replaced. The next pass tears it down.
    pub(super) async fn check_timeout(&self, test: &Test) -> Result<()> {
        let name = test.object_name();
        let fail = match self.cluster.get_namespace(test.namespace_name()).await? {
            None => {
                warn!(
                    "The namespace of running test '{}' no longer exists, failing the test",
                    name
                );
                true
            }
            Some(namespace) if !belongs_to(&namespace, name) => {
                warn!(
                    "The namespace of running test '{}' was replaced by one the controller did not create, failing the test",
                    name
                );
                true
            }
            Some(namespace) => {
                let expired = is_expired(&namespace, Utc::now(), self.settings.max_test_duration);
                if expired {
                    warn!(
                        "Test '{}' has run for longer than {:?}, failing the test",
                        name, self.settings.max_test_duration
                    );
                } else {
                    trace!("test '{}' is within its time limit", name);
                }
                expired
            }
        };
        if fail && !self.cluster.transition(test, Phase::Failed).await? {
            info!(
                "Test '{}' changed before it could be failed, leaving it to the next pass",
                name
            );
        }
        Ok(())
    }
}

/// Whether an `Active` namespace was created more than `max` before `now`.
fn is_expired(namespace: &Namespace, now: DateTime<Utc>, max: Duration) -> bool {
    if namespace_phase(namespace) != Some(ACTIVE) {
        return false;
    }
    namespace
        .metadata
        .creation_timestamp
        .as_ref()
        .and_then(|created| (now - created.0).to_std().ok())
        .map(|age| age > max)
        .unwrap_or(false)
}

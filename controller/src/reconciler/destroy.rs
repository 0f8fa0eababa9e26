use super::Reconciler;
use crate::cluster::{belongs_to, ClusterClient};
use crate::credentials::FederatedCredentialStore;
use crate::error::Result;
use log::{info, warn};
use testbed_model::{CrdExt, Test};

impl<C, S> Reconciler<C, S>
where
    C: ClusterClient,
    S: FederatedCredentialStore,
{
    /// Delete the test's namespace, revoke its credentials and mark it complete. Each step
    /// tolerates having been done already, so a destroy that failed part way can be repeated.
    ///
    /// A namespace with the test's name that the controller did not create for it is left alone,
    /// and so are the credentials named after it.
    pub(super) async fn destroy(&self, test: &Test) -> Result<()> {
        let name = test.object_name();
        let namespace = test.namespace_name();
        match self.cluster.get_namespace(namespace).await? {
            Some(existing) if !belongs_to(&existing, name) => warn!(
                "Namespace '{}' was not created for test '{}', leaving it in place",
                namespace, name
            ),
            _ => {
                self.cluster.delete_namespace(namespace).await?;
                self.credentials.revoke(namespace).await?;
            }
        }
        self.cluster.set_complete(name).await?;
        info!("Test '{}' finished as {} and was torn down", name, test.phase());
        Ok(())
    }
}

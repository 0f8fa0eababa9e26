//! Federated identity credentials let the workloads of a test namespace authenticate as Azure
//! managed identities. A credential exists for every configured identity while the namespace
//! exists, and is named after both so that granting is idempotent.

mod azure;

pub(crate) use azure::AzureCredentialStore;

use crate::error::Result;
use crate::settings::CredentialSettings;
use log::{debug, error, info};
use std::collections::HashSet;

/// The audience AKS workload identity tokens are exchanged for.
pub(crate) const AUDIENCE: &str = "api://AzureADTokenExchange";

/// A trust relationship between a Kubernetes service account and a managed identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FederatedCredential {
    pub(crate) name: String,
    pub(crate) issuer: String,
    pub(crate) subject: String,
    pub(crate) audiences: Vec<String>,
}

/// Where federated credentials are registered, by identity.
#[async_trait::async_trait]
pub(crate) trait FederatedCredentialStore: Send + Sync {
    /// Create the credential, or replace it if one with the same name exists.
    async fn upsert(&self, identity: &str, credential: &FederatedCredential) -> Result<()>;

    /// Delete the credential. A credential that does not exist counts as deleted.
    async fn delete(&self, identity: &str, name: &str) -> Result<()>;

    /// The names of all credentials registered on `identity`.
    async fn list(&self, identity: &str) -> Result<Vec<String>>;
}

/// Grants and revokes the credentials of test namespaces and sweeps up ones that were left behind.
pub(crate) struct CredentialManager<S: FederatedCredentialStore> {
    store: S,
    settings: CredentialSettings,
}

impl<S: FederatedCredentialStore> CredentialManager<S> {
    pub(crate) fn new(store: S, settings: CredentialSettings) -> Self {
        Self { store, settings }
    }

    /// `<namespace>-<identity>`
    pub(crate) fn credential_name(namespace: &str, identity: &str) -> String {
        format!("{}-{}", namespace, identity)
    }

    fn credential(&self, namespace: &str, identity: &str) -> FederatedCredential {
        FederatedCredential {
            name: Self::credential_name(namespace, identity),
            issuer: self.settings.issuer_url.clone(),
            subject: format!("system:serviceaccount:{}:{}", namespace, identity),
            audiences: vec![AUDIENCE.to_string()],
        }
    }

    /// Register a credential for every identity. Safe to repeat.
    pub(crate) async fn grant(&self, namespace: &str) -> Result<()> {
        for identity in &self.settings.identities {
            info!(
                "Granting federated credential '{}'",
                Self::credential_name(namespace, identity)
            );
            self.store
                .upsert(identity, &self.credential(namespace, identity))
                .await?;
        }
        Ok(())
    }

    /// Remove the namespace's credential from every identity. Safe to repeat.
    pub(crate) async fn revoke(&self, namespace: &str) -> Result<()> {
        for identity in &self.settings.identities {
            let name = Self::credential_name(namespace, identity);
            info!("Revoking federated credential '{}'", name);
            self.store.delete(identity, &name).await?;
        }
        Ok(())
    }

    /// Every `(identity, credential name)` registered on the configured identities.
    pub(crate) async fn registered(&self) -> Result<Vec<(String, String)>> {
        let mut registered = Vec::new();
        for identity in &self.settings.identities {
            for name in self.store.list(identity).await? {
                registered.push((identity.clone(), name));
            }
        }
        Ok(registered)
    }

    /// Delete each of `registered` that does not belong to a live namespace and is not protected
    /// by an ignored prefix. `registered` must have been listed before `live_namespaces`, otherwise
    /// a credential granted in between could belong to a namespace missing from the live set. A
    /// credential that cannot be deleted is logged and left for the next sweep. Returns how many
    /// were deleted.
    pub(crate) async fn sweep_orphans(
        &self,
        registered: Vec<(String, String)>,
        live_namespaces: &HashSet<String>,
    ) -> usize {
        let mut deleted = 0;
        for (identity, name) in registered {
            let live = live_namespaces
                .iter()
                .any(|namespace| Self::credential_name(namespace, &identity) == name);
            if live || self.is_ignored(&name) {
                debug!("Keeping federated credential '{}'", name);
                continue;
            }
            info!("Removing orphaned federated credential '{}'", name);
            match self.store.delete(&identity, &name).await {
                Ok(()) => deleted += 1,
                Err(e) => error!("Unable to remove federated credential '{}': {}", name, e),
            }
        }
        deleted
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.settings
            .ignored_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::MockStore;

    fn settings(identities: &[&str]) -> CredentialSettings {
        CredentialSettings {
            identities: identities.iter().map(|s| s.to_string()).collect(),
            ignored_prefixes: vec!["staging-".to_string()],
            resource_group: "uksouth-ait".to_string(),
            subscription_id: "0000".to_string(),
            issuer_url: "https://oidc.example.com/".to_string(),
        }
    }

    #[tokio::test]
    async fn grant_registers_every_identity() {
        let manager = CredentialManager::new(MockStore::default(), settings(&["hermes", "pytest"]));
        manager.grant("quick-red-fox").await.unwrap();
        let hermes = manager.store.get("hermes", "quick-red-fox-hermes").unwrap();
        assert_eq!(hermes.subject, "system:serviceaccount:quick-red-fox:hermes");
        assert_eq!(hermes.issuer, "https://oidc.example.com/");
        assert_eq!(hermes.audiences, vec![AUDIENCE.to_string()]);
        assert!(manager.store.get("pytest", "quick-red-fox-pytest").is_some());
    }

    #[tokio::test]
    async fn grant_and_revoke_are_idempotent() {
        let manager = CredentialManager::new(MockStore::default(), settings(&["hermes"]));
        manager.grant("quick-red-fox").await.unwrap();
        manager.grant("quick-red-fox").await.unwrap();
        assert_eq!(manager.store.count("hermes"), 1);
        manager.revoke("quick-red-fox").await.unwrap();
        manager.revoke("quick-red-fox").await.unwrap();
        assert_eq!(manager.store.count("hermes"), 0);
    }

    #[tokio::test]
    async fn no_identities_is_a_no_op() {
        let manager = CredentialManager::new(MockStore::default(), CredentialSettings::default());
        manager.grant("quick-red-fox").await.unwrap();
        manager.revoke("quick-red-fox").await.unwrap();
        let registered = manager.registered().await.unwrap();
        assert!(registered.is_empty());
        assert_eq!(manager.sweep_orphans(registered, &HashSet::new()).await, 0);
        assert_eq!(manager.store.calls(), 0);
    }

    #[tokio::test]
    async fn sweep_keeps_live_and_ignored() {
        let manager = CredentialManager::new(MockStore::default(), settings(&["hermes", "pytest"]));
        for namespace in ["alive", "dead", "staging-shared"] {
            manager.grant(namespace).await.unwrap();
        }
        let registered = manager.registered().await.unwrap();
        assert_eq!(registered.len(), 6);
        let live = HashSet::from(["alive".to_string()]);
        assert_eq!(manager.sweep_orphans(registered, &live).await, 2);
        assert!(manager.store.get("hermes", "alive-hermes").is_some());
        assert!(manager.store.get("pytest", "alive-pytest").is_some());
        assert!(manager.store.get("hermes", "dead-hermes").is_none());
        assert!(manager.store.get("hermes", "staging-shared-hermes").is_some());
    }
}

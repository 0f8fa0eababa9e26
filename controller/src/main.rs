/*!

This [controller] runs in a Kubernetes cluster and turns every Testbed [`Test`] submitted to it into
a disposable namespace holding the test's infrastructure, applications and test suite. When the
test reaches a terminal phase the namespace is deleted again.

[controller]: https://kubernetes.io/docs/concepts/architecture/controller/
[`Test`]: testbed_model::Test

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

use crate::builder::{client_ids_from_secret, Builder};
use crate::cluster::{ClusterClient, KubeCluster};
use crate::credentials::{AzureCredentialStore, CredentialManager};
use crate::error::Result;
use crate::reconciler::Reconciler;
use crate::settings::{AzureSettings, Settings};
use env_logger::Builder as LogBuilder;
use futures::join;
use kube::Client;
use log::{error, info, warn, LevelFilter};
use snafu::ResultExt;
use std::collections::BTreeMap;

mod builder;
mod cluster;
mod constants;
mod credentials;
mod error;
#[cfg(test)]
mod mock;
mod reconciler;
mod settings;

#[tokio::main]
async fn main() {
    init_logger();
    info!("Starting");

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let settings = Settings::from_env()?;

    let azure = if settings.credentials.identities.is_empty() {
        info!("No identities are configured, federated credentials are disabled");
        AzureSettings::default()
    } else {
        AzureSettings::from_env()?
    };

    // Initialize the k8s client from in-cluster variables or KUBECONFIG.
    let client = Client::try_default()
        .await
        .context(error::KubeApiSnafu {
            action: "create client",
            namespace: &settings.namespace,
        })?;
    let cluster = KubeCluster::new(client, &settings.namespace);

    let client_ids = client_ids(&cluster, &settings).await;
    let builder = Builder::new(&settings.registry, &settings.image_pull_secret, client_ids);
    let store = AzureCredentialStore::new(azure, &settings.credentials);
    let credentials = CredentialManager::new(store, settings.credentials.clone());

    let reconciler = Reconciler::new(cluster, credentials, builder, settings);
    join!(reconciler.run(), reconciler.run_sweeper());
    Ok(())
}

/// Client IDs of the workload identities. Without them service accounts are created without the
/// client ID annotation, which is fine on clusters that do not use workload identity.
async fn client_ids(cluster: &KubeCluster, settings: &Settings) -> BTreeMap<String, String> {
    match cluster
        .get_secret(&settings.source_namespace, &settings.identity_secret)
        .await
    {
        Ok(Some(secret)) => {
            let client_ids = client_ids_from_secret(&secret);
            info!("Found client IDs for {} identities", client_ids.len());
            client_ids
        }
        Ok(None) => {
            warn!(
                "Secret '{}' does not exist in namespace '{}', workload identity client IDs will not be set",
                settings.identity_secret, settings.source_namespace
            );
            BTreeMap::new()
        }
        Err(e) => {
            warn!(
                "Unable to read secret '{}', workload identity client IDs will not be set: {}",
                settings.identity_secret, e
            );
            BTreeMap::new()
        }
    }
}

/// The log level used when the `RUST_LOG` environment variable does not exist.
const DEFAULT_LEVEL_FILTER: LevelFilter = LevelFilter::Info;

/// Extract the value of `RUST_LOG` if it exists, otherwise log this crate at
/// `DEFAULT_LEVEL_FILTER`.
fn init_logger() {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            LogBuilder::from_default_env().init();
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            LogBuilder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), DEFAULT_LEVEL_FILTER)
                .filter(Some("testbed_model"), DEFAULT_LEVEL_FILTER)
                .init();
        }
    }
}

use crate::error::{self, Result};
use kube::api::{Api, Patch, PatchParams, PostParams, ResourceExt};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use snafu::ResultExt;
use std::fmt::Debug;
use std::path::PathBuf;
use std::time::Duration;
use testbed_model::clients::{CrdClient, TestClient};

const MAX_RETRIES: i32 = 3;
const BACKOFF: Duration = Duration::from_millis(500);

/// A client for the cluster in `kubeconfig`, or the one inferred from the environment.
pub(crate) async fn k8s_client(kubeconfig: &Option<PathBuf>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).context(error::KubeconfigSnafu { path })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context(error::KubeconfigSnafu { path })?
        }
        None => Config::infer().await.context(error::ConfigInferSnafu)?,
    };
    Client::try_from(config).context(error::ClientSnafu)
}

/// A client for the `Test` objects in `namespace`.
pub(crate) fn tests(k8s_client: Client, namespace: &str) -> TestClient {
    TestClient::new_from_k8s_client_in(k8s_client, namespace)
}

/// Create or update an object in `api` with `data`'s name.
pub(crate) async fn create_or_update<T>(api: &Api<T>, data: T, what: &str) -> Result<()>
where
    T: Clone + DeserializeOwned + Debug + kube::Resource + Serialize,
{
    let mut attempt = 1;
    loop {
        match create_or_update_internal(api, data.clone(), what).await {
            Ok(()) => {
                info!("Installed {}", what);
                return Ok(());
            }
            Err(e) if attempt < MAX_RETRIES => {
                debug!("Attempt {} to install {} failed: {}", attempt, what, e);
                attempt += 1;
                tokio::time::sleep(BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn create_or_update_internal<T>(api: &Api<T>, data: T, what: &str) -> Result<()>
where
    T: Clone + DeserializeOwned + Debug + kube::Resource + Serialize,
{
    // If the data already exists, update it with the new one using a `Patch`. If not create a new one.
    match api.get_opt(&data.name_any()).await.context(error::CreationSnafu { what })? {
        Some(existing) => {
            api.patch(
                &existing.name_any(),
                &PatchParams::default(),
                &Patch::Merge(data),
            )
            .await
        }
        None => api.create(&PostParams::default(), &data).await,
    }
    .context(error::CreationSnafu { what })?;

    Ok(())
}

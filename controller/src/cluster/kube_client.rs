use super::{ClusterClient, Manifest};
use crate::constants::{CREATE_ATTEMPTS, CREATE_BACKOFF};
use crate::error::{self, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use log::{debug, info, trace, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use snafu::ResultExt;
use std::fmt::Debug;
use testbed_model::clients::{CrdClient, HttpStatusCode, TestClient};
use testbed_model::{CrdExt, Phase, Test};

/// The [`ClusterClient`] backed by a real Kubernetes API server.
#[derive(Clone)]
pub(crate) struct KubeCluster {
    client: Client,
    tests: TestClient,
}

impl KubeCluster {
    /// `namespace` is where `Test` objects live.
    pub(crate) fn new(client: Client, namespace: &str) -> Self {
        Self {
            tests: TestClient::new_from_k8s_client_in(client.clone(), namespace),
            client,
        }
    }

    async fn try_create(&self, manifest: &Manifest) -> std::result::Result<(), kube::Error> {
        let ns = manifest.namespace();
        let client = self.client.clone();
        match manifest {
            Manifest::Namespace(o) => create_object(Api::all(client), o).await,
            Manifest::Role(o) => create_object(Api::namespaced(client, ns), o).await,
            Manifest::RoleBinding(o) => create_object(Api::namespaced(client, ns), o).await,
            Manifest::ServiceAccount(o) => create_object(Api::namespaced(client, ns), o).await,
            Manifest::Secret(o) => create_object(Api::namespaced(client, ns), o).await,
            Manifest::ConfigMap(o) => create_object(Api::namespaced(client, ns), o).await,
            Manifest::Service(o) => create_object(Api::namespaced(client, ns), o).await,
            Manifest::Deployment(o) => create_object(Api::namespaced(client, ns), o).await,
            Manifest::Job(o) => create_object(Api::namespaced(client, ns), o).await,
        }
    }
}

/// Create `object`, treating `409 AlreadyExists` as success.
async fn create_object<K>(api: Api<K>, object: &K) -> std::result::Result<(), kube::Error>
where
    K: kube::Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    match api.create(&PostParams::default(), object).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_conflict() => {
            debug!("{} already exists", object.meta().name.as_deref().unwrap_or(""));
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeCluster {
    async fn list_tests(&self) -> Result<Vec<Test>> {
        self.tests.get_all().await.context(error::TestListSnafu)
    }

    async fn transition(&self, test: &Test, phase: Phase) -> Result<bool> {
        let moved = self
            .tests
            .transition(test, phase)
            .await
            .context(error::TestStatusSnafu {
                test_name: test.object_name(),
                action: format!("set phase to {}", phase),
            })?;
        Ok(moved.is_some())
    }

    async fn set_complete(&self, test_name: &str) -> Result<()> {
        self.tests
            .set_complete(test_name)
            .await
            .context(error::TestStatusSnafu {
                test_name,
                action: "mark complete",
            })?;
        Ok(())
    }

    async fn create(&self, manifest: &Manifest) -> Result<()> {
        let mut delay = CREATE_BACKOFF;
        let mut attempt = 1;
        loop {
            trace!("creating {} (attempt {})", manifest, attempt);
            match self.try_create(manifest).await {
                Ok(()) => {
                    info!("Created {}", manifest);
                    return Ok(());
                }
                Err(e) if attempt < CREATE_ATTEMPTS => {
                    warn!(
                        "Unable to create {} (attempt {} of {}), retrying in {:?}: {}",
                        manifest, attempt, CREATE_ATTEMPTS, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).context(error::KubeApiSnafu {
                        action: format!("create {}", manifest),
                        namespace: manifest.namespace(),
                    })
                }
            }
        }
    }

    async fn ready(&self, manifest: &Manifest) -> Result<bool> {
        let ns = manifest.namespace();
        let action = || error::KubeApiSnafu {
            action: format!("check readiness of {}", manifest),
            namespace: ns,
        };
        match manifest {
            Manifest::Deployment(_) => {
                let deployment = Api::<Deployment>::namespaced(self.client.clone(), ns)
                    .get_opt(manifest.name())
                    .await
                    .context(action())?;
                Ok(deployment.map(|d| deployment_ready(&d)).unwrap_or(false))
            }
            Manifest::Job(_) => {
                let job = Api::<Job>::namespaced(self.client.clone(), ns)
                    .get_opt(manifest.name())
                    .await
                    .context(action())?;
                Ok(job.map(|j| job_succeeded(&j)).unwrap_or(false))
            }
            _ => Ok(true),
        }
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        Api::<Namespace>::all(self.client.clone())
            .get_opt(name)
            .await
            .context(error::KubeApiSnafu {
                action: "get namespace",
                namespace: name,
            })
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let result = Api::<Namespace>::all(self.client.clone())
            .delete(name, &DeleteParams::default())
            .await;
        match result {
            Ok(_) => {
                info!("Deleting namespace '{}'", name);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Namespace '{}' is already gone", name);
                Ok(())
            }
            Err(e) => Err(e).context(error::KubeApiSnafu {
                action: "delete namespace",
                namespace: name,
            }),
        }
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Api::<Secret>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .context(error::KubeApiSnafu {
                action: format!("get secret '{}'", name),
                namespace,
            })
    }
}

fn deployment_ready(deployment: &Deployment) -> bool {
    let wanted = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0);
    ready >= wanted
}

fn job_succeeded(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|status| status.succeeded)
        .unwrap_or(0)
        > 0
}

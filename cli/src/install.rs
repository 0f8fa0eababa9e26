use crate::error::{self, Result};
use crate::k8s::create_or_update;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ObjectMeta};
use kube::{Client, CustomResourceExt};
use log::{debug, warn};
use maplit::btreemap;
use serde::Serialize;
use snafu::{OptionExt, ResultExt};
use std::collections::{BTreeMap, HashMap};
use structopt::StructOpt;
use testbed_model::constants::NAMESPACE;
use testbed_model::system::{
    controller_cluster_role, controller_cluster_role_binding, controller_deployment,
    controller_service_account, testbed_namespace,
};
use testbed_model::Test;

const NAMESPACE_SETTING: &str = "TESTBED_NAMESPACE";

const CONTROLLER_SECRET: &str = "testbed-controller-pull-cred";

const DEFAULT_CONTROLLER_IMAGE: &str = "binkcore.azurecr.io/testbed-controller:latest";

/// The install subcommand is responsible for putting all of the necessary components for testbed
/// in a k8s cluster.
#[derive(Debug, StructOpt)]
pub(crate) struct Install {
    /// Controller image pull username
    #[structopt(
        long = "controller-pull-username",
        short = "u",
        requires("pull-password")
    )]
    pull_username: Option<String>,

    /// Controller image pull password
    #[structopt(
        long = "controller-pull-password",
        short = "p",
        requires("pull-username")
    )]
    pull_password: Option<String>,

    /// Controller image uri
    #[structopt(long = "controller-uri", default_value = DEFAULT_CONTROLLER_IMAGE)]
    controller_uri: String,

    /// The client ID of the managed identity the controller authenticates to Azure as.
    #[structopt(long = "client-id")]
    client_id: Option<String>,

    /// Controller settings as `TESTBED_*=value` or `AZURE_*=value`. May be repeated.
    #[structopt(long = "env", short = "e", parse(try_from_str = parse_env_var))]
    env: Vec<(String, String)>,
}

impl Install {
    pub(crate) async fn run(&self, client: Client, test_namespace: &str) -> Result<()> {
        create_namespace(&client, NAMESPACE).await?;
        if test_namespace != NAMESPACE {
            create_namespace(&client, test_namespace).await?;
        }
        create_crd(&client).await?;
        create_roles(&client).await?;

        let service_accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), NAMESPACE);
        create_or_update(
            &service_accounts,
            controller_service_account(self.client_id.clone()),
            "controller service account",
        )
        .await?;

        let mut controller_image_pull_secret = None;
        if let (Some(username), Some(password)) =
            (self.pull_username.as_ref(), self.pull_password.as_ref())
        {
            let registry = self
                .controller_uri
                .split('/')
                .next()
                .filter(|registry| !registry.is_empty())
                .context(error::MissingRegistrySnafu {
                    uri: &self.controller_uri,
                })?;
            create_secret(&client, username, password, registry).await?;
            controller_image_pull_secret = Some(CONTROLLER_SECRET.to_string());
        }

        let env = self.controller_env(test_namespace);
        debug!("Controller environment: {:?}", env.keys().collect::<Vec<_>>());
        let deployments: Api<Deployment> = Api::namespaced(client, NAMESPACE);
        create_or_update(
            &deployments,
            controller_deployment(
                self.controller_uri.clone(),
                controller_image_pull_secret,
                env,
            ),
            "controller deployment",
        )
        .await?;

        println!("Testbed is installed in namespace '{}'", NAMESPACE);
        Ok(())
    }
}

impl Install {
    /// The `--env` settings, with `TESTBED_NAMESPACE` pointing the controller at `test_namespace`.
    fn controller_env(&self, test_namespace: &str) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = self.env.iter().cloned().collect();
        let previous = env.insert(NAMESPACE_SETTING.to_string(), test_namespace.to_string());
        if let Some(previous) = previous.filter(|previous| previous != test_namespace) {
            warn!(
                "Ignoring {}={}, the controller watches namespace '{}' given by --namespace",
                NAMESPACE_SETTING, previous, test_namespace
            );
        }
        env
    }
}

/// `KEY=VALUE`, split at the first `=`.
fn parse_env_var(input: &str) -> Result<(String, String)> {
    let (key, value) = input
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .context(error::EnvVarSnafu { input })?;
    Ok((key.to_string(), value.to_string()))
}

async fn create_namespace(client: &Client, name: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    create_or_update(&api, testbed_namespace(name), "namespace").await?;

    // Give the object enough time to settle.
    let mut sleep_count = 0;
    while api.get(name).await.is_err() && sleep_count < 20 {
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        sleep_count += 1;
    }
    api.get(name)
        .await
        .context(error::CreationSnafu { what: "namespace" })?;
    Ok(())
}

async fn create_crd(client: &Client) -> Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    create_or_update(&crds, Test::crd(), "Test CRD").await
}

async fn create_roles(client: &Client) -> Result<()> {
    let roles: Api<ClusterRole> = Api::all(client.clone());
    create_or_update(&roles, controller_cluster_role(), "controller cluster role").await?;

    let bindings: Api<ClusterRoleBinding> = Api::all(client.clone());
    create_or_update(
        &bindings,
        controller_cluster_role_binding(),
        "controller cluster role binding",
    )
    .await
}

async fn create_secret(
    client: &Client,
    username: &str,
    password: &str,
    registry_url: &str,
) -> Result<()> {
    let config =
        serde_json::to_string_pretty(&DockerConfigJson::new(username, password, registry_url))
            .context(error::JsonSerializeSnafu)?;
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(CONTROLLER_SECRET.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        string_data: Some(btreemap! { ".dockerconfigjson".to_string() => config }),
        type_: Some("kubernetes.io/dockerconfigjson".to_string()),
        ..Default::default()
    };
    let secrets: Api<Secret> = Api::namespaced(client.clone(), NAMESPACE);
    create_or_update(&secrets, secret, "controller pull secret").await
}

#[derive(Serialize)]
struct DockerConfigJson {
    auths: HashMap<String, DockerConfigAuth>,
}

#[derive(Serialize)]
struct DockerConfigAuth {
    auth: String,
}

impl DockerConfigJson {
    fn new(username: &str, password: &str, registry: &str) -> DockerConfigJson {
        let mut auths = HashMap::new();
        let auth = base64::encode(format!("{}:{}", username, password));
        auths.insert(registry.to_string(), DockerConfigAuth { auth });
        DockerConfigJson { auths }
    }
}

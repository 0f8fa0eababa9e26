//! Turns the components named in a `Test` into the ordered objects that make up its environment.
//!
//! Nothing is built for a layer unless every component in it is known, so an unknown name fails
//! the deploy before any of that layer's objects reach the cluster.

mod catalog;
mod objects;

use crate::cluster::Manifest;
use crate::constants::{UPLOADER_IMAGE, WAIT_FOR_ROLE};
use crate::error::{self, Result};
use catalog::{Application, Infrastructure, TestSuite, DATABASES, POSTGRES_INIT_SCRIPT};
use k8s_openapi::api::core::v1::{EnvVar, Secret, VolumeMount};
use log::warn;
use maplit::btreemap;
use objects::Pod;
use snafu::OptionExt;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use testbed_model::Component;

/// The three layers of a test environment, created in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Layer {
    Infrastructure,
    Application,
    Test,
}

impl Display for Layer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::Infrastructure => Display::fmt("infrastructure", f),
            Layer::Application => Display::fmt("application", f),
            Layer::Test => Display::fmt("test suite", f),
        }
    }
}

/// Builds environment objects. Holds the cluster wide values every object shares.
#[derive(Debug, Clone, Default)]
pub(crate) struct Builder {
    registry: String,
    image_pull_secret: String,
    /// Azure managed identity client IDs by component name.
    client_ids: BTreeMap<String, String>,
}

impl Builder {
    pub(crate) fn new<S1, S2>(
        registry: S1,
        image_pull_secret: S2,
        client_ids: BTreeMap<String, String>,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            registry: registry.into(),
            image_pull_secret: image_pull_secret.into(),
            client_ids,
        }
    }

    /// The namespace itself and the role its init containers use to wait on each other.
    pub(crate) fn namespace(&self, namespace: &str) -> Vec<Manifest> {
        vec![
            Manifest::Namespace(objects::namespace(namespace)),
            Manifest::Role(objects::wait_for_role(namespace)),
        ]
    }

    /// A shared secret copied from another namespace into `namespace`.
    pub(crate) fn shared_secret(&self, source: &Secret, namespace: &str) -> Manifest {
        Manifest::Secret(objects::copied_secret(source, namespace))
    }

    /// Every object of a layer, in creation order. Fails without building anything if a
    /// component is not in the layer's catalog.
    pub(crate) fn build_layer(
        &self,
        layer: Layer,
        components: &[Component],
        namespace: &str,
    ) -> Result<Vec<Manifest>> {
        match layer {
            Layer::Infrastructure => {
                let resolved = resolve(layer, components, Infrastructure::from_name)?;
                Ok(resolved
                    .into_iter()
                    .flat_map(|(infra, image)| self.infrastructure(infra, image, namespace))
                    .collect())
            }
            Layer::Application => {
                let resolved = resolve(layer, components, Application::from_name)?;
                Ok(resolved
                    .into_iter()
                    .flat_map(|(app, image)| self.application(app, image, namespace))
                    .collect())
            }
            Layer::Test => {
                let resolved = resolve(layer, components, TestSuite::from_name)?;
                Ok(resolved
                    .into_iter()
                    .flat_map(|(suite, image)| self.test_suite(suite, image, namespace))
                    .collect())
            }
        }
    }

    fn image(&self, relative: &str) -> String {
        format!("{}/{}", self.registry, relative)
    }

    fn client_id(&self, name: &str) -> Option<&str> {
        self.client_ids.get(name).map(String::as_str)
    }

    fn infrastructure(
        &self,
        infra: Infrastructure,
        image: Option<String>,
        namespace: &str,
    ) -> Vec<Manifest> {
        let name = infra.name();
        let profile = infra.profile();
        let image = image.unwrap_or_else(|| profile.image.to_string());
        let mut env = objects::env(namespace, profile.env);
        let mut container = objects::with_readiness_command(
            objects::with_port(
                objects::container(name, &image, &[], vec![]),
                profile.port,
            ),
            profile.readiness_command,
        );
        let mut manifests = vec![
            Manifest::ServiceAccount(objects::service_account(namespace, name, None)),
            Manifest::Service(objects::service(
                namespace,
                name,
                name,
                profile.port,
                profile.port,
            )),
        ];
        let mut volumes = vec![];
        if infra == Infrastructure::Postgres {
            let config_map = format!("{}-init-script", name);
            manifests.push(Manifest::ConfigMap(objects::config_map(
                namespace,
                &config_map,
                btreemap! {
                    "create-multiple-postgresql-databases.sh".to_string() => POSTGRES_INIT_SCRIPT.to_string()
                },
            )));
            env.push(EnvVar {
                name: "POSTGRES_MULTIPLE_DATABASES".to_string(),
                value: Some(DATABASES.join(",")),
                ..Default::default()
            });
            container.volume_mounts = Some(vec![VolumeMount {
                name: "init-script".to_string(),
                mount_path: "/docker-entrypoint-initdb.d".to_string(),
                ..Default::default()
            }]);
            volumes.push(objects::init_script_volume(&config_map));
        }
        if !env.is_empty() {
            container.env = Some(env);
        }
        manifests.push(Manifest::Deployment(objects::deployment(
            namespace,
            name,
            name,
            Pod {
                service_account: name.to_string(),
                init_containers: vec![],
                containers: vec![container],
                volumes,
                image_pull_secret: None,
                workload_identity: false,
            },
        )));
        manifests
    }

    fn application(&self, app: Application, image: Option<String>, namespace: &str) -> Vec<Manifest> {
        let name = app.name();
        let profile = app.profile();
        let image = image.unwrap_or_else(|| self.image(profile.image));
        let client_id = self.client_id(name);
        let env = objects::env(namespace, profile.env);
        let wait_for_pods = profile
            .waits_for
            .iter()
            .map(|dependency| objects::wait_for_pod(dependency))
            .collect::<Vec<_>>();

        let mut manifests = vec![
            Manifest::ServiceAccount(objects::service_account(namespace, name, client_id)),
            Manifest::RoleBinding(objects::role_binding(
                namespace,
                &format!("{}-{}", name, WAIT_FOR_ROLE),
                WAIT_FOR_ROLE,
                name,
            )),
        ];
        if let Some(port) = profile.port {
            manifests.push(Manifest::Service(objects::service(
                namespace,
                &format!("{}-api", name),
                name,
                80,
                port,
            )));
        }
        if let Some(migration) = profile.migration {
            manifests.push(Manifest::Job(objects::job(
                namespace,
                &objects::migrator_name(name),
                &objects::migrator_name(name),
                Pod {
                    service_account: name.to_string(),
                    init_containers: wait_for_pods.clone(),
                    containers: vec![objects::container(name, &image, migration, env.clone())],
                    volumes: vec![],
                    image_pull_secret: Some(self.image_pull_secret.clone()),
                    workload_identity: client_id.is_some(),
                },
            )));
        }

        let mut init_containers = wait_for_pods;
        if let Some(migrated) = profile.waits_for_migration {
            init_containers.push(objects::wait_for_migration(migrated));
        }
        let mut container = objects::container("app", &image, profile.args, env);
        if let Some(port) = profile.port {
            container = objects::with_port(container, port);
        }
        manifests.push(Manifest::Deployment(objects::deployment(
            namespace,
            name,
            name,
            Pod {
                service_account: name.to_string(),
                init_containers,
                containers: vec![container],
                volumes: vec![],
                image_pull_secret: Some(self.image_pull_secret.clone()),
                workload_identity: client_id.is_some(),
            },
        )));
        manifests
    }

    fn test_suite(&self, suite: TestSuite, image: Option<String>, namespace: &str) -> Vec<Manifest> {
        let name = suite.name();
        let profile = suite.profile();
        let image = image.unwrap_or_else(|| self.image(profile.image));
        let client_id = self.client_id(name);
        let runner = objects::with_results(objects::container(
            name,
            &image,
            profile.args,
            objects::env(namespace, profile.env),
        ));
        let uploader = objects::uploader_container(&self.image(UPLOADER_IMAGE), profile.report);

        vec![
            Manifest::ServiceAccount(objects::service_account(namespace, name, client_id)),
            Manifest::Role(objects::uploader_role(namespace)),
            Manifest::RoleBinding(objects::role_binding(
                namespace,
                "uploader",
                "uploader",
                name,
            )),
            Manifest::RoleBinding(objects::role_binding(
                namespace,
                &format!("{}-{}", name, WAIT_FOR_ROLE),
                WAIT_FOR_ROLE,
                name,
            )),
            Manifest::Job(objects::job(
                namespace,
                name,
                name,
                Pod {
                    service_account: name.to_string(),
                    init_containers: profile
                        .waits_for
                        .iter()
                        .map(|dependency| objects::wait_for_pod(dependency))
                        .collect(),
                    containers: vec![runner, uploader],
                    volumes: vec![objects::results_volume()],
                    image_pull_secret: Some(self.image_pull_secret.clone()),
                    workload_identity: client_id.is_some(),
                },
            )),
        ]
    }
}

/// Look up every component of a layer before anything is built from it.
fn resolve<T, F>(layer: Layer, components: &[Component], lookup: F) -> Result<Vec<(T, Option<String>)>>
where
    F: Fn(&str) -> Option<T>,
{
    components
        .iter()
        .map(|component| -> Result<(T, Option<String>)> {
            let found = lookup(&component.name).context(error::UnknownComponentSnafu {
                layer,
                name: &component.name,
            })?;
            Ok((found, component.image.clone()))
        })
        .collect()
}

/// Reads the `<identity>_client_id` keys of the identity secret.
pub(crate) fn client_ids_from_secret(secret: &Secret) -> BTreeMap<String, String> {
    let mut client_ids = BTreeMap::new();
    for (key, value) in secret.data.iter().flatten() {
        let identity = match key.strip_suffix("_client_id") {
            Some(identity) => identity,
            None => continue,
        };
        match String::from_utf8(value.0.clone()) {
            Ok(client_id) => {
                client_ids.insert(identity.to_string(), client_id.trim().to_string());
            }
            Err(_) => warn!("Ignoring non UTF-8 client ID for identity '{}'", identity),
        }
    }
    client_ids
}

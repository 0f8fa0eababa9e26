use super::catalog::{Env, EnvSource};
use crate::constants::{WAIT_FOR_IMAGE, WAIT_FOR_ROLE};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, ExecAction, LocalObjectReference, Namespace, PodSpec, PodTemplateSpec, Probe,
    Secret, SecretKeySelector, Service, ServiceAccount, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use maplit::btreemap;
use serde_json::json;
use std::collections::BTreeMap;
use testbed_model::constants::{
    APP_MANAGED_BY, APP_NAME, APP_PART_OF, LABEL_TEST_NAME, TESTBED, WORKLOAD_IDENTITY_CLIENT_ID,
    WORKLOAD_IDENTITY_USE,
};

/// The label init containers select pods by.
pub(crate) const APP: &str = "app";

const RESULTS_VOLUME: &str = "results";
const RESULTS_PATH: &str = "/mnt/results";
const SPOT: &str = "kubernetes.azure.com/scalesetpriority";

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(btreemap! {
            APP_MANAGED_BY.to_string() => TESTBED.to_string(),
            LABEL_TEST_NAME.to_string() => namespace.to_string(),
        }),
        ..Default::default()
    }
}

/// Labels shared by a component's workloads and used by its service and wait-for selectors.
pub(crate) fn app_labels(app: &str) -> BTreeMap<String, String> {
    btreemap! {
        APP.to_string() => app.to_string(),
        APP_NAME.to_string() => app.to_string(),
        APP_PART_OF.to_string() => TESTBED.to_string(),
    }
}

/// A test namespace. Pods are scheduled onto spot nodes through the namespace's default
/// tolerations and node selector rather than on each pod.
pub(crate) fn namespace(name: &str) -> Namespace {
    let tolerations = json!([
        {"key": "bink.com/workload", "operator": "Equal", "value": "txm", "effect": "NoSchedule"},
        {"key": SPOT, "operator": "Equal", "value": "spot", "effect": "NoSchedule"},
    ]);
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(btreemap! {
                APP_MANAGED_BY.to_string() => TESTBED.to_string(),
                LABEL_TEST_NAME.to_string() => name.to_string(),
            }),
            annotations: Some(btreemap! {
                "linkerd.io/inject".to_string() => "enabled".to_string(),
                "scheduler.alpha.kubernetes.io/defaultTolerations".to_string() => tolerations.to_string(),
                "scheduler.alpha.kubernetes.io/node-selector".to_string() => format!("{}=spot", SPOT),
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Lets `k8s-wait-for` init containers watch pods, services, deployments and jobs.
pub(crate) fn wait_for_role(namespace: &str) -> Role {
    let read = strings(&["get", "list", "watch"]);
    Role {
        metadata: meta(namespace, WAIT_FOR_ROLE),
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(strings(&[""])),
                resources: Some(strings(&["pods", "services"])),
                verbs: read.clone(),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(strings(&["apps"])),
                resources: Some(strings(&["deployments"])),
                verbs: read.clone(),
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(strings(&["batch"])),
                resources: Some(strings(&["jobs"])),
                verbs: read,
                ..Default::default()
            },
        ]),
    }
}

/// Lets the results uploader read the test pod and its logs.
pub(crate) fn uploader_role(namespace: &str) -> Role {
    Role {
        metadata: meta(namespace, "uploader"),
        rules: Some(vec![PolicyRule {
            api_groups: Some(strings(&[""])),
            resources: Some(strings(&["pods", "pods/log"])),
            verbs: strings(&["get", "list", "watch"]),
            ..Default::default()
        }]),
    }
}

pub(crate) fn role_binding(
    namespace: &str,
    name: &str,
    role: &str,
    service_account: &str,
) -> RoleBinding {
    RoleBinding {
        metadata: meta(namespace, name),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// A service account, federated with an Azure managed identity when `client_id` is known.
pub(crate) fn service_account(
    namespace: &str,
    name: &str,
    client_id: Option<&str>,
) -> ServiceAccount {
    let mut metadata = meta(namespace, name);
    metadata.annotations = client_id.map(|client_id| {
        btreemap! { WORKLOAD_IDENTITY_CLIENT_ID.to_string() => client_id.to_string() }
    });
    ServiceAccount {
        metadata,
        ..Default::default()
    }
}

pub(crate) fn service(namespace: &str, name: &str, app: &str, port: i32, target: i32) -> Service {
    Service {
        metadata: meta(namespace, name),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(target)),
                ..Default::default()
            }]),
            selector: Some(btreemap! { APP.to_string() => app.to_string() }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Blocks until the pods labelled `app=<app>` are ready.
pub(crate) fn wait_for_pod(app: &str) -> Container {
    Container {
        name: format!("wait-for-{}", app),
        image: Some(WAIT_FOR_IMAGE.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec!["pod".to_string(), format!("-l{}={}", APP, app)]),
        ..Default::default()
    }
}

/// Blocks until `<app>-migrator` has completed.
pub(crate) fn wait_for_migration(app: &str) -> Container {
    Container {
        name: "wait-for-migration".to_string(),
        image: Some(WAIT_FOR_IMAGE.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec!["job-wr".to_string(), migrator_name(app)]),
        ..Default::default()
    }
}

pub(crate) fn migrator_name(app: &str) -> String {
    format!("{}-migrator", app)
}

pub(crate) fn env(namespace: &str, env: Env) -> Vec<EnvVar> {
    env.iter()
        .map(|(name, source)| match source {
            EnvSource::Value(value) => EnvVar {
                name: name.to_string(),
                value: Some(value.to_string()),
                ..Default::default()
            },
            EnvSource::Secret { secret, key } => EnvVar {
                name: name.to_string(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: Some(secret.to_string()),
                        key: key.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            EnvSource::Namespaced(suffix) => EnvVar {
                name: name.to_string(),
                value: Some(format!("{}-{}", namespace, suffix)),
                ..Default::default()
            },
        })
        .collect()
}

pub(crate) fn container(name: &str, image: &str, args: &[&str], env: Vec<EnvVar>) -> Container {
    Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        args: if args.is_empty() {
            None
        } else {
            Some(strings(args))
        },
        env: if env.is_empty() { None } else { Some(env) },
        ..Default::default()
    }
}

pub(crate) fn with_port(mut container: Container, port: i32) -> Container {
    container.ports = Some(vec![ContainerPort {
        container_port: port,
        ..Default::default()
    }]);
    container
}

pub(crate) fn with_readiness_command(mut container: Container, command: &[&str]) -> Container {
    container.readiness_probe = Some(Probe {
        exec: Some(ExecAction {
            command: Some(strings(command)),
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(10),
        ..Default::default()
    });
    container
}

/// The sidecar that uploads `report` from the results volume to blob storage once the suite has
/// written it.
pub(crate) fn uploader_container(image: &str, report: &str) -> Container {
    let mut uploader = container(
        "uploader",
        image,
        &["scutter"],
        env(
            "",
            &[(
                "STORAGE_ACCOUNT_DSN",
                EnvSource::Secret {
                    secret: "azure-storage",
                    key: "blob_connection_string_primary",
                },
            )],
        ),
    );
    if let Some(env) = uploader.env.as_mut() {
        env.push(EnvVar {
            name: "FILE_PATH".to_string(),
            value: Some(format!("{}/{}", RESULTS_PATH, report)),
            ..Default::default()
        });
    }
    uploader.image_pull_policy = Some("Always".to_string());
    with_results(uploader)
}

/// Mounts the shared results volume.
pub(crate) fn with_results(mut container: Container) -> Container {
    container.volume_mounts = Some(vec![VolumeMount {
        name: RESULTS_VOLUME.to_string(),
        mount_path: RESULTS_PATH.to_string(),
        ..Default::default()
    }]);
    container
}

pub(crate) fn results_volume() -> Volume {
    Volume {
        name: RESULTS_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some("Memory".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn init_script_volume(config_map: &str) -> Volume {
    Volume {
        name: "init-script".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(config_map.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn config_map(namespace: &str, name: &str, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: meta(namespace, name),
        data: Some(data),
        ..Default::default()
    }
}

/// The pod template shared by deployments and jobs.
pub(crate) struct Pod {
    pub(crate) service_account: String,
    pub(crate) init_containers: Vec<Container>,
    pub(crate) containers: Vec<Container>,
    pub(crate) volumes: Vec<Volume>,
    pub(crate) image_pull_secret: Option<String>,
    /// Pods using a federated identity must opt in to token injection.
    pub(crate) workload_identity: bool,
}

impl Pod {
    fn template(self, app: &str, restart_policy: Option<&str>) -> PodTemplateSpec {
        let mut labels = app_labels(app);
        if self.workload_identity {
            labels.insert(WORKLOAD_IDENTITY_USE.to_string(), "true".to_string());
        }
        let default_container = self.containers.first().map(|c| c.name.clone());
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels),
                annotations: default_container.map(|name| {
                    btreemap! { "kubectl.kubernetes.io/default-container".to_string() => name }
                }),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                service_account_name: Some(self.service_account),
                init_containers: if self.init_containers.is_empty() {
                    None
                } else {
                    Some(self.init_containers)
                },
                containers: self.containers,
                volumes: if self.volumes.is_empty() {
                    None
                } else {
                    Some(self.volumes)
                },
                image_pull_secrets: self
                    .image_pull_secret
                    .map(|name| vec![LocalObjectReference { name: Some(name) }]),
                restart_policy: restart_policy.map(String::from),
                ..Default::default()
            }),
        }
    }
}

pub(crate) fn deployment(namespace: &str, name: &str, app: &str, pod: Pod) -> Deployment {
    let mut metadata = meta(namespace, name);
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(app_labels(app));
    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(btreemap! { APP.to_string() => app.to_string() }),
                ..Default::default()
            },
            template: pod.template(app, None),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A run-once job. Failed pods are not retried.
pub(crate) fn job(namespace: &str, name: &str, app: &str, pod: Pod) -> Job {
    Job {
        metadata: meta(namespace, name),
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: pod.template(app, Some("Never")),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A copy of `source` that can be created in `namespace`.
pub(crate) fn copied_secret(source: &Secret, namespace: &str) -> Secret {
    Secret {
        metadata: meta(namespace, source.metadata.name.as_deref().unwrap_or("")),
        data: source.data.clone(),
        string_data: source.string_data.clone(),
        type_: source.type_.clone(),
        immutable: source.immutable,
    }
}

use crate::constants::{
    APP_COMPONENT, APP_MANAGED_BY, APP_PART_OF, CONTROLLER, LABEL_COMPONENT, NAMESPACE, TESTBED,
    WORKLOAD_IDENTITY_CLIENT_ID, WORKLOAD_IDENTITY_USE,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, LocalObjectReference, NodeAffinity, NodeSelector,
    NodeSelectorRequirement, NodeSelectorTerm, PodSpec, PodTemplateSpec, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use maplit::btreemap;
use std::collections::BTreeMap;

const TESTBED_CONTROLLER_SERVICE_ACCOUNT: &str = "testbed-controller-service-account";
const TESTBED_CONTROLLER_CLUSTER_ROLE: &str = "testbed-controller-role";

fn verbs(verbs: &[&str]) -> Vec<String> {
    verbs.iter().map(|s| s.to_string()).collect()
}

fn rule(api_group: &str, resources: &[&str], allowed: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources.iter().map(|s| s.to_string()).collect()),
        verbs: verbs(allowed),
        ..Default::default()
    }
}

/// Defines the testbed-controller service account. When `client_id` is given the service account
/// is federated with that Azure managed identity so the controller can manage credentials.
pub fn controller_service_account(client_id: Option<String>) -> ServiceAccount {
    let mut annotations = btreemap! {
        "kubernetes.io/service-account.name".to_string() => TESTBED_CONTROLLER_SERVICE_ACCOUNT.to_string()
    };
    if let Some(client_id) = client_id {
        annotations.insert(WORKLOAD_IDENTITY_CLIENT_ID.to_string(), client_id);
    }
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(TESTBED_CONTROLLER_SERVICE_ACCOUNT.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Defines the testbed-controller cluster role. The controller creates whole namespaces worth of
/// objects, including roles and bindings, so it needs every permission it hands out.
pub fn controller_cluster_role() -> ClusterRole {
    let all = [
        "create", "delete", "get", "list", "patch", "update", "watch",
    ];
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(TESTBED_CONTROLLER_CLUSTER_ROLE.to_string()),
            ..Default::default()
        },
        rules: Some(vec![
            rule(TESTBED, &["tests", "tests/status"], &all),
            rule(
                "",
                &[
                    "namespaces",
                    "secrets",
                    "configmaps",
                    "services",
                    "serviceaccounts",
                    "pods",
                ],
                &all,
            ),
            rule("apps", &["deployments"], &all),
            rule("batch", &["jobs"], &all),
            rule(
                "rbac.authorization.k8s.io",
                &["roles", "rolebindings"],
                &["create", "delete", "get", "list", "bind", "escalate"],
            ),
        ]),
        ..Default::default()
    }
}

/// Defines the testbed-controller cluster role binding
pub fn controller_cluster_role_binding() -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some("testbed-controller-role-binding".to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: TESTBED_CONTROLLER_CLUSTER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: TESTBED_CONTROLLER_SERVICE_ACCOUNT.to_string(),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        }]),
    }
}

/// Defines the testbed-controller deployment. `env` is passed to the controller container as-is,
/// which is how `TESTBED_*` settings reach the controller.
pub fn controller_deployment(
    controller_image: String,
    image_pull_secret: Option<String>,
    env: BTreeMap<String, String>,
) -> Deployment {
    let image_pull_secrets =
        image_pull_secret.map(|secret| vec![LocalObjectReference { name: Some(secret) }]);
    let env = env
        .into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    Deployment {
        metadata: ObjectMeta {
            labels: Some(
                btreemap! {
                    APP_COMPONENT => CONTROLLER,
                    APP_MANAGED_BY => TESTBED,
                    APP_PART_OF => TESTBED,
                    LABEL_COMPONENT => CONTROLLER,
                }
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ),
            name: Some("testbed-controller".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(
                    btreemap! { LABEL_COMPONENT.to_string() => CONTROLLER.to_string()},
                ),
                ..Default::default()
            },
            // A second controller would race the first on the same tests.
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(btreemap! {
                        LABEL_COMPONENT.to_string() => CONTROLLER.to_string(),
                        WORKLOAD_IDENTITY_USE.to_string() => "true".to_string(),
                    }),
                    namespace: Some(NAMESPACE.to_string()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(Affinity {
                        node_affinity: Some(NodeAffinity {
                            required_during_scheduling_ignored_during_execution: Some(
                                NodeSelector {
                                    node_selector_terms: vec![NodeSelectorTerm {
                                        match_expressions: Some(vec![NodeSelectorRequirement {
                                            key: "kubernetes.io/os".to_string(),
                                            operator: "In".to_string(),
                                            values: Some(vec!["linux".to_string()]),
                                        }]),
                                        ..Default::default()
                                    }],
                                },
                            ),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    containers: vec![Container {
                        image: Some(controller_image),
                        name: CONTROLLER.to_string(),
                        env: Some(env),
                        ..Default::default()
                    }],
                    image_pull_secrets,
                    service_account_name: Some(TESTBED_CONTROLLER_SERVICE_ACCOUNT.to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

//! The controller's view of the Kubernetes cluster. The reconciler only talks to the cluster through
//! [`ClusterClient`] so that it can be exercised against an in-memory cluster in tests.

mod kube_client;

pub(crate) use kube_client::KubeCluster;

use crate::error::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::core::ObjectMeta;
use testbed_model::constants::{APP_MANAGED_BY, LABEL_TEST_NAME, TESTBED};
use testbed_model::{Phase, Test};

/// An object the controller creates inside a test namespace (or the namespace itself). The
/// reconciler treats these as opaque apart from their kind and name, and asks whether workloads
/// are ready.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Manifest {
    Namespace(Namespace),
    Role(Role),
    RoleBinding(RoleBinding),
    ServiceAccount(ServiceAccount),
    Secret(Secret),
    ConfigMap(ConfigMap),
    Service(Service),
    Deployment(Deployment),
    Job(Job),
}

impl Manifest {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Manifest::Namespace(_) => "Namespace",
            Manifest::Role(_) => "Role",
            Manifest::RoleBinding(_) => "RoleBinding",
            Manifest::ServiceAccount(_) => "ServiceAccount",
            Manifest::Secret(_) => "Secret",
            Manifest::ConfigMap(_) => "ConfigMap",
            Manifest::Service(_) => "Service",
            Manifest::Deployment(_) => "Deployment",
            Manifest::Job(_) => "Job",
        }
    }

    fn meta(&self) -> &ObjectMeta {
        match self {
            Manifest::Namespace(o) => &o.metadata,
            Manifest::Role(o) => &o.metadata,
            Manifest::RoleBinding(o) => &o.metadata,
            Manifest::ServiceAccount(o) => &o.metadata,
            Manifest::Secret(o) => &o.metadata,
            Manifest::ConfigMap(o) => &o.metadata,
            Manifest::Service(o) => &o.metadata,
            Manifest::Deployment(o) => &o.metadata,
            Manifest::Job(o) => &o.metadata,
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or("")
    }

    /// The namespace the object lives in. For a `Namespace` this is its own name.
    pub(crate) fn namespace(&self) -> &str {
        match self {
            Manifest::Namespace(_) => self.name(),
            _ => self.meta().namespace.as_deref().unwrap_or(""),
        }
    }

    /// Deployments and jobs are the only objects whose readiness means anything.
    pub(crate) fn is_workload(&self) -> bool {
        matches!(self, Manifest::Deployment(_) | Manifest::Job(_))
    }
}

impl std::fmt::Display for Manifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}/{}'", self.kind(), self.namespace(), self.name())
    }
}

/// The namespace phase reported by Kubernetes while a namespace is being deleted.
pub(crate) const TERMINATING: &str = "Terminating";

/// Returns the phase of a namespace, `Active` or `Terminating`, if the API server reported one.
pub(crate) fn namespace_phase(namespace: &Namespace) -> Option<&str> {
    namespace
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
}

/// Whether `namespace` was created by the controller for the test named `test_name`. Anything
/// else that happens to share the name is never adopted or deleted.
pub(crate) fn belongs_to(namespace: &Namespace, test_name: &str) -> bool {
    let labels = match namespace.metadata.labels.as_ref() {
        Some(labels) => labels,
        None => return false,
    };
    labels.get(APP_MANAGED_BY).map(String::as_str) == Some(TESTBED)
        && labels.get(LABEL_TEST_NAME).map(String::as_str) == Some(test_name)
}

/// The cluster operations the reconciler needs.
#[async_trait::async_trait]
pub(crate) trait ClusterClient: Send + Sync {
    /// All `Test` objects in the controller's namespace.
    async fn list_tests(&self) -> Result<Vec<Test>>;

    /// Move the test to `phase` if it is unchanged since `test` was listed. Returns `false`
    /// when someone else changed the test first, in which case the next pass decides what to do.
    async fn transition(&self, test: &Test, phase: Phase) -> Result<bool>;

    /// Mark the test torn down so it is never reconciled again.
    async fn set_complete(&self, test_name: &str) -> Result<()>;

    /// Create the object. An object that already exists counts as created.
    async fn create(&self, manifest: &Manifest) -> Result<()>;

    /// Whether a workload is ready: a deployment has all replicas ready, a job has succeeded.
    /// Objects that are not workloads are always ready.
    async fn ready(&self, manifest: &Manifest) -> Result<bool>;

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    /// Delete a namespace and everything in it. A missing namespace counts as deleted.
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
}

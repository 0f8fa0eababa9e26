/// Encapsulates the K8S object definitions needed to install testbed into a cluster
mod controller;
mod namespace;

pub use controller::{
    controller_cluster_role, controller_cluster_role_binding, controller_deployment,
    controller_service_account,
};
pub use namespace::testbed_namespace;

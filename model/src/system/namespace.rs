use crate::constants::{APP_MANAGED_BY, APP_PART_OF, TESTBED};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use maplit::btreemap;

/// The namespace the controller runs in, or the one `Test` objects are submitted to if they differ.
pub fn testbed_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(btreemap! {
                APP_MANAGED_BY.to_string() => TESTBED.to_string(),
                APP_PART_OF.to_string() => TESTBED.to_string(),
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Helper macro to avoid retyping the base domain-like name of our system when creating further
/// string constants from it. When given no parameters, this returns the base domain-like name of
/// the system. When given a string literal parameter it adds `/parameter` to the end.
macro_rules! testbed {
    () => {
        "testbed.bink.io"
    };
    ($s:literal) => {
        concat!(testbed!(), "/", $s)
    };
}

// System identifiers
pub const API_VERSION: &str = testbed!("v1");
pub const NAMESPACE: &str = "testbed";
pub const TESTBED: &str = testbed!();
pub const CRD_NAME: &str = concat!("tests.", testbed!());

// Component names
pub const CONTROLLER: &str = "controller";

// Label keys
pub const LABEL_TEST_NAME: &str = testbed!("test-name");
pub const LABEL_COMPONENT: &str = testbed!("component");

// Standard tags https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
pub const APP_NAME: &str = "app.kubernetes.io/name";
pub const APP_COMPONENT: &str = "app.kubernetes.io/component";
pub const APP_PART_OF: &str = "app.kubernetes.io/part-of";
pub const APP_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

// Azure workload identity
pub const WORKLOAD_IDENTITY_CLIENT_ID: &str = "azure.workload.identity/client-id";
pub const WORKLOAD_IDENTITY_USE: &str = "azure.workload.identity/use";

/// Namespaces that belong to the cluster itself and can never be a test's namespace.
pub const RESERVED_NAMESPACES: &[&str] = &["default"];
pub const RESERVED_PREFIX: &str = "kube-";

/// Kubernetes object names are DNS-1123 labels, which limits them to 63 characters.
pub const MAX_NAME_LEN: usize = 63;

#[test]
fn testbed_constants_macro_test() {
    assert_eq!("testbed.bink.io", testbed!());
    assert_eq!("testbed.bink.io/v1", API_VERSION);
    assert_eq!("testbed.bink.io/foo", testbed!("foo"));
    assert_eq!("tests.testbed.bink.io", CRD_NAME);
}

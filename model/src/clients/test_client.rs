use super::error::Result;
use crate::clients::{CrdClient, HttpStatusCode};
use crate::{CrdExt, Phase, Test, TestSpec};
use kube::core::ObjectMeta;
use kube::Api;
use serde_json::json;
use std::collections::BTreeMap;

/// An API Client for Testbed Test CRD objects.
///
/// # Example
///
/// ```
///# use testbed_model::clients::{CrdClient, TestClient};
///# async fn no_run() {
/// let test_client = TestClient::new().await.unwrap();
/// let test = test_client.get("my-test").await.unwrap();
///# }
/// ```
#[derive(Clone)]
pub struct TestClient {
    api: Api<Test>,
}

impl TestClient {
    /// Set the Testbed [`Test`]'s `status.phase` field.
    pub async fn set_phase<S>(&self, name: S, phase: Phase) -> Result<Test>
    where
        S: AsRef<str> + Send,
    {
        self.patch_status(name, json!({ "phase": phase }), None, "set phase")
            .await
    }

    /// Move `test` to `phase` provided nobody has changed it since it was read. Returns `None`
    /// when the stored object has moved on, e.g. because it was cancelled in the meantime.
    pub async fn transition(&self, test: &Test, phase: Phase) -> Result<Option<Test>> {
        let result = self
            .patch_status(
                test.object_name(),
                json!({ "phase": phase }),
                test.resource_version(),
                format!("move to {}", phase),
            )
            .await;
        match result {
            Ok(test) => Ok(Some(test)),
            Err(e) if e.is_conflict() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Mark the Testbed [`Test`] as torn down. The controller ignores it from now on.
    pub async fn set_complete<S>(&self, name: S) -> Result<Test>
    where
        S: AsRef<str> + Send,
    {
        self.patch_status(name, json!({ "complete": true }), None, "set complete")
            .await
    }

    /// The results callback. Records where the report was uploaded and moves the test to
    /// `Completed` or `Failed` depending on the test suite's exit code.
    pub async fn send_results<S1, S2>(&self, name: S1, results: S2, exit_code: i32) -> Result<Test>
    where
        S1: AsRef<str> + Send,
        S2: Into<String> + Send,
    {
        self.patch_status(
            name,
            json!({
                "results": results.into(),
                "phase": Phase::from_exit_code(exit_code),
            }),
            None,
            "send test results",
        )
        .await
    }

    /// Ask the controller to tear down the test on its next pass.
    pub async fn cancel<S>(&self, name: S) -> Result<Test>
    where
        S: AsRef<str> + Send,
    {
        self.set_phase(name, Phase::Cancelled).await
    }
}

impl CrdClient for TestClient {
    type Crd = Test;

    fn new_from_api(api: Api<Self::Crd>) -> Self {
        Self { api }
    }

    fn kind(&self) -> &'static str {
        "test"
    }

    fn api(&self) -> &Api<Self::Crd> {
        &self.api
    }
}

/// A new `Test` in `namespace`, which must be the namespace the controller watches.
pub fn create_test_crd<S1>(
    name: S1,
    namespace: &str,
    labels: Option<&BTreeMap<String, String>>,
    test_spec: TestSpec,
) -> Test
where
    S1: Into<String>,
{
    Test {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            labels: labels.cloned(),
            ..Default::default()
        },
        spec: test_spec,
        status: None,
    }
}

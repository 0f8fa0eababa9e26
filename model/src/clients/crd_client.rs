use crate::clients::error::{self, Result};
use crate::constants::NAMESPACE;
use crate::CrdExt;
use core::fmt::Debug;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::Api;
use log::trace;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use snafu::ResultExt;

/// A trait with implementations of the API calls the controller and the CLI share for a CRD
/// object.
#[async_trait::async_trait]
pub trait CrdClient: Sized {
    type Crd: kube::Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>
        + Serialize
        + DeserializeOwned
        + Debug
        + Clone
        + Send
        + Sync
        + CrdExt;

    // The following need to be implemented which allows the rest of the functions to have
    // default implementations.

    fn new_from_api(api: Api<Self::Crd>) -> Self;
    fn kind(&self) -> &'static str;
    fn api(&self) -> &Api<Self::Crd>;

    async fn new() -> Result<Self> {
        let k8s_client = kube::Client::try_default()
            .await
            .context(error::InitializationSnafu)?;
        Ok(Self::new_from_k8s_client(k8s_client))
    }

    /// Create a client for objects in the default Testbed namespace.
    fn new_from_k8s_client(k8s_client: kube::Client) -> Self {
        Self::new_from_k8s_client_in(k8s_client, NAMESPACE)
    }

    /// Create a client for objects in `namespace`.
    fn new_from_k8s_client_in(k8s_client: kube::Client, namespace: &str) -> Self {
        Self::new_from_api(Api::<Self::Crd>::namespaced(k8s_client, namespace))
    }

    async fn get<S>(&self, name: S) -> Result<Self::Crd>
    where
        S: AsRef<str> + Send,
    {
        let name: &str = name.as_ref();
        Ok(self
            .api()
            .get(name)
            .await
            .context(error::KubeApiCallSnafu {
                method: "get",
                what: self.kind(),
            })?)
    }

    async fn get_all(&self) -> Result<Vec<Self::Crd>> {
        Ok(self
            .api()
            .list(&ListParams::default())
            .await
            .context(error::KubeApiCallForSnafu {
                operation: "get all",
                name: format!("{}s", self.kind()),
            })?
            .items)
    }

    async fn create(&self, crd: Self::Crd) -> Result<Self::Crd> {
        Ok(self
            .api()
            .create(&PostParams::default(), &crd)
            .await
            .context(error::KubeApiCallSnafu {
                method: "create",
                what: self.kind(),
            })?)
    }

    /// Merge `status` into the object's `/status`. Fields that are absent from `status` are left
    /// untouched, which lets the controller and the results callback write disjoint fields.
    ///
    /// With a `resource_version` the patch only applies if the object is still at that version,
    /// otherwise the API server answers `409 Conflict`.
    async fn patch_status<S1, S2>(
        &self,
        name: S1,
        status: Value,
        resource_version: Option<&str>,
        description: S2,
    ) -> Result<Self::Crd>
    where
        S1: AsRef<str> + Send,
        S2: Into<String> + Send,
    {
        let name = name.as_ref();
        let patch = match resource_version {
            Some(version) => json!({ "metadata": { "resourceVersion": version }, "status": status }),
            None => json!({ "status": status }),
        };
        trace!("patching status of {} '{}': {}", self.kind(), name, patch);
        Ok(self
            .api()
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .context(error::KubeApiCallForSnafu {
                operation: description,
                name,
            })?)
    }
}

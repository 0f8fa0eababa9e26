use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Name lookups shared by the controller and the CLI.
pub trait CrdExt {
    fn object_meta(&self) -> &ObjectMeta;

    /// The object's name. Objects read back from the API server always have one, so a missing
    /// name reads as `""` rather than an `Option`.
    fn object_name(&self) -> &str {
        self.object_meta().name.as_deref().unwrap_or("")
    }

    /// The `resourceVersion` the object had when it was read, if it was read from the API server.
    fn resource_version(&self) -> Option<&str> {
        self.object_meta().resource_version.as_deref()
    }
}

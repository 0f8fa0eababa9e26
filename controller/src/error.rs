use crate::builder::Layer;
use snafu::Snafu;
use std::path::PathBuf;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Error {
    #[snafu(display("Unable to read the Azure federated token file '{}': {}", path.display(), source))]
    AzureTokenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Azure request to {} failed: {}", action, source))]
    AzureRequest {
        action: String,
        source: reqwest::Error,
    },

    #[snafu(display("Azure returned {} when trying to {}: {}", status, action, body))]
    AzureResponse {
        action: String,
        status: u16,
        body: String,
    },

    #[snafu(display("Unable to parse duration '{}': {}", input, reason))]
    Duration { input: String, reason: String },

    #[snafu(display("Unable to {} for namespace '{}': {}", action, namespace, source))]
    KubeApi {
        action: String,
        namespace: String,
        source: kube::Error,
    },

    #[snafu(display(
        "The {} '{}' in namespace '{}' was not ready after {:?}",
        kind,
        name,
        namespace,
        timeout
    ))]
    NotReady {
        kind: String,
        name: String,
        namespace: String,
        timeout: std::time::Duration,
    },

    #[snafu(display("Unable to read {} settings from the environment: {}", prefix, source))]
    Settings { prefix: String, source: envy::Error },

    #[snafu(display("'{}' must be set when identities are configured", name))]
    SettingMissing { name: String },

    #[snafu(display("Unable to {} for test '{}': {}", action, test_name, source))]
    TestStatus {
        test_name: String,
        action: String,
        source: testbed_model::clients::Error,
    },

    #[snafu(display("Unable to list tests: {}", source))]
    TestList {
        source: testbed_model::clients::Error,
    },

    #[snafu(display("Unknown {} component '{}'", layer, name))]
    UnknownComponent { layer: Layer, name: String },
}

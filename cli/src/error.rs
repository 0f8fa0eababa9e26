use snafu::Snafu;
use std::path::PathBuf;

/// The crate-wide result type.
pub(crate) type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Error {
    #[snafu(display("Unable to create client: {}", source))]
    Client { source: kube::Error },

    #[snafu(display("Unable to cancel test '{}': {}", name, source))]
    Cancel {
        name: String,
        source: testbed_model::clients::Error,
    },

    #[snafu(display("Unable to infer the Kubernetes configuration: {}", source))]
    ConfigInfer {
        source: kube::config::InferConfigError,
    },

    #[snafu(display("Error creating {}: {}", what, source))]
    Creation { what: String, source: kube::Error },

    #[snafu(display("Error creating test: {}", source))]
    CreateTest {
        source: testbed_model::clients::Error,
    },

    #[snafu(display("Unable to parse environment variable '{}', expected KEY=VALUE", input))]
    EnvVar { input: String },

    #[snafu(display("The following tests failed: {}", tests.join(", ")))]
    FailedTest { tests: Vec<String> },

    #[snafu(display("Unable to open file '{}': {}", path.display(), source))]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to get tests: {}", source))]
    GetTest {
        source: testbed_model::clients::Error,
    },

    #[snafu(display("Invalid test: {}", source))]
    InvalidTest { source: testbed_model::Error },

    #[snafu(display("Could not serialize object: {}", source))]
    JsonSerialize { source: serde_json::Error },

    #[snafu(display("Unable to read kubeconfig '{}': {}", path.display(), source))]
    Kubeconfig {
        path: PathBuf,
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("A test needs either a file or --name and --test"))]
    MissingTestDefinition,

    #[snafu(display("Could not extract registry url from '{}'", uri))]
    MissingRegistry { uri: String },

    #[snafu(display("Unable to send results for test '{}': {}", name, source))]
    SendResults {
        name: String,
        source: testbed_model::clients::Error,
    },

    #[snafu(display("Unable to create Test from '{}': {}", path.display(), source))]
    TestFileParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

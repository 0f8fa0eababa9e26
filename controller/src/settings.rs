use crate::constants::parse_duration;
use crate::error::{self, Result};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};
use std::path::PathBuf;
use std::time::Duration;

const PREFIX: &str = "TESTBED_";
const AZURE_PREFIX: &str = "AZURE_";

/// Controller settings, read from `TESTBED_`-prefixed environment variables.
///
/// # Example
///
/// ```text
/// TESTBED_POLL_INTERVAL=5s
/// TESTBED_IDENTITIES=hermes,angelia,pytest
/// TESTBED_IGNORED_PREFIXES=staging-,perf-
/// ```
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    /// The namespace `Test` objects are submitted to.
    pub(crate) namespace: String,
    pub(crate) poll_interval: Duration,
    /// A `Running` test whose namespace is older than this is failed.
    pub(crate) max_test_duration: Duration,
    pub(crate) sweep_interval: Duration,
    /// Where shared secrets and the identity secret are copied or read from.
    pub(crate) source_namespace: String,
    /// Secrets copied from the source namespace into every test namespace.
    pub(crate) shared_secrets: Vec<String>,
    pub(crate) image_pull_secret: String,
    pub(crate) identity_secret: String,
    pub(crate) registry: String,
    /// Wait for each layer's workloads to become ready before creating the next layer.
    ///
    /// Tests are reconciled one at a time, so while a deploy waits, every other test waits too,
    /// including ones due to be torn down or failed for running too long. A deploy can wait up to
    /// twice the readiness timeout, once for infrastructure and once for applications.
    pub(crate) readiness_gate: bool,
    /// How long one layer may take to become ready.
    pub(crate) readiness_timeout: Duration,
    pub(crate) credentials: CredentialSettings,
}

/// What the federated credential manager needs. `identities` may be empty, in which case the
/// remaining fields are not required.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CredentialSettings {
    pub(crate) identities: Vec<String>,
    /// Registrations starting with any of these are never swept.
    pub(crate) ignored_prefixes: Vec<String>,
    pub(crate) resource_group: String,
    pub(crate) subscription_id: String,
    pub(crate) issuer_url: String,
}

/// The environment injected by the AKS workload identity webhook. Left at its default when no
/// identities are configured, since the credential store is never called then.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub(crate) struct AzureSettings {
    pub(crate) tenant_id: String,
    pub(crate) client_id: String,
    pub(crate) federated_token_file: PathBuf,
    #[serde(default = "authority_host")]
    pub(crate) authority_host: String,
}

#[derive(Debug, Deserialize)]
struct Inner {
    #[serde(default = "namespace")]
    namespace: String,
    #[serde(default = "poll_interval")]
    poll_interval: String,
    #[serde(default = "max_test_duration")]
    max_test_duration: String,
    #[serde(default = "sweep_interval")]
    sweep_interval: String,
    #[serde(default = "source_namespace")]
    source_namespace: String,
    #[serde(default = "shared_secrets")]
    shared_secrets: String,
    #[serde(default = "image_pull_secret")]
    image_pull_secret: String,
    #[serde(default = "identity_secret")]
    identity_secret: String,
    #[serde(default = "registry")]
    registry: String,
    #[serde(default)]
    readiness_gate: bool,
    #[serde(default = "readiness_timeout")]
    readiness_timeout: String,
    #[serde(default)]
    identities: String,
    #[serde(default)]
    ignored_prefixes: String,
    resource_group: Option<String>,
    subscription_id: Option<String>,
    issuer_url: Option<String>,
}

impl Settings {
    pub(crate) fn from_env() -> Result<Self> {
        let inner = envy::prefixed(PREFIX)
            .from_env::<Inner>()
            .context(error::SettingsSnafu { prefix: PREFIX })?;
        Self::from_inner(inner)
    }

    fn from_inner(inner: Inner) -> Result<Self> {
        let identities = list(&inner.identities);
        let credentials = if identities.is_empty() {
            CredentialSettings {
                ignored_prefixes: list(&inner.ignored_prefixes),
                ..CredentialSettings::default()
            }
        } else {
            CredentialSettings {
                identities,
                ignored_prefixes: list(&inner.ignored_prefixes),
                resource_group: required(inner.resource_group, "RESOURCE_GROUP")?,
                subscription_id: required(inner.subscription_id, "SUBSCRIPTION_ID")?,
                issuer_url: required(inner.issuer_url, "ISSUER_URL")?,
            }
        };
        Ok(Self {
            namespace: inner.namespace,
            poll_interval: parse_duration(&inner.poll_interval)?,
            max_test_duration: parse_duration(&inner.max_test_duration)?,
            sweep_interval: parse_duration(&inner.sweep_interval)?,
            source_namespace: inner.source_namespace,
            shared_secrets: list(&inner.shared_secrets),
            image_pull_secret: inner.image_pull_secret,
            identity_secret: inner.identity_secret,
            registry: inner.registry,
            readiness_gate: inner.readiness_gate,
            readiness_timeout: parse_duration(&inner.readiness_timeout)?,
            credentials,
        })
    }
}

impl AzureSettings {
    pub(crate) fn from_env() -> Result<Self> {
        envy::prefixed(AZURE_PREFIX)
            .from_env::<AzureSettings>()
            .context(error::SettingsSnafu {
                prefix: AZURE_PREFIX,
            })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .context(error::SettingMissingSnafu {
            name: format!("{}{}", PREFIX, name),
        })
}

/// Splits a comma separated setting, ignoring whitespace and empty entries.
fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// The following provide defaults for serde.

fn namespace() -> String {
    testbed_model::constants::NAMESPACE.to_string()
}

fn poll_interval() -> String {
    String::from("10s")
}

fn max_test_duration() -> String {
    String::from("2h")
}

fn sweep_interval() -> String {
    String::from("30m")
}

fn source_namespace() -> String {
    String::from("default")
}

fn shared_secrets() -> String {
    String::from("azure-storage,azure-keyvault")
}

fn identity_secret() -> String {
    String::from("azure-identities")
}

/// The pull secret is named after the registry it authenticates to.
fn image_pull_secret() -> String {
    registry()
}

fn registry() -> String {
    String::from("binkcore.azurecr.io")
}

fn readiness_timeout() -> String {
    String::from("10m")
}

fn authority_host() -> String {
    String::from("https://login.microsoftonline.com/")
}

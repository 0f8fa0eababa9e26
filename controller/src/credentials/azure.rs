use super::{FederatedCredential, FederatedCredentialStore};
use crate::error::{self, Result};
use crate::settings::{AzureSettings, CredentialSettings};
use log::{debug, trace};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use snafu::{ensure, ResultExt};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const ARM_ENDPOINT: &str = "https://management.azure.com";
const ARM_SCOPE: &str = "https://management.azure.com/.default";
const API_VERSION: &str = "2023-01-31";
const JWT_BEARER: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// Federated identity credentials on user assigned managed identities, managed through the Azure
/// Resource Manager REST API. The controller authenticates with its own workload identity.
pub(crate) struct AzureCredentialStore {
    http: Client,
    azure: AzureSettings,
    subscription_id: String,
    resource_group: String,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialList {
    #[serde(default)]
    value: Vec<NamedResource>,
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct NamedResource {
    name: String,
}

impl AzureCredentialStore {
    pub(crate) fn new(azure: AzureSettings, settings: &CredentialSettings) -> Self {
        Self {
            http: Client::new(),
            azure,
            subscription_id: settings.subscription_id.clone(),
            resource_group: settings.resource_group.clone(),
            token: Mutex::new(None),
        }
    }

    /// The managed identity `<resource_group>-<identity>`'s credential collection.
    fn credentials_url(&self, identity: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ManagedIdentity/userAssignedIdentities/{}-{}/federatedIdentityCredentials",
            ARM_ENDPOINT, self.subscription_id, self.resource_group, self.resource_group, identity
        )
    }

    fn credential_url(&self, identity: &str, name: &str) -> String {
        format!(
            "{}/{}?api-version={}",
            self.credentials_url(identity),
            name,
            API_VERSION
        )
    }

    /// Exchange the projected service account token for an ARM access token, reusing the last one
    /// until it is close to expiry.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }
        trace!("requesting a new ARM access token");
        let assertion = tokio::fs::read_to_string(&self.azure.federated_token_file)
            .await
            .context(error::AzureTokenFileSnafu {
                path: self.azure.federated_token_file.clone(),
            })?;
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.azure.authority_host.trim_end_matches('/'),
            self.azure.tenant_id
        );
        let action = "get an access token";
        let response = self
            .http
            .post(url)
            .form(&[
                ("client_id", self.azure.client_id.as_str()),
                ("scope", ARM_SCOPE),
                ("grant_type", "client_credentials"),
                ("client_assertion_type", JWT_BEARER),
                ("client_assertion", assertion.trim()),
            ])
            .send()
            .await
            .context(error::AzureRequestSnafu { action })?;
        let token: TokenResponse = check(response, action)
            .await?
            .json()
            .await
            .context(error::AzureRequestSnafu { action })?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response> {
        let token = self.access_token().await?;
        request
            .bearer_auth(token)
            .send()
            .await
            .context(error::AzureRequestSnafu { action })
    }
}

/// Turns an unsuccessful response into an error carrying its body.
async fn check(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error::AzureResponseSnafu {
        action,
        status: status.as_u16(),
        body,
    }
    .fail()
}

#[async_trait::async_trait]
impl FederatedCredentialStore for AzureCredentialStore {
    async fn upsert(&self, identity: &str, credential: &FederatedCredential) -> Result<()> {
        let action = format!("create federated credential '{}'", credential.name);
        let body = json!({
            "properties": {
                "issuer": credential.issuer,
                "subject": credential.subject,
                "audiences": credential.audiences,
            }
        });
        let request = self
            .http
            .put(self.credential_url(identity, &credential.name))
            .json(&body);
        check(self.send(request, &action).await?, &action).await?;
        Ok(())
    }

    async fn delete(&self, identity: &str, name: &str) -> Result<()> {
        let action = format!("delete federated credential '{}'", name);
        let request = self.http.delete(self.credential_url(identity, name));
        let response = self.send(request, &action).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Federated credential '{}' is already gone", name);
            return Ok(());
        }
        check(response, &action).await?;
        Ok(())
    }

    async fn list(&self, identity: &str) -> Result<Vec<String>> {
        let action = format!("list federated credentials of '{}'", identity);
        let mut names = Vec::new();
        let mut next = Some(format!(
            "{}?api-version={}",
            self.credentials_url(identity),
            API_VERSION
        ));
        while let Some(url) = next {
            let response = check(self.send(self.http.get(&url), &action).await?, &action).await?;
            let page: CredentialList = response
                .json()
                .await
                .context(error::AzureRequestSnafu { action: &action })?;
            names.extend(page.value.into_iter().map(|credential| credential.name));
            ensure!(
                page.next_link.as_deref() != Some(url.as_str()),
                error::AzureResponseSnafu {
                    action: &action,
                    status: 200u16,
                    body: "the next page link points at the current page",
                }
            );
            next = page.next_link;
        }
        Ok(names)
    }
}

use crate::{fallback::first_success, Error};
use k8s_openapi::api::core::v1::Secret;

/// Secret key holding the monitoring tenant URL.
pub const DT_TENANT: &str = "DT_TENANT";
/// Secret key holding the monitoring API token.
pub const DT_API_TOKEN: &str = "DT_API_TOKEN";
/// Shared secret name, consulted after the project-scoped one.
pub const SHARED_SECRET: &str = "dynatrace-credentials";
/// Global default secret name, consulted last.
pub const DEFAULT_SECRET: &str = "dynatrace";

/// Environment variable (and secret key) of the orchestrator API URL.
pub const KEPTN_API_URL: &str = "KEPTN_API_URL";
/// Environment variable (and secret key) of the orchestrator API token.
pub const KEPTN_API_TOKEN: &str = "KEPTN_API_TOKEN";
/// Environment variable (and secret key) of the orchestrator's bridge UI URL.
pub const KEPTN_BRIDGE_URL: &str = "KEPTN_BRIDGE_URL";
/// Secret consulted when the orchestrator settings are not in the environment.
pub const KEPTN_CREDENTIALS_SECRET: &str = "keptn-credentials";

lazy_static::lazy_static! {
    // Public token format: a fixed prefix, a 24 character public portion,
    // and a 64 character secret portion.
    static ref API_TOKEN_RE: regex::Regex =
        regex::Regex::new(r"^dt0c01\.[A-Z0-9]{24}\.[A-Z0-9]{64}$").unwrap();
}

/// Credentials of a monitoring tenant. Validated on construction.
#[derive(Clone, PartialEq)]
pub struct DynatraceCredentials {
    tenant: url::Url,
    api_token: String,
}

impl DynatraceCredentials {
    pub fn new(tenant: &str, api_token: &str) -> Result<Self, Error> {
        let tenant = parse_base_url(tenant, &["https"])?;

        if !API_TOKEN_RE.is_match(api_token) {
            return Err(Error::InvalidCredentials(
                "API token does not have the expected format".to_string(),
            ));
        }

        Ok(Self {
            tenant,
            api_token: api_token.to_string(),
        })
    }

    /// Base URL of the tenant, always ending in '/'.
    pub fn tenant(&self) -> &url::Url {
        &self.tenant
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }
}

impl std::fmt::Debug for DynatraceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynatraceCredentials")
            .field("tenant", &self.tenant.as_str())
            .field("api_token", &"<redacted>")
            .finish()
    }
}

/// Credentials of the orchestrator's own API.
#[derive(Clone, PartialEq)]
pub struct KeptnCredentials {
    api_url: url::Url,
    api_token: String,
}

impl KeptnCredentials {
    pub fn new(api_url: &str, api_token: &str) -> Result<Self, Error> {
        let api_url = parse_base_url(api_url, &["https", "http"])?;

        if api_token.trim().is_empty() {
            return Err(Error::InvalidCredentials("API token is empty".to_string()));
        }

        Ok(Self {
            api_url,
            api_token: api_token.to_string(),
        })
    }

    /// Base URL of the API, always ending in '/'.
    pub fn api_url(&self) -> &url::Url {
        &self.api_url
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }
}

impl std::fmt::Debug for KeptnCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeptnCredentials")
            .field("api_url", &self.api_url.as_str())
            .field("api_token", &"<redacted>")
            .finish()
    }
}

// Parse `raw` as an absolute URL with one of the `schemes` and a host.
// A missing trailing slash is added so that relative API paths join beneath it.
fn parse_base_url(raw: &str, schemes: &[&str]) -> Result<url::Url, Error> {
    let mut parsed = url::Url::parse(raw.trim())
        .map_err(|err| Error::InvalidCredentials(format!("URL {raw:?} is invalid: {err}")))?;

    if !schemes.contains(&parsed.scheme()) {
        return Err(Error::InvalidCredentials(format!(
            "URL {raw:?} must use scheme {}",
            schemes.join(" or ")
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::InvalidCredentials(format!("URL {raw:?} has no host")));
    }
    if !parsed.path().ends_with('/') {
        let path = format!("{}/", parsed.path());
        parsed.set_path(&path);
    }
    Ok(parsed)
}

/// SecretReader reads a single `key` of a named `secret`.
pub trait SecretReader: Send + Sync {
    fn read(
        &self,
        secret: &str,
        key: &str,
    ) -> impl std::future::Future<Output = Result<String, Error>> + Send;
}

/// EnvReader reads `key` from the process environment. The secret name is ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvReader;

impl SecretReader for EnvReader {
    async fn read(&self, _secret: &str, key: &str) -> Result<String, Error> {
        match std::env::var(key) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(Error::not_found(format!("environment variable {key}"))),
        }
    }
}

/// KubernetesSecretReader reads secrets of a single namespace.
#[derive(Clone)]
pub struct KubernetesSecretReader {
    api: kube::Api<Secret>,
}

impl KubernetesSecretReader {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: kube::Api::namespaced(client, namespace),
        }
    }

    /// Build a reader using the in-cluster or local kube configuration.
    pub async fn try_default(namespace: &str) -> Result<Self, Error> {
        let client = kube::Client::try_default()
            .await
            .map_err(|err| Error::transport("failed to build kubernetes client", err))?;

        Ok(Self::new(client, namespace))
    }
}

impl SecretReader for KubernetesSecretReader {
    async fn read(&self, secret: &str, key: &str) -> Result<String, Error> {
        let found = self
            .api
            .get_opt(secret)
            .await
            .map_err(|err| Error::transport(format!("failed to fetch secret {secret}"), err))?
            .ok_or_else(|| Error::not_found(format!("secret {secret}")))?;

        let value = found
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .ok_or_else(|| Error::not_found(format!("key {key} of secret {secret}")))?;

        String::from_utf8(value.0.clone())
            .map_err(|err| Error::malformed(format!("key {key} of secret {secret}"), err))
    }
}

/// Resolves monitoring credentials through an ordered chain of secret names.
pub struct CredentialResolver<'r, R> {
    reader: &'r R,
    fallbacks: Vec<String>,
}

impl<'r, R: SecretReader> CredentialResolver<'r, R> {
    /// Build a resolver which consults `fallbacks`, in order, after any hint.
    pub fn new(reader: &'r R, fallbacks: Vec<String>) -> Self {
        Self { reader, fallbacks }
    }

    /// Build a resolver using the standard chain for `project`.
    pub fn for_project(reader: &'r R, project: &str) -> Self {
        Self::new(reader, default_fallbacks(project))
    }

    /// Resolve credentials from the secret named by `hint`, or if it's empty
    /// or unusable, from the first usable secret of the fallback chain.
    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN))]
    pub async fn resolve(&self, hint: &str) -> Result<DynatraceCredentials, Error> {
        let reader = self.reader;

        first_success("dynatrace credentials", self.candidates(hint), |name| async move {
            let tenant = reader.read(&name, DT_TENANT).await?;
            let api_token = reader.read(&name, DT_API_TOKEN).await?;
            DynatraceCredentials::new(&tenant, &api_token)
        })
        .await
    }

    fn candidates(&self, hint: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.fallbacks.len() + 1);

        let hint = hint.trim();
        if !hint.is_empty() {
            out.push(hint.to_string());
        }
        for name in &self.fallbacks {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        out
    }
}

/// Standard fallback chain of secret names for `project`.
pub fn default_fallbacks(project: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(3);
    if !project.is_empty() {
        out.push(format!("{SHARED_SECRET}-{project}"));
    }
    out.push(SHARED_SECRET.to_string());
    out.push(DEFAULT_SECRET.to_string());
    out
}

/// Where an orchestrator setting may be read from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Environment,
    Secret(String),
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Environment => f.write_str("environment"),
            Source::Secret(name) => write!(f, "secret {name}"),
        }
    }
}

/// Sources of orchestrator settings, in order of preference.
pub fn keptn_sources() -> Vec<Source> {
    vec![
        Source::Environment,
        Source::Secret(KEPTN_CREDENTIALS_SECRET.to_string()),
    ]
}

async fn read_from<E: SecretReader, R: SecretReader>(
    env: &E,
    secrets: &R,
    source: &Source,
    key: &str,
) -> Result<String, Error> {
    match source {
        Source::Environment => env.read("", key).await,
        Source::Secret(name) => secrets.read(name, key).await,
    }
}

/// Resolve the orchestrator's API credentials from the environment,
/// falling back to the `keptn-credentials` secret.
#[tracing::instrument(skip_all, err(level = tracing::Level::WARN))]
pub async fn resolve_keptn_credentials<E: SecretReader, R: SecretReader>(
    env: &E,
    secrets: &R,
) -> Result<KeptnCredentials, Error> {
    first_success("keptn credentials", keptn_sources(), |source| async move {
        let api_url = read_from(env, secrets, &source, KEPTN_API_URL).await?;
        let api_token = read_from(env, secrets, &source, KEPTN_API_TOKEN).await?;
        KeptnCredentials::new(&api_url, &api_token)
    })
    .await
}

/// Resolve the base URL of the orchestrator's bridge UI from the environment,
/// falling back to the `keptn-credentials` secret.
pub async fn resolve_bridge_url<E: SecretReader, R: SecretReader>(
    env: &E,
    secrets: &R,
) -> Result<url::Url, Error> {
    first_success("bridge URL", keptn_sources(), |source| async move {
        let raw = read_from(env, secrets, &source, KEPTN_BRIDGE_URL).await?;
        url::Url::parse(raw.trim()).map_err(|err| Error::malformed("bridge URL", err))
    })
    .await
}

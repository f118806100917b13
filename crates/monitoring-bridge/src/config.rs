use anyhow::Context;
use correlation::{rest, AttachRules, CorrelationContext, Error, KeptnCredentials};

/// URI of the per-project configuration resource.
pub const CONFIG_RESOURCE: &str = "dynatrace/dynatrace.conf.yaml";

/// DynatraceConfig is the user's configuration of a project, stage or service.
#[derive(Debug, Default, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynatraceConfig {
    /// Name of the secret holding monitoring credentials.
    #[serde(default)]
    pub dt_creds: Option<String>,
    /// Attach rules which take precedence over the default rules.
    #[serde(default)]
    pub attach_rules: Option<AttachRules>,
}

impl DynatraceConfig {
    pub fn parse(yaml: &str) -> anyhow::Result<Self> {
        // An empty document is an empty configuration.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).context("parsing dynatrace configuration")
    }

    /// Secret name hint of the credential chain. Empty if not configured.
    pub fn credentials_hint(&self) -> &str {
        self.dt_creds.as_deref().unwrap_or_default()
    }
}

/// ConfigSource loads the DynatraceConfig which applies to a context.
pub trait ConfigSource: Send + Sync {
    /// Load configuration of `ctx`. Configuration which doesn't exist at any
    /// level is the default configuration, but configuration which exists and
    /// is malformed is an error.
    fn load(
        &self,
        ctx: &CorrelationContext,
    ) -> impl std::future::Future<Output = anyhow::Result<DynatraceConfig>> + Send;
}

/// Level of the resource hierarchy at which configuration may be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Service,
    Stage,
    Project,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Level::Service => "service",
            Level::Stage => "stage",
            Level::Project => "project",
        })
    }
}

/// Levels to consult for `ctx`, most specific first.
pub fn levels(ctx: &CorrelationContext) -> Vec<Level> {
    let mut out = Vec::with_capacity(3);
    if !ctx.stage.is_empty() {
        if !ctx.service.is_empty() {
            out.push(Level::Service);
        }
        out.push(Level::Stage);
    }
    out.push(Level::Project);
    out
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct Resource {
    #[serde(default)]
    resource_content: String,
}

/// ResourceClient reads configuration from the orchestrator's resource service.
#[derive(Clone)]
pub struct ResourceClient {
    rest: rest::Client,
}

impl ResourceClient {
    pub fn new(http_client: reqwest::Client, credentials: &KeptnCredentials) -> Self {
        Self {
            rest: rest::Client::new(
                http_client,
                credentials.api_url(),
                "x-token",
                credentials.api_token().to_string(),
            ),
        }
    }

    fn resource_url(&self, ctx: &CorrelationContext, level: Level) -> Result<url::Url, Error> {
        let mut url = self.rest.url("configuration-service/v1/")?;
        {
            let mut segments = url.path_segments_mut().map_err(|()| Error::Transport {
                context: "orchestrator URL cannot be a base".to_string(),
                source: None,
            })?;
            segments.pop_if_empty().push("project").push(&ctx.project);

            if level != Level::Project {
                segments.push("stage").push(&ctx.stage);
            }
            if level == Level::Service {
                segments.push("service").push(&ctx.service);
            }
            segments.push("resource").push(CONFIG_RESOURCE);
        }
        Ok(url)
    }

    /// Fetch the configuration resource of `level`. A resource which doesn't
    /// exist is NotFound, and any other failure is Transport or Malformed.
    #[tracing::instrument(skip(self, ctx), fields(project = %ctx.project), err(level = tracing::Level::DEBUG))]
    async fn fetch(&self, ctx: &CorrelationContext, level: Level) -> Result<String, Error> {
        let Some(resource) = self
            .rest
            .get_url_opt::<Resource>(self.resource_url(ctx, level)?, &[])
            .await?
        else {
            return Err(Error::not_found(format!("{level} configuration resource")));
        };

        let content = base64::decode(resource.resource_content.trim())
            .map_err(|err| Error::malformed(format!("{level} configuration resource"), err))?;

        String::from_utf8(content)
            .map_err(|err| Error::malformed(format!("{level} configuration resource"), err))
    }
}

impl ConfigSource for ResourceClient {
    async fn load(&self, ctx: &CorrelationContext) -> anyhow::Result<DynatraceConfig> {
        for level in levels(ctx) {
            match self.fetch(ctx, level).await {
                Ok(yaml) => {
                    tracing::info!(%level, project = %ctx.project, "loaded configuration");
                    return DynatraceConfig::parse(&yaml);
                }
                Err(err) if err.is_not_found() => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("fetching {level} configuration"))
                }
            }
        }

        tracing::info!(project = %ctx.project, "using default configuration");
        Ok(DynatraceConfig::default())
    }
}

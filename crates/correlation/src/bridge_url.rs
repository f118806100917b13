use crate::{credentials, CorrelationContext, SecretReader};

/// BridgeUrlCreator builds deep links into the orchestrator's bridge UI.
/// Links are best-effort: when the bridge URL can't be resolved they're empty.
pub struct BridgeUrlCreator<'a, E, R> {
    env: &'a E,
    secrets: &'a R,
}

impl<'a, E: SecretReader, R: SecretReader> BridgeUrlCreator<'a, E, R> {
    pub fn new(env: &'a E, secrets: &'a R) -> Self {
        Self { env, secrets }
    }

    /// Link to the trace of the context's task sequence.
    pub async fn url_for_context(&self, ctx: &CorrelationContext) -> String {
        match self.base().await {
            Some(base) => format!("{base}/trace/{}", ctx.shkeptncontext),
            None => String::new(),
        }
    }

    /// Link to the evaluation of the context's stage.
    pub async fn url_for_evaluation(&self, ctx: &CorrelationContext) -> String {
        match self.base().await {
            Some(base) => format!("{base}/evaluation/{}/{}", ctx.shkeptncontext, ctx.stage),
            None => String::new(),
        }
    }

    async fn base(&self) -> Option<String> {
        match credentials::resolve_bridge_url(self.env, self.secrets).await {
            Ok(url) => Some(url.as_str().trim_end_matches('/').to_string()),
            Err(err) => {
                tracing::debug!(%err, "bridge URL unavailable");
                None
            }
        }
    }
}

use crate::cloudevent;
use crate::config::ConfigSource;
use crate::handlers::{Links, Session};
use crate::registry::Registry;
use anyhow::Context;
use correlation::{
    BridgeUrlCreator, CredentialResolver, DynatraceClient, DynatraceCredentials, EventStore,
    KeptnEvent, MonitoringBackend, SecretReader,
};

/// Connect builds the MonitoringBackend of resolved credentials.
pub trait Connect: Send + Sync {
    type Backend: MonitoringBackend;

    fn connect(&self, credentials: &DynatraceCredentials) -> Self::Backend;
}

impl Connect for reqwest::Client {
    type Backend = DynatraceClient;

    fn connect(&self, credentials: &DynatraceCredentials) -> DynatraceClient {
        DynatraceClient::new(self.clone(), credentials)
    }
}

/// Processor runs inbound events through their handlers.
pub struct Processor<E, R, S, C, N> {
    env: E,
    secrets: R,
    store: S,
    configs: C,
    connector: N,
    registry: Registry,
}

impl<E, R, S, C, N> Processor<E, R, S, C, N>
where
    E: SecretReader,
    R: SecretReader,
    S: EventStore,
    C: ConfigSource,
    N: Connect,
{
    pub fn new(env: E, secrets: R, store: S, configs: C, connector: N, registry: Registry) -> Self {
        Self {
            env,
            secrets,
            store,
            configs,
            connector,
            registry,
        }
    }

    /// Process `event`. Events of unhandled types are ignored.
    #[tracing::instrument(
        skip_all,
        fields(id = %event.id, event_type = %event.event_type, context = %event.shkeptncontext),
    )]
    pub async fn process(&self, event: KeptnEvent) -> anyhow::Result<()> {
        let Some(handler) = self.registry.construct(&event) else {
            tracing::debug!("ignoring unhandled event type");
            return Ok(());
        };
        let handler = handler?;
        let ctx = cloudevent::correlation_context(&event)?;

        let config = self
            .configs
            .load(&ctx)
            .await
            .context("loading configuration")?;

        let credentials = CredentialResolver::for_project(&self.secrets, &ctx.project)
            .resolve(config.credentials_hint())
            .await
            .context("resolving monitoring credentials")?;
        let backend = self.connector.connect(&credentials);

        let bridge = BridgeUrlCreator::new(&self.env, &self.secrets);
        let links = Links {
            context: bridge.url_for_context(&ctx).await,
            evaluation: bridge.url_for_evaluation(&ctx).await,
        };

        let session = Session {
            event: &event,
            ctx: &ctx,
            config: &config,
            store: &self.store,
            backend: &backend,
            links,
        };
        handler.handle(&session).await?;

        tracing::info!("handled event");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DynatraceConfig;
    use correlation::credentials::{DT_API_TOKEN, DT_TENANT};
    use correlation::testing::{valid_token, FakeBackend, FakeEventStore, MapSecretReader};
    use correlation::CorrelationContext;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct StaticConfig(Result<DynatraceConfig, String>);

    impl ConfigSource for StaticConfig {
        async fn load(&self, _ctx: &CorrelationContext) -> anyhow::Result<DynatraceConfig> {
            self.0.clone().map_err(anyhow::Error::msg)
        }
    }

    // Hands out a shared FakeBackend, recording the tenant of each connection.
    #[derive(Default)]
    struct FakeConnector {
        backend: Arc<FakeBackend>,
        tenants: Mutex<Vec<String>>,
    }

    impl Connect for FakeConnector {
        type Backend = Arc<FakeBackend>;

        fn connect(&self, credentials: &DynatraceCredentials) -> Arc<FakeBackend> {
            self.tenants
                .lock()
                .unwrap()
                .push(credentials.tenant().to_string());
            self.backend.clone()
        }
    }

    type TestProcessor =
        Processor<MapSecretReader, MapSecretReader, FakeEventStore, StaticConfig, FakeConnector>;

    fn processor(config: Result<DynatraceConfig, String>) -> TestProcessor {
        let env = MapSecretReader::default();
        env.insert("", "KEPTN_BRIDGE_URL", "https://keptn.example.com/bridge");

        let secrets = MapSecretReader::default();
        for name in ["dynatrace", "dynatrace-prod"] {
            secrets.insert(name, DT_TENANT, &format!("https://{name}.example.com"));
            secrets.insert(name, DT_API_TOKEN, &valid_token());
        }

        Processor::new(
            env,
            secrets,
            FakeEventStore::default(),
            StaticConfig(config),
            FakeConnector::default(),
            Registry::new(),
        )
    }

    fn event(event_type: &str) -> KeptnEvent {
        serde_json::from_value(json!({
            "id": "e1",
            "type": event_type,
            "time": "2024-03-01T10:10:00Z",
            "shkeptncontext": "ctx-1",
            "data": {
                "project": "sockshop",
                "stage": "production",
                "service": "carts",
                "test": {"teststrategy": "performance"},
            },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_process_with_configured_credentials() {
        let processor = processor(Ok(DynatraceConfig {
            dt_creds: Some("dynatrace-prod".to_string()),
            attach_rules: None,
        }));

        processor
            .process(event("sh.keptn.event.test.triggered"))
            .await
            .unwrap();

        assert_eq!(
            *processor.connector.tenants.lock().unwrap(),
            vec!["https://dynatrace-prod.example.com/".to_string()]
        );
        let sent = processor.connector.backend.sent_events();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].custom_properties["Keptns Bridge"],
            "https://keptn.example.com/bridge/trace/ctx-1"
        );
    }

    #[tokio::test]
    async fn test_process_falls_back_to_default_credentials() {
        let processor = processor(Ok(DynatraceConfig {
            dt_creds: Some("missing".to_string()),
            attach_rules: None,
        }));

        processor
            .process(event("sh.keptn.event.test.triggered"))
            .await
            .unwrap();

        assert_eq!(
            *processor.connector.tenants.lock().unwrap(),
            vec!["https://dynatrace.example.com/".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unhandled_events_are_ignored() {
        let processor = processor(Err("must not be loaded".to_string()));

        processor
            .process(event("sh.keptn.event.get-sli.triggered"))
            .await
            .unwrap();
        assert!(processor.connector.tenants.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configuration_errors_abort() {
        let processor = processor(Err("malformed yaml".to_string()));

        let err = processor
            .process(event("sh.keptn.event.test.triggered"))
            .await
            .unwrap_err();
        assert_eq!(format!("{err:#}"), "loading configuration: malformed yaml");
        assert!(processor.connector.backend.sent_events().is_empty());
    }
}

//! Handlers of the lifecycle events which the bridge reacts to.
//!
//! Each handler is decoded from the data of its inbound event, and is then
//! run against a Session holding everything resolved for that event.

mod action;
mod deployment;
mod evaluation;
mod release;
mod test_task;

pub use action::{ActionFinished, ActionStarted, ActionTriggered};
pub use deployment::DeploymentFinished;
pub use evaluation::EvaluationFinished;
pub use release::ReleaseTriggered;
pub use test_task::{TestFinished, TestTriggered};

use crate::config::DynatraceConfig;
use correlation::{
    dynatrace::EventType, AttachRules, CorrelationContext, Correlator, DynatraceEvent,
    EventStore, KeptnEvent, MonitoringBackend,
};
use std::collections::BTreeMap;

/// Source of every event sent to the monitoring backend.
pub const EVENT_SOURCE: &str = "Keptn dynatrace-service";

/// Deep links into the bridge UI for the inbound event.
/// Either may be empty if the bridge URL is unavailable.
#[derive(Debug, Default, Clone)]
pub struct Links {
    pub context: String,
    pub evaluation: String,
}

/// Session is everything resolved for a single inbound event.
pub struct Session<'a, S, B> {
    pub event: &'a KeptnEvent,
    pub ctx: &'a CorrelationContext,
    pub config: &'a DynatraceConfig,
    pub store: &'a S,
    pub backend: &'a B,
    pub links: Links,
}

impl<'a, S: EventStore, B: MonitoringBackend> Session<'a, S, B> {
    pub fn correlator(&self) -> Correlator<'a, S> {
        Correlator::new(self.store)
    }

    /// Attach rules of events which aren't scoped to discovered entities.
    pub fn attach_rules(&self) -> AttachRules {
        AttachRules::merge(&[], self.config.attach_rules.clone(), self.ctx)
    }

    /// Custom properties common to all events: the context's labels,
    /// overlaid with its coordinates and a link to the bridge.
    pub fn custom_properties(&self, bridge_link: &str) -> BTreeMap<String, String> {
        let mut out = self.ctx.labels.clone();

        out.insert("Project".to_string(), self.ctx.project.clone());
        out.insert("Stage".to_string(), self.ctx.stage.clone());
        out.insert("Service".to_string(), self.ctx.service.clone());
        out.insert("Keptn Context".to_string(), self.ctx.shkeptncontext.clone());
        if !bridge_link.is_empty() {
            out.insert("Keptns Bridge".to_string(), bridge_link.to_string());
        }
        out
    }

    /// A DynatraceEvent of `event_type` with the attach rules and custom
    /// properties common to all events, for handlers to fill in.
    pub fn new_event(&self, event_type: EventType) -> DynatraceEvent {
        DynatraceEvent {
            event_type,
            source: EVENT_SOURCE.to_string(),
            attach_rules: self.attach_rules(),
            custom_properties: self.custom_properties(&self.links.context),
            ..Default::default()
        }
    }

    /// Returns true if the context is part of a remediation.
    /// A failure to determine this is logged and treated as false.
    pub async fn is_part_of_remediation(&self) -> bool {
        match self.correlator().is_part_of_remediation(self.ctx).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(%err, context = %self.ctx.shkeptncontext, "failed to check for remediation, assuming none");
                false
            }
        }
    }
}

/// Handler is a decoded inbound event which the bridge reacts to.
#[derive(Debug)]
pub enum Handler {
    DeploymentFinished(DeploymentFinished),
    TestTriggered(TestTriggered),
    TestFinished(TestFinished),
    EvaluationFinished(EvaluationFinished),
    ReleaseTriggered(ReleaseTriggered),
    ActionTriggered(ActionTriggered),
    ActionStarted(ActionStarted),
    ActionFinished(ActionFinished),
}

impl Handler {
    pub async fn handle<S: EventStore, B: MonitoringBackend>(
        self,
        session: &Session<'_, S, B>,
    ) -> anyhow::Result<()> {
        match self {
            Handler::DeploymentFinished(h) => h.handle(session).await,
            Handler::TestTriggered(h) => h.handle(session).await,
            Handler::TestFinished(h) => h.handle(session).await,
            Handler::EvaluationFinished(h) => h.handle(session).await,
            Handler::ReleaseTriggered(h) => h.handle(session).await,
            Handler::ActionTriggered(h) => h.handle(session).await,
            Handler::ActionStarted(h) => h.handle(session).await,
            Handler::ActionFinished(h) => h.handle(session).await,
        }
    }
}


#[cfg(test)]
mod test {
    use super::fixture::*;
    use super::*;

    #[tokio::test]
    async fn test_common_event_fields() {
        let mut event = inbound(
            "sh.keptn.event.release.triggered",
            serde_json::json!({"labels": {"Stage": "overridden", "owner": "team-carts"}}),
        );
        event.id = "release-1".to_string();
        let fixture = Fixture::new(event);
        let session = fixture.session();

        let event = session.new_event(EventType::Info);
        insta::assert_json_snapshot!(event, @r###"
        {
          "eventType": "CUSTOM_INFO",
          "source": "Keptn dynatrace-service",
          "attachRules": {
            "tagRule": [
              {
                "meTypes": [
                  "SERVICE"
                ],
                "tags": [
                  {
                    "context": "CONTEXTLESS",
                    "key": "keptn_project",
                    "value": "sockshop"
                  },
                  {
                    "context": "CONTEXTLESS",
                    "key": "keptn_stage",
                    "value": "production"
                  },
                  {
                    "context": "CONTEXTLESS",
                    "key": "keptn_service",
                    "value": "carts"
                  }
                ]
              }
            ]
          },
          "customProperties": {
            "Keptn Context": "7c2c890f-b3ac-4caa-8922-f44d2aa54ec9",
            "Keptns Bridge": "https://keptn.example.com/bridge/trace/7c2c890f-b3ac-4caa-8922-f44d2aa54ec9",
            "Project": "sockshop",
            "Service": "carts",
            "Stage": "production",
            "owner": "team-carts"
          }
        }
        "###);

        // Without a bridge link, there's no such property.
        assert!(!session.custom_properties("").contains_key("Keptns Bridge"));
    }

    #[tokio::test]
    async fn test_remediation_check_degrades() {
        let fixture = Fixture::new(inbound("sh.keptn.event.evaluation.finished", serde_json::json!({})));
        fixture.store.push(correlation::testing::event(
            correlation::events::REMEDIATION_TRIGGERED,
            CONTEXT,
            Some("2024-03-01T09:00:00Z"),
            serde_json::json!({}),
        ));
        assert!(fixture.session().is_part_of_remediation().await);

        fixture.store.fail_with("datastore unavailable");
        assert!(!fixture.session().is_part_of_remediation().await);
    }
}

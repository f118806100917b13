use super::Session;
use anyhow::Context;
use correlation::{
    dynatrace::EventType, AttachRules, EntityWindowResolver, EventStore, MonitoringBackend,
    Timeframe,
};

/// DeploymentFinished marks a finished deployment with a deployment event,
/// attached to the process instances which run the deployed version.
#[derive(Debug, Default, serde::Deserialize)]
pub struct DeploymentFinished {
    #[serde(default)]
    deployment: DeploymentData,
}

#[derive(Debug, Default, serde::Deserialize)]
pub(super) struct DeploymentData {
    #[serde(default, rename = "deploymentstrategy")]
    pub strategy: String,
}

impl DeploymentFinished {
    #[tracing::instrument(skip_all, fields(context = %session.ctx.shkeptncontext))]
    pub async fn handle<S: EventStore, B: MonitoringBackend>(
        self,
        session: &Session<'_, S, B>,
    ) -> anyhow::Result<()> {
        let ctx = session.ctx;
        let image_and_tag = session.correlator().get_image_and_tag(ctx).await;
        let timeframe = deployment_window(session).await;

        let entities = match &timeframe {
            Some(timeframe) => EntityWindowResolver::new(session.backend)
                .find_entities(timeframe, &image_and_tag)
                .await
                .unwrap_or_else(|err| {
                    tracing::warn!(%err, "failed to find deployed entities, using configured rules");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        let mut event = session.new_event(EventType::Deployment);
        event.attach_rules =
            AttachRules::merge(&entities, session.config.attach_rules.clone(), ctx);
        event.deployment_name = Some(format!(
            "Deploy {} {} with strategy {}",
            ctx.service, image_and_tag.tag, self.deployment.strategy
        ));
        event.deployment_version = Some(image_and_tag.tag.clone());
        event.deployment_project = Some(ctx.project.clone());
        if !session.links.context.is_empty() {
            event.ci_back_link = Some(session.links.context.clone());
        }
        event
            .custom_properties
            .insert("Image".to_string(), image_and_tag.image);
        event
            .custom_properties
            .insert("Tag".to_string(), image_and_tag.tag);

        if let Some(timeframe) = &timeframe {
            event = event.with_timeframe(timeframe);
        }

        session
            .backend
            .send_event(&event)
            .await
            .context("sending deployment event")?;

        tracing::info!(entities = entities.len(), "sent deployment event");
        Ok(())
    }
}

// The deployment window spans from when the deployment was triggered
// until it finished, which is the time of the inbound event.
async fn deployment_window<S: EventStore, B: MonitoringBackend>(
    session: &Session<'_, S, B>,
) -> Option<Timeframe> {
    let start = match session
        .correlator()
        .find_triggered_time(session.ctx, "deployment")
        .await
    {
        Ok(start) => start,
        Err(err) => {
            tracing::debug!(%err, "deployment window is unknown");
            return None;
        }
    };
    let end = session.event.time.unwrap_or_else(chrono::Utc::now);

    match Timeframe::new(start, end) {
        Ok(timeframe) => Some(timeframe),
        Err(err) => {
            tracing::warn!(%err, "deployment window is invalid");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::{fixture::*, Handler};
    use correlation::{events, testing, MonitoredEntity};
    use serde_json::json;

    fn fixture() -> Fixture {
        Fixture::new(inbound(
            "sh.keptn.event.deployment.finished",
            json!({
                "result": "pass",
                "status": "succeeded",
                "deployment": {
                    "deploymentstrategy": "blue_green_service",
                    "deploymentURIsPublic": ["http://carts.sockshop-production.example.com"],
                },
            }),
        ))
    }

    fn entity(id: &str) -> MonitoredEntity {
        MonitoredEntity {
            id: id.to_string(),
            display_name: None,
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_versioned_deployment() {
        let fixture = fixture();
        fixture.store.push(testing::event(
            events::DEPLOYMENT_TRIGGERED,
            CONTEXT,
            Some("2024-03-01T10:00:00Z"),
            json!({"configurationChange": {"values": {"image": "docker.io/keptn/carts:0.13.1"}}}),
        ));
        *fixture.backend.entities.lock().unwrap() = vec![entity("PROCESS_GROUP_INSTANCE-1")];

        fixture.run(Handler::DeploymentFinished).await.unwrap();

        assert_eq!(fixture.backend.entity_query_count(), 1);
        insta::assert_json_snapshot!(fixture.backend.sent_events(), @r###"
        [
          {
            "eventType": "CUSTOM_DEPLOYMENT",
            "source": "Keptn dynatrace-service",
            "start": 1709287200000,
            "end": 1709287800000,
            "deploymentName": "Deploy carts 0.13.1 with strategy blue_green_service",
            "deploymentVersion": "0.13.1",
            "deploymentProject": "sockshop",
            "ciBackLink": "https://keptn.example.com/bridge/trace/7c2c890f-b3ac-4caa-8922-f44d2aa54ec9",
            "attachRules": {
              "entityIds": [
                "PROCESS_GROUP_INSTANCE-1"
              ]
            },
            "customProperties": {
              "Image": "docker.io/keptn/carts",
              "Keptn Context": "7c2c890f-b3ac-4caa-8922-f44d2aa54ec9",
              "Keptns Bridge": "https://keptn.example.com/bridge/trace/7c2c890f-b3ac-4caa-8922-f44d2aa54ec9",
              "Project": "sockshop",
              "Service": "carts",
              "Stage": "production",
              "Tag": "0.13.1"
            }
          }
        ]
        "###);
    }

    #[tokio::test]
    async fn test_unversioned_deployment_uses_configured_rules() {
        let mut fixture = fixture();
        fixture.config.attach_rules = Some(correlation::AttachRules {
            entity_ids: ["SERVICE-42".to_string()].into(),
            ..Default::default()
        });
        *fixture.backend.entities.lock().unwrap() = vec![entity("PROCESS_GROUP_INSTANCE-1")];

        fixture.run(Handler::DeploymentFinished).await.unwrap();

        // Without a version tag or window the backend isn't queried.
        assert_eq!(fixture.backend.entity_query_count(), 0);

        let sent = fixture.backend.sent_events();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].start, None);
        assert_eq!(sent[0].deployment_version.as_deref(), Some("n/a"));
        assert_eq!(
            sent[0].attach_rules.entity_ids.iter().collect::<Vec<_>>(),
            vec!["SERVICE-42"]
        );
    }

    #[tokio::test]
    async fn test_failed_send_is_an_error() {
        let fixture = fixture();
        fixture.backend.fail_with("tenant unavailable");

        let err = fixture.run(Handler::DeploymentFinished).await.unwrap_err();
        assert_eq!(err.to_string(), "sending deployment event");
    }
}

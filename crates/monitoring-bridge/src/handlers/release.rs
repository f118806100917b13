use super::{deployment::DeploymentData, Session};
use anyhow::Context;
use correlation::{dynatrace::EventType, EventStore, MonitoringBackend};

/// ReleaseTriggered records the promotion or rollback of a deployment with an info event.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ReleaseTriggered {
    #[serde(default)]
    result: String,
    #[serde(default)]
    deployment: DeploymentData,
}

impl ReleaseTriggered {
    #[tracing::instrument(skip_all, fields(context = %session.ctx.shkeptncontext))]
    pub async fn handle<S: EventStore, B: MonitoringBackend>(
        self,
        session: &Session<'_, S, B>,
    ) -> anyhow::Result<()> {
        let ctx = session.ctx;
        let image_and_tag = session.correlator().get_image_and_tag(ctx).await;

        let action = match self.result.as_str() {
            "fail" => "Rollback",
            _ => "Promote",
        };
        let title = format!(
            "{action} artifact from {} of {} {}",
            ctx.stage, ctx.service, image_and_tag.tag
        );

        let mut event = session.new_event(EventType::Info);
        event.title = Some(title.clone());
        event.description = Some(title);
        event
            .custom_properties
            .insert("Image".to_string(), image_and_tag.image);
        event
            .custom_properties
            .insert("Tag".to_string(), image_and_tag.tag);
        if !self.deployment.strategy.is_empty() {
            event
                .custom_properties
                .insert("DeploymentStrategy".to_string(), self.deployment.strategy);
        }

        session
            .backend
            .send_event(&event)
            .await
            .context("sending release event")?;
        Ok(())
    }
}

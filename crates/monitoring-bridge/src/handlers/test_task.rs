use super::Session;
use anyhow::Context;
use correlation::{dynatrace::EventType, EventStore, MonitoringBackend, Timeframe};

/// TestTriggered announces the start of tests with an info event.
#[derive(Debug, Default, serde::Deserialize)]
pub struct TestTriggered {
    #[serde(default)]
    test: TestStrategy,
}

#[derive(Debug, Default, serde::Deserialize)]
struct TestStrategy {
    #[serde(default, rename = "teststrategy")]
    strategy: String,
}

impl TestTriggered {
    #[tracing::instrument(skip_all, fields(context = %session.ctx.shkeptncontext))]
    pub async fn handle<S: EventStore, B: MonitoringBackend>(
        self,
        session: &Session<'_, S, B>,
    ) -> anyhow::Result<()> {
        let title = format!(
            "Start running tests: {} against {}",
            self.test.strategy, session.ctx.service
        );

        let mut event = session.new_event(EventType::Info);
        event.title = Some(title.clone());
        event.description = Some(title);
        event
            .custom_properties
            .insert("TestStrategy".to_string(), self.test.strategy);

        session
            .backend
            .send_event(&event)
            .await
            .context("sending test-triggered event")?;
        Ok(())
    }
}

/// TestFinished annotates the window during which tests ran.
#[derive(Debug, Default, serde::Deserialize)]
pub struct TestFinished {
    #[serde(default)]
    test: TestWindow,
}

#[derive(Debug, Default, serde::Deserialize)]
struct TestWindow {
    #[serde(default)]
    start: String,
    #[serde(default)]
    end: String,
}

impl TestFinished {
    #[tracing::instrument(skip_all, fields(context = %session.ctx.shkeptncontext))]
    pub async fn handle<S: EventStore, B: MonitoringBackend>(
        self,
        session: &Session<'_, S, B>,
    ) -> anyhow::Result<()> {
        let mut event = session.new_event(EventType::Annotation);
        event.annotation_type = Some("Stop Tests".to_string());
        event.annotation_description = Some(format!(
            "Stop running tests: against {}",
            session.ctx.service
        ));

        match Timeframe::parse(&self.test.start, &self.test.end) {
            Ok(timeframe) => event = event.with_timeframe(&timeframe),
            Err(err) => tracing::warn!(%err, "test window is invalid, annotating without it"),
        }

        session
            .backend
            .send_event(&event)
            .await
            .context("sending test-finished event")?;
        Ok(())
    }
}

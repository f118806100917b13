use super::{Session, EVENT_SOURCE};
use anyhow::Context;
use correlation::{
    dynatrace::EventType, DynatraceEvent, EventStore, MonitoringBackend, ProblemComment,
};

/// ActionTriggered comments on the remediated problem that an action was triggered.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ActionTriggered {
    #[serde(default)]
    action: ActionData,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ActionData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    description: String,
}

/// ActionStarted marks the start of a remediation action with a configuration event.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ActionStarted {}

/// ActionFinished comments on the remediated problem with the outcome of an action,
/// and marks its end with a configuration event.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ActionFinished {
    #[serde(default)]
    result: String,
    #[serde(default)]
    status: String,
}

// Actions only make sense against the problem they remediate,
// so it's an error if the problem can't be found.
async fn remediated_problem<S: EventStore, B: MonitoringBackend>(
    session: &Session<'_, S, B>,
) -> anyhow::Result<String> {
    session
        .correlator()
        .find_problem_id(session.ctx)
        .await
        .context("finding remediated problem")
}

async fn comment<S: EventStore, B: MonitoringBackend>(
    session: &Session<'_, S, B>,
    pid: &str,
    message: String,
) -> anyhow::Result<()> {
    let comment = ProblemComment {
        message,
        context: EVENT_SOURCE.to_string(),
    };
    session
        .backend
        .add_problem_comment(pid, &comment)
        .await
        .with_context(|| format!("commenting on problem {pid}"))
}

fn configuration_event<S: EventStore, B: MonitoringBackend>(
    session: &Session<'_, S, B>,
    pid: &str,
    description: &str,
    configuration: &str,
) -> DynatraceEvent {
    let mut event = session.new_event(EventType::Configuration);
    event.description = Some(description.to_string());
    event.configuration = Some(configuration.to_string());
    if !session.links.context.is_empty() {
        event.remediation_action = Some(session.links.context.clone());
    }
    event
        .custom_properties
        .insert("Problem ID".to_string(), pid.to_string());
    event
}

impl ActionTriggered {
    #[tracing::instrument(skip_all, fields(context = %session.ctx.shkeptncontext))]
    pub async fn handle<S: EventStore, B: MonitoringBackend>(
        self,
        session: &Session<'_, S, B>,
    ) -> anyhow::Result<()> {
        let pid = remediated_problem(session).await?;

        let name = if self.action.name.is_empty() {
            &self.action.action
        } else {
            &self.action.name
        };
        let mut message = format!("[Keptn triggered action]({}) {name}", session.links.context);
        if !self.action.description.is_empty() {
            message.push_str(": ");
            message.push_str(&self.action.description);
        }

        comment(session, &pid, message).await
    }
}

impl ActionStarted {
    #[tracing::instrument(skip_all, fields(context = %session.ctx.shkeptncontext))]
    pub async fn handle<S: EventStore, B: MonitoringBackend>(
        self,
        session: &Session<'_, S, B>,
    ) -> anyhow::Result<()> {
        let pid = remediated_problem(session).await?;

        let event = configuration_event(
            session,
            &pid,
            "Keptn Remediation Action Started",
            "Keptn Remediation",
        );
        session
            .backend
            .send_event(&event)
            .await
            .context("sending action-started event")?;
        Ok(())
    }
}

impl ActionFinished {
    #[tracing::instrument(skip_all, fields(context = %session.ctx.shkeptncontext))]
    pub async fn handle<S: EventStore, B: MonitoringBackend>(
        self,
        session: &Session<'_, S, B>,
    ) -> anyhow::Result<()> {
        let pid = remediated_problem(session).await?;

        comment(
            session,
            &pid,
            format!(
                "[Keptn finished execution]({}) of action\nResult: {}\nStatus: {}",
                session.links.context, self.result, self.status
            ),
        )
        .await?;

        let mut event = configuration_event(
            session,
            &pid,
            "Keptn Remediation Action Finished",
            &format!("result: {}, status: {}", self.result, self.status),
        );
        event
            .custom_properties
            .insert("Result".to_string(), self.result);
        event
            .custom_properties
            .insert("Status".to_string(), self.status);

        session
            .backend
            .send_event(&event)
            .await
            .context("sending action-finished event")?;
        Ok(())
    }
}

use super::{Session, EVENT_SOURCE};
use anyhow::Context;
use correlation::{
    dynatrace::EventType, EventStore, MonitoringBackend, ProblemComment, Timeframe,
};

/// EvaluationFinished reports the result of a quality gate evaluation.
/// Evaluations of a remediation also comment on the remediated problem.
#[derive(Debug, Default, serde::Deserialize)]
pub struct EvaluationFinished {
    #[serde(default)]
    result: String,
    #[serde(default)]
    evaluation: EvaluationDetails,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluationDetails {
    #[serde(default)]
    result: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    time_start: String,
    #[serde(default)]
    time_end: String,
}

impl EvaluationFinished {
    fn result(&self) -> &str {
        if self.evaluation.result.is_empty() {
            &self.result
        } else {
            &self.evaluation.result
        }
    }

    #[tracing::instrument(skip_all, fields(context = %session.ctx.shkeptncontext))]
    pub async fn handle<S: EventStore, B: MonitoringBackend>(
        self,
        session: &Session<'_, S, B>,
    ) -> anyhow::Result<()> {
        let result = self.result();
        let score = format!("{:.2}", self.evaluation.score);
        let remediation = session.is_part_of_remediation().await;

        let mut event = session.new_event(EventType::Info);
        event.custom_properties = session.custom_properties(&session.links.evaluation);
        event.title = Some(if remediation {
            format!("Remediation action evaluation result: {result}")
        } else {
            format!("Evaluation result: {result}")
        });
        event.description = Some(format!(
            "Quality gate evaluation in stage {} resulted in {result} with a score of {score}",
            session.ctx.stage
        ));
        event
            .custom_properties
            .insert("Evaluation Result".to_string(), result.to_string());
        event
            .custom_properties
            .insert("Evaluation Score".to_string(), score.clone());

        match Timeframe::parse(&self.evaluation.time_start, &self.evaluation.time_end) {
            Ok(timeframe) => event = event.with_timeframe(&timeframe),
            Err(err) => tracing::warn!(%err, "evaluation window is invalid, reporting without it"),
        }

        session
            .backend
            .send_event(&event)
            .await
            .context("sending evaluation event")?;

        if remediation {
            self.comment(session, result, &score).await?;
        }
        Ok(())
    }

    // Comment on the remediated problem, if it can be found.
    async fn comment<S: EventStore, B: MonitoringBackend>(
        &self,
        session: &Session<'_, S, B>,
        result: &str,
        score: &str,
    ) -> anyhow::Result<()> {
        let pid = match session.correlator().find_problem_id(session.ctx).await {
            Ok(pid) => pid,
            Err(err) => {
                tracing::warn!(%err, "remediated problem not found, not commenting");
                return Ok(());
            }
        };

        let comment = ProblemComment {
            message: format!(
                "[Keptn remediation action evaluation]({}) resulted in {result} ({score}/100)",
                session.links.evaluation
            ),
            context: EVENT_SOURCE.to_string(),
        };
        session
            .backend
            .add_problem_comment(&pid, &comment)
            .await
            .with_context(|| format!("commenting on problem {pid}"))
    }
}

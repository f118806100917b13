use crate::events::{self, EventFilter, EventStore, KeptnEvent};
use crate::{problem_url, Error, Timeframe};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Value of an image or tag which isn't known.
pub const NOT_AVAILABLE: &str = "n/a";

/// CorrelationContext is the read-only view of an inbound event which
/// keys every query against the event store.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CorrelationContext {
    pub project: String,
    pub stage: String,
    pub service: String,
    pub shkeptncontext: String,
    pub labels: BTreeMap<String, String>,
}

impl CorrelationContext {
    fn filter(&self, event_type: &str) -> EventFilter {
        EventFilter {
            project: self.project.clone(),
            stage: Some(self.stage.clone()),
            service: Some(self.service.clone()),
            context: self.shkeptncontext.clone(),
            event_type: event_type.to_string(),
        }
    }

    fn project_filter(&self, event_type: &str) -> EventFilter {
        EventFilter {
            project: self.project.clone(),
            stage: None,
            service: None,
            context: self.shkeptncontext.clone(),
            event_type: event_type.to_string(),
        }
    }
}

/// ImageAndTag is the deployed image and its version tag.
/// Either may be "n/a", which is an expected state rather than an error.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ImageAndTag {
    pub image: String,
    pub tag: String,
}

impl ImageAndTag {
    pub fn not_available() -> Self {
        Self {
            image: NOT_AVAILABLE.to_string(),
            tag: NOT_AVAILABLE.to_string(),
        }
    }

    /// Parse an `image:tag` string, splitting on its first colon.
    /// Without a colon the tag is "n/a".
    pub fn parse(raw: &str) -> Self {
        if raw == NOT_AVAILABLE {
            return Self::not_available();
        }
        match raw.split_once(':') {
            Some((image, tag)) => Self {
                image: image.to_string(),
                tag: tag.to_string(),
            },
            None => Self {
                image: raw.to_string(),
                tag: NOT_AVAILABLE.to_string(),
            },
        }
    }

    pub fn has_tag(&self) -> bool {
        !self.tag.is_empty() && self.tag != NOT_AVAILABLE
    }
}

#[derive(serde::Deserialize)]
struct ProblemOpenData {
    #[serde(rename = "PID", default)]
    pid: Option<String>,
    #[serde(default)]
    problem: Option<Box<ProblemOpenData>>,
}

impl ProblemOpenData {
    fn into_pid(self) -> Option<String> {
        match self.pid.filter(|pid| !pid.is_empty()) {
            Some(pid) => Some(pid),
            None => self.problem.and_then(|nested| nested.into_pid()),
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentTriggeredData {
    #[serde(default)]
    configuration_change: Option<ConfigurationChange>,
}

#[derive(serde::Deserialize)]
struct ConfigurationChange {
    #[serde(default)]
    values: serde_json::Map<String, serde_json::Value>,
}

/// Correlator recovers problem IDs, version metadata, remediation
/// membership and task timeframes of a context from the event store.
/// All of its queries are read-only and safe to repeat.
pub struct Correlator<'s, S> {
    store: &'s S,
}

impl<'s, S: EventStore> Correlator<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Find the monitoring problem this context correlates with.
    ///
    /// The context's labels are consulted first, and the store is queried only
    /// if they don't name a problem. It's an error if no problem is found,
    /// or if the earliest problem-open event of the context has no ID.
    #[tracing::instrument(skip_all, fields(project = %ctx.project, context = %ctx.shkeptncontext), err)]
    pub async fn find_problem_id(&self, ctx: &CorrelationContext) -> Result<String, Error> {
        if let Some(pid) = problem_url::extract_problem_id(&ctx.labels) {
            tracing::debug!(%pid, "found problem ID in labels");
            return Ok(pid);
        }

        let events = self
            .store
            .get_events(&ctx.project_filter(events::PROBLEM_OPEN))
            .await?;

        let Some(earliest) = earliest(events) else {
            return Err(Error::not_found(format!(
                "problem of context {}",
                ctx.shkeptncontext
            )));
        };

        let data: ProblemOpenData = serde_json::from_value(earliest.data).map_err(|err| {
            Error::malformed(format!("problem-open event {}", earliest.id), err)
        })?;

        data.into_pid().ok_or_else(|| Error::Malformed {
            what: format!("problem-open event {} has no problem ID", earliest.id),
            source: None,
        })
    }

    /// Returns true if the context is part of a remediation sequence.
    /// Store failures are returned, and callers choose whether to degrade them.
    #[tracing::instrument(skip_all, fields(project = %ctx.project, context = %ctx.shkeptncontext), err(level = tracing::Level::DEBUG))]
    pub async fn is_part_of_remediation(&self, ctx: &CorrelationContext) -> Result<bool, Error> {
        let events = self
            .store
            .get_events(&ctx.filter(events::REMEDIATION_TRIGGERED))
            .await?;

        Ok(!events.is_empty())
    }

    /// Find the image and tag deployed by the context's deployment.
    /// This never fails: missing or undecodable metadata yields "n/a".
    #[tracing::instrument(skip_all, fields(project = %ctx.project, context = %ctx.shkeptncontext))]
    pub async fn get_image_and_tag(&self, ctx: &CorrelationContext) -> ImageAndTag {
        let events = match self
            .store
            .get_events(&ctx.filter(events::DEPLOYMENT_TRIGGERED))
            .await
        {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(%err, "failed to query deployment-triggered events");
                return ImageAndTag::not_available();
            }
        };

        let Some(event) = events.into_iter().next() else {
            tracing::debug!("no deployment-triggered event found");
            return ImageAndTag::not_available();
        };

        let data: DeploymentTriggeredData = match serde_json::from_value(event.data) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(%err, id = %event.id, "failed to decode deployment-triggered event");
                return ImageAndTag::not_available();
            }
        };

        let image = data
            .configuration_change
            .iter()
            .flat_map(|change| change.values.iter())
            .find_map(|(key, value)| match value {
                serde_json::Value::String(image) if key.ends_with("image") => Some(image),
                _ => None,
            });

        match image {
            Some(image) => ImageAndTag::parse(image),
            None => ImageAndTag::not_available(),
        }
    }

    /// Find when the `task` of the context was triggered.
    pub async fn find_triggered_time(
        &self,
        ctx: &CorrelationContext,
        task: &str,
    ) -> Result<DateTime<Utc>, Error> {
        self.find_time(ctx, &events::triggered_type(task)).await
    }

    /// Find the Timeframe spanning from the `triggered` to
    /// the `finished` event of the context's `task`.
    #[tracing::instrument(skip(self, ctx), fields(context = %ctx.shkeptncontext), err(level = tracing::Level::DEBUG))]
    pub async fn find_task_timeframe(
        &self,
        ctx: &CorrelationContext,
        task: &str,
    ) -> Result<Timeframe, Error> {
        let start = self.find_time(ctx, &events::triggered_type(task)).await?;
        let end = self.find_time(ctx, &events::finished_type(task)).await?;
        Timeframe::new(start, end)
    }

    async fn find_time(
        &self,
        ctx: &CorrelationContext,
        event_type: &str,
    ) -> Result<DateTime<Utc>, Error> {
        let events = self.store.get_events(&ctx.filter(event_type)).await?;

        let Some(event) = events.into_iter().next() else {
            return Err(Error::not_found(format!(
                "{event_type} event of context {}",
                ctx.shkeptncontext
            )));
        };
        event.time.ok_or_else(|| Error::Malformed {
            what: format!("{event_type} event {} has no time", event.id),
            source: None,
        })
    }
}

// Select the earliest event by time. Untimed events sort after timed ones,
// and among untimed events the store's last (oldest) one is chosen.
fn earliest(events: Vec<KeptnEvent>) -> Option<KeptnEvent> {
    events
        .into_iter()
        .rev()
        .min_by_key(|event| (event.time.is_none(), event.time))
}

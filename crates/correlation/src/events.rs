use crate::{rest, Error, KeptnCredentials};
use chrono::{DateTime, Utc};

/// Prefix shared by all lifecycle event types.
pub const EVENT_TYPE_PREFIX: &str = "sh.keptn.event.";
/// Event emitted by the monitoring backend when it opens a problem.
pub const PROBLEM_OPEN: &str = "sh.keptn.event.problem.open";
/// Event emitted when an automated remediation sequence starts.
pub const REMEDIATION_TRIGGERED: &str = "sh.keptn.event.remediation.triggered";
/// Event emitted when a deployment task is requested.
pub const DEPLOYMENT_TRIGGERED: &str = "sh.keptn.event.deployment.triggered";

/// Event type of the `triggered` phase of `task`.
pub fn triggered_type(task: &str) -> String {
    format!("{EVENT_TYPE_PREFIX}{task}.triggered")
}

/// Event type of the `finished` phase of `task`.
pub fn finished_type(task: &str) -> String {
    format!("{EVENT_TYPE_PREFIX}{task}.finished")
}

/// KeptnEvent is a lifecycle event as returned by the event store.
/// Its `data` is decoded lazily by whichever query needs it.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct KeptnEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub shkeptncontext: String,
    #[serde(default)]
    pub triggeredid: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// EventFilter selects events of the store.
/// `project`, `context` and `event_type` are required, while
/// `stage` and `service` narrow the query when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub project: String,
    pub stage: Option<String>,
    pub service: Option<String>,
    pub context: String,
    pub event_type: String,
}

/// EventStore is an eventually-consistent store of lifecycle events.
pub trait EventStore: Send + Sync {
    /// Fetch all events matching `filter`, most recent first.
    /// No matches is an empty Vec, not an error.
    fn get_events(
        &self,
        filter: &EventFilter,
    ) -> impl std::future::Future<Output = Result<Vec<KeptnEvent>, Error>> + Send;
}

/// DatastoreClient queries the orchestrator's event datastore over REST.
#[derive(Clone)]
pub struct DatastoreClient {
    rest: rest::Client,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    events: Vec<KeptnEvent>,
    #[serde(default)]
    next_page_key: Option<String>,
}

const PAGE_SIZE: &str = "50";
const EVENTS_PATH: &str = "mongodb-datastore/event";

impl DatastoreClient {
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
}

impl EventStore for DatastoreClient {
    #[tracing::instrument(skip(self), err(level = tracing::Level::DEBUG))]
    async fn get_events(&self, filter: &EventFilter) -> Result<Vec<KeptnEvent>, Error> {
        let mut out = Vec::new();
        let mut page_key = String::new();

        loop {
            let mut query = vec![
                ("project", filter.project.as_str()),
                ("keptnContext", filter.context.as_str()),
                ("type", filter.event_type.as_str()),
                ("pageSize", PAGE_SIZE),
            ];
            if let Some(stage) = &filter.stage {
                query.push(("stage", stage.as_str()));
            }
            if let Some(service) = &filter.service {
                query.push(("service", service.as_str()));
            }
            if !page_key.is_empty() {
                query.push(("nextPageKey", page_key.as_str()));
            }

            let page: EventsPage = self.rest.get(EVENTS_PATH, &query).await?;
            out.extend(page.events);

            // The datastore signals the final page with an empty or zero key.
            match page.next_page_key {
                Some(key) if !key.is_empty() && key != "0" && key != page_key => page_key = key,
                _ => break,
            }
        }

        tracing::debug!(count = out.len(), "fetched events");
        Ok(out)
    }
}

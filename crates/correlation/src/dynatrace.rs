use crate::{rest, AttachRules, DynatraceCredentials, Error, MonitoredEntity, Timeframe};
use std::collections::BTreeMap;

/// MonitoringBackend is the monitoring tenant, as consumed by correlation and handlers.
pub trait MonitoringBackend: Send + Sync {
    /// Find entities matching `selector` which were active during `timeframe`.
    fn find_entities(
        &self,
        selector: &str,
        timeframe: &Timeframe,
    ) -> impl std::future::Future<Output = Result<Vec<MonitoredEntity>, Error>> + Send;

    /// Append `comment` to problem `pid`.
    fn add_problem_comment(
        &self,
        pid: &str,
        comment: &ProblemComment,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;

    /// Ingest `event`.
    fn send_event(
        &self,
        event: &DynatraceEvent,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;
}

impl<T: MonitoringBackend> MonitoringBackend for std::sync::Arc<T> {
    fn find_entities(
        &self,
        selector: &str,
        timeframe: &Timeframe,
    ) -> impl std::future::Future<Output = Result<Vec<MonitoredEntity>, Error>> + Send {
        T::find_entities(self, selector, timeframe)
    }

    fn add_problem_comment(
        &self,
        pid: &str,
        comment: &ProblemComment,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send {
        T::add_problem_comment(self, pid, comment)
    }

    fn send_event(
        &self,
        event: &DynatraceEvent,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send {
        T::send_event(self, event)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub enum EventType {
    #[serde(rename = "CUSTOM_DEPLOYMENT")]
    Deployment,
    #[default]
    #[serde(rename = "CUSTOM_INFO")]
    Info,
    #[serde(rename = "CUSTOM_ANNOTATION")]
    Annotation,
    #[serde(rename = "CUSTOM_CONFIGURATION")]
    Configuration,
}

/// DynatraceEvent is an event ingested by the monitoring backend.
/// Which optional fields apply depends on its `event_type`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynatraceEvent {
    pub event_type: EventType,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Start of the event, as milliseconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    /// End of the event, as milliseconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci_back_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    pub attach_rules: AttachRules,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_properties: BTreeMap<String, String>,
}

impl DynatraceEvent {
    /// Set `start` and `end` from a Timeframe.
    pub fn with_timeframe(mut self, timeframe: &Timeframe) -> Self {
        self.start = Some(timeframe.start().timestamp_millis());
        self.end = Some(timeframe.end().timestamp_millis());
        self
    }
}

/// ProblemComment is appended to an open problem.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProblemComment {
    pub message: String,
    pub context: String,
}

/// DynatraceClient talks to the REST API of a monitoring tenant.
#[derive(Clone)]
pub struct DynatraceClient {
    rest: rest::Client,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntitiesPage {
    #[serde(default)]
    entities: Vec<MonitoredEntity>,
    #[serde(default)]
    next_page_key: Option<String>,
}

const ENTITIES_PATH: &str = "api/v2/entities";
const EVENTS_PATH: &str = "api/v1/events";
const ENTITIES_PAGE_SIZE: &str = "500";

impl DynatraceClient {
    pub fn new(http_client: reqwest::Client, credentials: &DynatraceCredentials) -> Self {
        Self {
            rest: rest::Client::new(
                http_client,
                credentials.tenant(),
                "Authorization",
                format!("Api-Token {}", credentials.api_token()),
            ),
        }
    }
}

impl MonitoringBackend for DynatraceClient {
    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN))]
    async fn find_entities(
        &self,
        selector: &str,
        timeframe: &Timeframe,
    ) -> Result<Vec<MonitoredEntity>, Error> {
        let from = timeframe.start().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let to = timeframe.end().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        let mut page: EntitiesPage = self
            .rest
            .get(
                ENTITIES_PATH,
                &[
                    ("entitySelector", selector),
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                    ("fields", "+tags"),
                    ("pageSize", ENTITIES_PAGE_SIZE),
                ],
            )
            .await?;
        let mut out = std::mem::take(&mut page.entities);

        // Subsequent pages are addressed by their key alone. A repeated key ends paging.
        let mut page_key = String::new();
        while let Some(key) = page
            .next_page_key
            .take()
            .filter(|key| !key.is_empty() && *key != page_key)
        {
            page = self
                .rest
                .get(ENTITIES_PATH, &[("nextPageKey", key.as_str())])
                .await?;
            out.append(&mut page.entities);
            page_key = key;
        }

        Ok(out)
    }

    #[tracing::instrument(skip(self, comment), err(level = tracing::Level::WARN))]
    async fn add_problem_comment(&self, pid: &str, comment: &ProblemComment) -> Result<(), Error> {
        let mut url = self.rest.url("api/v2/problems/")?;
        url.path_segments_mut()
            .map_err(|()| Error::Transport {
                context: "tenant URL cannot be a base".to_string(),
                source: None,
            })?
            .pop_if_empty()
            .push(pid)
            .push("comments");

        let _: serde_json::Value = self.rest.post_url(url, comment).await?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(event_type = ?event.event_type), err(level = tracing::Level::WARN))]
    async fn send_event(&self, event: &DynatraceEvent) -> Result<(), Error> {
        let response: serde_json::Value = self.rest.post(EVENTS_PATH, event).await?;
        tracing::debug!(%response, "event ingested");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::TagFilter;

    #[test]
    fn test_event_serialization() {
        let timeframe =
            Timeframe::parse("2024-03-01T10:00:00Z", "2024-03-01T10:10:00Z").unwrap();

        let event = DynatraceEvent {
            event_type: EventType::Deployment,
            source: "Keptn dynatrace-service".to_string(),
            deployment_name: Some("Deploy carts 0.13.1 with strategy blue_green_service".to_string()),
            deployment_version: Some("0.13.1".to_string()),
            deployment_project: Some("sockshop".to_string()),
            attach_rules: AttachRules {
                entity_ids: ["PGI-1".to_string()].into(),
                tag_rule: vec![crate::TagRule {
                    me_types: vec!["SERVICE".to_string()],
                    tags: vec![TagFilter::new("keptn_service", "carts")],
                }],
            },
            custom_properties: [("Project".to_string(), "sockshop".to_string())].into(),
            ..Default::default()
        }
        .with_timeframe(&timeframe);

        insta::assert_json_snapshot!(event, @r###"
        {
          "eventType": "CUSTOM_DEPLOYMENT",
          "source": "Keptn dynatrace-service",
          "start": 1709287200000,
          "end": 1709287800000,
          "deploymentName": "Deploy carts 0.13.1 with strategy blue_green_service",
          "deploymentVersion": "0.13.1",
          "deploymentProject": "sockshop",
          "attachRules": {
            "entityIds": [
              "PGI-1"
            ],
            "tagRule": [
              {
                "meTypes": [
                  "SERVICE"
                ],
                "tags": [
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
            "Project": "sockshop"
          }
        }
        "###);
    }

    #[test]
    fn test_problem_comment_path() {
        let creds = DynatraceCredentials::new(
            "https://managed.example.com/e/env",
            &crate::testing::valid_token(),
        )
        .unwrap();
        let client = DynatraceClient::new(reqwest::Client::new(), &creds);

        let mut url = client.rest.url("api/v2/problems/").unwrap();
        url.path_segments_mut()
            .unwrap()
            .pop_if_empty()
            .push("-123_456V2")
            .push("comments");

        assert_eq!(
            url.as_str(),
            "https://managed.example.com/e/env/api/v2/problems/-123_456V2/comments"
        );
    }

    #[tokio::test]
    async fn test_entity_paging_stops_on_repeated_key() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let requests = Arc::new(AtomicUsize::new(0));
        let requests_clone = requests.clone();

        // Every page names the same next page.
        let app = axum::Router::new().route(
            "/api/v2/entities",
            axum::routing::get(move || {
                let n = requests_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    axum::Json(serde_json::json!({
                        "entities": [{"entityId": format!("SERVICE-{n}")}],
                        "nextPageKey": "page-2",
                    }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let base = url::Url::parse(&format!("http://{addr}/")).unwrap();
        let client = DynatraceClient {
            rest: rest::Client::new(
                reqwest::Client::new(),
                &base,
                "Authorization",
                format!("Api-Token {}", crate::testing::valid_token()),
            ),
        };
        let timeframe =
            Timeframe::parse("2024-03-01T10:00:00Z", "2024-03-01T10:10:00Z").unwrap();

        let entities = client
            .find_entities("type(SERVICE)", &timeframe)
            .await
            .unwrap();

        let ids: Vec<_> = entities.iter().map(|entity| entity.id.as_str()).collect();
        assert_eq!(ids, vec!["SERVICE-0", "SERVICE-1"]);
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }
}

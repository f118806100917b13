//! In-memory fakes of the service seams, for tests.

use crate::dynatrace::{DynatraceEvent, MonitoringBackend, ProblemComment};
use crate::events::{EventFilter, EventStore, KeptnEvent};
use crate::{Error, MonitoredEntity, SecretReader, Timeframe};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A token which passes credential validation.
pub fn valid_token() -> String {
    format!("dt0c01.{}.{}", "A".repeat(24), "B".repeat(64))
}

/// Build a KeptnEvent of `event_type` within `context`, at an optional RFC 3339 `time`.
pub fn event(
    event_type: &str,
    context: &str,
    time: Option<&str>,
    data: serde_json::Value,
) -> KeptnEvent {
    KeptnEvent {
        id: format!("{event_type}/{context}/{}", time.unwrap_or("untimed")),
        event_type: event_type.to_string(),
        time: time.map(|t| {
            chrono::DateTime::parse_from_rfc3339(t)
                .expect("test time must be RFC 3339")
                .with_timezone(&chrono::Utc)
        }),
        shkeptncontext: context.to_string(),
        triggeredid: None,
        data,
    }
}

/// MapSecretReader serves secrets from a map keyed on (secret, key).
#[derive(Default)]
pub struct MapSecretReader {
    values: Mutex<BTreeMap<(String, String), String>>,
}

impl MapSecretReader {
    pub fn insert(&self, secret: &str, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert((secret.to_string(), key.to_string()), value.to_string());
    }
}

impl SecretReader for MapSecretReader {
    async fn read(&self, secret: &str, key: &str) -> Result<String, Error> {
        self.values
            .lock()
            .unwrap()
            .get(&(secret.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("key {key} of secret {secret}")))
    }
}

/// FakeEventStore matches pushed events on event type and context,
/// returning them most recent (last pushed) first.
#[derive(Default)]
pub struct FakeEventStore {
    events: Mutex<Vec<KeptnEvent>>,
    failure: Mutex<Option<String>>,
    filters: Mutex<Vec<EventFilter>>,
    calls: AtomicUsize,
}

impl FakeEventStore {
    pub fn push(&self, event: KeptnEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Fail all subsequent queries with a transport error.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_filter(&self) -> Option<EventFilter> {
        self.filters.lock().unwrap().last().cloned()
    }
}

impl EventStore for FakeEventStore {
    async fn get_events(&self, filter: &EventFilter) -> Result<Vec<KeptnEvent>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.filters.lock().unwrap().push(filter.clone());

        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(Error::Transport {
                context: message,
                source: None,
            });
        }

        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|event| {
                event.event_type == filter.event_type && event.shkeptncontext == filter.context
            })
            .cloned()
            .collect())
    }
}

/// FakeBackend serves fixed entities and records everything sent to it.
#[derive(Default)]
pub struct FakeBackend {
    pub entities: Mutex<Vec<MonitoredEntity>>,
    pub entity_queries: Mutex<Vec<(String, Timeframe)>>,
    pub events: Mutex<Vec<DynatraceEvent>>,
    pub comments: Mutex<Vec<(String, ProblemComment)>>,
    failure: Mutex<Option<String>>,
}

impl FakeBackend {
    pub fn with_entities(entities: Vec<MonitoredEntity>) -> Self {
        let backend = Self::default();
        *backend.entities.lock().unwrap() = entities;
        backend
    }

    /// Fail all subsequent calls with a transport error.
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn entity_query_count(&self) -> usize {
        self.entity_queries.lock().unwrap().len()
    }

    pub fn sent_events(&self) -> Vec<DynatraceEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn sent_comments(&self) -> Vec<(String, ProblemComment)> {
        self.comments.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), Error> {
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(Error::Transport {
                context: message,
                source: None,
            }),
            None => Ok(()),
        }
    }
}

impl MonitoringBackend for FakeBackend {
    async fn find_entities(
        &self,
        selector: &str,
        timeframe: &Timeframe,
    ) -> Result<Vec<MonitoredEntity>, Error> {
        self.entity_queries
            .lock()
            .unwrap()
            .push((selector.to_string(), *timeframe));
        self.check()?;
        Ok(self.entities.lock().unwrap().clone())
    }

    async fn add_problem_comment(&self, pid: &str, comment: &ProblemComment) -> Result<(), Error> {
        self.check()?;
        self.comments
            .lock()
            .unwrap()
            .push((pid.to_string(), comment.clone()));
        Ok(())
    }

    async fn send_event(&self, event: &DynatraceEvent) -> Result<(), Error> {
        self.check()?;
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

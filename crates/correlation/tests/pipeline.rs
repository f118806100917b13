//! Drives the full resolution pipeline of a deployment against in-memory services:
//! version lookup, task timeframe, entity window, and attach-rule merging.

use correlation::{
    dynatrace::{DynatraceEvent, ProblemComment},
    events, AttachRules, CorrelationContext, Correlator, EntityWindowResolver, Error, EventFilter,
    EventStore, KeptnEvent, MonitoredEntity, MonitoringBackend, TagFilter, TagRule, Timeframe,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Store(Vec<KeptnEvent>);

impl EventStore for Store {
    async fn get_events(&self, filter: &EventFilter) -> Result<Vec<KeptnEvent>, Error> {
        Ok(self
            .0
            .iter()
            .filter(|e| e.event_type == filter.event_type && e.shkeptncontext == filter.context)
            .cloned()
            .collect())
    }
}

struct Backend {
    entities: Vec<MonitoredEntity>,
    queries: AtomicUsize,
}

impl MonitoringBackend for Backend {
    async fn find_entities(
        &self,
        _selector: &str,
        _timeframe: &Timeframe,
    ) -> Result<Vec<MonitoredEntity>, Error> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.entities.clone())
    }

    async fn add_problem_comment(&self, _pid: &str, _comment: &ProblemComment) -> Result<(), Error> {
        unreachable!("not used by this test")
    }

    async fn send_event(&self, _event: &DynatraceEvent) -> Result<(), Error> {
        unreachable!("not used by this test")
    }
}

fn event(event_type: &str, time: &str, data: serde_json::Value) -> KeptnEvent {
    serde_json::from_value(json!({
        "id": format!("{event_type}@{time}"),
        "type": event_type,
        "time": time,
        "shkeptncontext": "ctx-1",
        "data": data,
    }))
    .unwrap()
}

fn ctx() -> CorrelationContext {
    CorrelationContext {
        project: "sockshop".to_string(),
        stage: "production".to_string(),
        service: "carts".to_string(),
        shkeptncontext: "ctx-1".to_string(),
        ..Default::default()
    }
}

fn entity(id: &str) -> MonitoredEntity {
    serde_json::from_value(json!({"entityId": id})).unwrap()
}

async fn resolve(store: &Store, backend: &Backend, custom: Option<AttachRules>) -> AttachRules {
    let correlator = Correlator::new(store);
    let image_and_tag = correlator.get_image_and_tag(&ctx()).await;

    let entities = match correlator.find_task_timeframe(&ctx(), "deployment").await {
        Ok(timeframe) => EntityWindowResolver::new(backend)
            .find_entities(&timeframe, &image_and_tag)
            .await
            .unwrap(),
        Err(_) => Vec::new(),
    };

    AttachRules::merge(&entities, custom, &ctx())
}

#[tokio::test]
async fn test_versioned_deployment_attaches_to_discovered_entities() {
    let store = Store(vec![
        event(
            events::DEPLOYMENT_TRIGGERED,
            "2024-03-01T10:00:00Z",
            json!({"configurationChange": {"values": {"image": "docker.io/keptn/carts:0.13.1"}}}),
        ),
        event(
            "sh.keptn.event.deployment.finished",
            "2024-03-01T10:04:00Z",
            json!({}),
        ),
    ]);
    let backend = Backend {
        entities: vec![entity("PGI-1"), entity("PGI-2")],
        queries: AtomicUsize::new(0),
    };

    let rules = resolve(&store, &backend, None).await;
    assert_eq!(
        rules.entity_ids.into_iter().collect::<Vec<_>>(),
        vec!["PGI-1".to_string(), "PGI-2".to_string()]
    );
    assert_eq!(backend.queries.load(Ordering::SeqCst), 1);

    let custom = AttachRules {
        tag_rule: vec![TagRule {
            me_types: vec!["SERVICE".to_string()],
            tags: vec![TagFilter::new("team", "carts")],
        }],
        ..Default::default()
    };
    let rules = resolve(&store, &backend, Some(custom.clone())).await;
    assert_eq!(rules.tag_rule, custom.tag_rule);
    assert_eq!(rules.entity_ids.len(), 2);
}

#[tokio::test]
async fn test_unversioned_deployment_falls_back_without_querying() {
    let store = Store(vec![
        event(
            events::DEPLOYMENT_TRIGGERED,
            "2024-03-01T10:00:00Z",
            json!({"configurationChange": {"values": {"replicas": 2}}}),
        ),
        event(
            "sh.keptn.event.deployment.finished",
            "2024-03-01T10:04:00Z",
            json!({}),
        ),
    ]);
    let backend = Backend {
        entities: vec![entity("PGI-1")],
        queries: AtomicUsize::new(0),
    };

    let rules = resolve(&store, &backend, None).await;
    assert_eq!(rules, AttachRules::default_for(&ctx()));
    assert_eq!(backend.queries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_problem_lookup_falls_back_to_store() {
    let store = Store(vec![event(
        events::PROBLEM_OPEN,
        "2024-03-01T09:00:00Z",
        json!({"PID": "456"}),
    )]);

    let pid = Correlator::new(&store).find_problem_id(&ctx()).await.unwrap();
    assert_eq!(pid, "456");
}

use anyhow::Context;
use correlation::{CorrelationContext, KeptnEvent};
use std::collections::BTreeMap;

/// Fields common to the data of every lifecycle event.
#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub service: String,
    // Producers send `null` for absent labels.
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub message: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + serde::Deserialize<'de>,
{
    let value: Option<T> = serde::Deserialize::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

/// Decode the data of `event` into `T`.
pub fn decode<T: serde::de::DeserializeOwned>(event: &KeptnEvent) -> anyhow::Result<T> {
    T::deserialize(&event.data)
        .with_context(|| format!("decoding data of {} event {}", event.event_type, event.id))
}

/// Build the CorrelationContext of an inbound `event`.
pub fn correlation_context(event: &KeptnEvent) -> anyhow::Result<CorrelationContext> {
    let EventData {
        project,
        stage,
        service,
        labels,
        ..
    } = decode(event)?;

    if project.is_empty() {
        anyhow::bail!("{} event {} has no project", event.event_type, event.id);
    }

    Ok(CorrelationContext {
        project,
        stage,
        service,
        shkeptncontext: event.shkeptncontext.clone(),
        labels,
    })
}

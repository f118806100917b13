use crate::dynatrace::MonitoringBackend;
use crate::{Error, ImageAndTag, Timeframe};

/// MonitoredEntity is an entity known to the monitoring backend.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredEntity {
    #[serde(rename = "entityId")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<EntityTag>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct EntityTag {
    #[serde(default)]
    pub context: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Entity type of deployed process instances.
pub const PROCESS_GROUP_INSTANCE: &str = "PROCESS_GROUP_INSTANCE";

/// Entity selector matching process instances which release version `tag`.
pub fn version_selector(tag: &str) -> String {
    format!(
        "type(\"{PROCESS_GROUP_INSTANCE}\"),releasesVersion(\"{}\")",
        escape_selector_value(tag)
    )
}

// Quoted selector values escape '~' and '"' with a leading '~'.
fn escape_selector_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '~' || c == '"' {
            out.push('~');
        }
        out.push(c);
    }
    out
}

/// EntityWindowResolver finds the entities running a deployed version
/// within a Timeframe.
pub struct EntityWindowResolver<'b, B> {
    backend: &'b B,
}

impl<'b, B: MonitoringBackend> EntityWindowResolver<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self { backend }
    }

    /// Find entities which ran `image_and_tag` during `timeframe`.
    ///
    /// An unversioned deployment has no meaningful window, so the backend is
    /// not queried at all if the tag is unavailable. No entities is not an error.
    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN))]
    pub async fn find_entities(
        &self,
        timeframe: &Timeframe,
        image_and_tag: &ImageAndTag,
    ) -> Result<Vec<MonitoredEntity>, Error> {
        if !image_and_tag.has_tag() {
            tracing::debug!("no version tag available, skipping entity query");
            return Ok(Vec::new());
        }

        let entities = self
            .backend
            .find_entities(&version_selector(&image_and_tag.tag), timeframe)
            .await?;

        tracing::debug!(count = entities.len(), "found entities");
        Ok(entities)
    }
}

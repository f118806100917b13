use crate::{CorrelationContext, MonitoredEntity};
use std::collections::BTreeSet;

/// Entity type to which default rules attach.
pub const SERVICE_ENTITY_TYPE: &str = "SERVICE";
/// Tag context of user-defined tags.
pub const CONTEXTLESS: &str = "CONTEXTLESS";

/// AttachRules scope an outbound monitoring event to the entities it concerns.
/// Rules either come from user configuration, or are derived from discovered
/// entities or the correlation context.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRules {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub entity_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_rule: Vec<TagRule>,
}

/// TagRule matches entities of `me_types` which carry all of `tags`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRule {
    #[serde(default)]
    pub me_types: Vec<String>,
    #[serde(default)]
    pub tags: Vec<TagFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct TagFilter {
    #[serde(default = "contextless")]
    pub context: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

fn contextless() -> String {
    CONTEXTLESS.to_string()
}

impl TagFilter {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            context: contextless(),
            key: key.to_string(),
            value: Some(value.to_string()),
        }
    }
}

impl AttachRules {
    /// Rules attaching to services tagged with the context's project, stage and service.
    pub fn default_for(ctx: &CorrelationContext) -> Self {
        Self {
            entity_ids: BTreeSet::new(),
            tag_rule: vec![TagRule {
                me_types: vec![SERVICE_ENTITY_TYPE.to_string()],
                tags: vec![
                    TagFilter::new("keptn_project", &ctx.project),
                    TagFilter::new("keptn_stage", &ctx.stage),
                    TagFilter::new("keptn_service", &ctx.service),
                ],
            }],
        }
    }

    /// Merge `discovered` entities with optional `custom` rules into the
    /// single set of rules of an outbound call:
    ///
    /// - custom rules and no entities: the custom rules, unmodified.
    /// - custom rules and entities: the custom rules, extended with the entity IDs.
    /// - only entities: rules naming exactly the entity IDs.
    /// - neither: the default rules of `ctx`.
    ///
    /// The default rules aren't fixed: they're scoped by `default_for` to
    /// services tagged with the project, stage and service of `ctx`.
    ///
    /// Discovered entities augment but never replace explicit user rules.
    pub fn merge(
        discovered: &[MonitoredEntity],
        custom: Option<AttachRules>,
        ctx: &CorrelationContext,
    ) -> AttachRules {
        let ids = discovered.iter().map(|entity| entity.id.clone());

        match custom {
            Some(custom) if discovered.is_empty() => custom,
            Some(mut custom) => {
                custom.entity_ids.extend(ids);
                custom
            }
            None if discovered.is_empty() => Self::default_for(ctx),
            None => AttachRules {
                entity_ids: ids.collect(),
                tag_rule: Vec::new(),
            },
        }
    }
}

use crate::cloudevent::decode;
use crate::handlers::Handler;
use correlation::KeptnEvent;
use std::collections::BTreeMap;

/// Constructor of a Handler from its inbound event.
pub type Constructor = fn(&KeptnEvent) -> anyhow::Result<Handler>;

/// Registry maps the types of inbound events to constructors of their Handler.
pub struct Registry {
    constructors: BTreeMap<&'static str, Constructor>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A Registry of every event type which the bridge handles.
    pub fn new() -> Self {
        let entries: [(&'static str, Constructor); 8] = [
            ("sh.keptn.event.deployment.finished", |e| {
                decode(e).map(Handler::DeploymentFinished)
            }),
            ("sh.keptn.event.test.triggered", |e| {
                decode(e).map(Handler::TestTriggered)
            }),
            ("sh.keptn.event.test.finished", |e| {
                decode(e).map(Handler::TestFinished)
            }),
            ("sh.keptn.event.evaluation.finished", |e| {
                decode(e).map(Handler::EvaluationFinished)
            }),
            ("sh.keptn.event.release.triggered", |e| {
                decode(e).map(Handler::ReleaseTriggered)
            }),
            ("sh.keptn.event.action.triggered", |e| {
                decode(e).map(Handler::ActionTriggered)
            }),
            ("sh.keptn.event.action.started", |e| {
                decode(e).map(Handler::ActionStarted)
            }),
            ("sh.keptn.event.action.finished", |e| {
                decode(e).map(Handler::ActionFinished)
            }),
        ];

        Self {
            constructors: entries.into_iter().collect(),
        }
    }

    /// Construct the Handler of `event`, or None if its type isn't handled.
    pub fn construct(&self, event: &KeptnEvent) -> Option<anyhow::Result<Handler>> {
        self.constructors
            .get(event.event_type.as_str())
            .map(|constructor| constructor(event))
    }

    /// Event types which are handled.
    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }
}

//! Correlation of orchestrator lifecycle events with a monitoring backend.
//!
//! Given the context of an inbound lifecycle event, this crate resolves the
//! credentials to use, recovers the monitoring problem and deployed version
//! the context correlates with, finds the monitored entities of a deployment
//! window, and merges them with user rules into the attach rules of an
//! outbound monitoring event.

mod error;
pub use error::{BoxError, Error};

pub mod attach;
pub mod bridge_url;
pub mod correlator;
pub mod credentials;
pub mod dynatrace;
pub mod entities;
pub mod events;
pub mod fallback;
pub mod problem_url;
pub mod rest;
pub mod timeframe;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use attach::{AttachRules, TagFilter, TagRule};
pub use bridge_url::BridgeUrlCreator;
pub use correlator::{CorrelationContext, Correlator, ImageAndTag};
pub use credentials::{
    CredentialResolver, DynatraceCredentials, EnvReader, KeptnCredentials,
    KubernetesSecretReader, SecretReader,
};
pub use dynatrace::{DynatraceClient, DynatraceEvent, MonitoringBackend, ProblemComment};
pub use entities::{EntityWindowResolver, MonitoredEntity};
pub use events::{DatastoreClient, EventFilter, EventStore, KeptnEvent};
pub use fallback::first_success;
pub use timeframe::Timeframe;

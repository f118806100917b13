use crate::Error;

/// Walk an ordered list of `candidates`, invoking `lookup` for each until one
/// succeeds, and return that first success.
///
/// Failed candidates are logged and skipped regardless of why they failed.
/// If every candidate fails, the result is a single `Error::NotFound` naming
/// `what` and every candidate which was attempted, in order.
///
/// Credentials, the orchestrator's API endpoint and the bridge URL are all
/// resolved through this one routine, each with its own candidate list.
pub async fn first_success<C, T, F, Fut>(
    what: &str,
    candidates: impl IntoIterator<Item = C>,
    mut lookup: F,
) -> Result<T, Error>
where
    C: std::fmt::Display,
    F: FnMut(C) -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut tried = Vec::new();

    for candidate in candidates {
        let label = candidate.to_string();

        match lookup(candidate).await {
            Ok(found) => {
                tracing::info!(what, candidate = %label, "resolved from candidate");
                return Ok(found);
            }
            Err(err) => {
                tracing::debug!(what, candidate = %label, %err, "candidate failed");
                tried.push(label);
            }
        }
    }

    Err(Error::NotFound {
        what: what.to_string(),
        tried,
    })
}

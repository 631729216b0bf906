//! Applying the failure policy to store results.

use crate::config::FailurePolicy;
use crate::gate::decision::BlockCode;
use crate::observability::metrics;
use crate::store::StoreResult;

/// Resolve a store result under `policy`.
///
/// `Ok(Some(v))` on success. On error, fail-open yields `Ok(None)` ("no
/// signal") and fail-closed yields the 503 block code.
pub(crate) fn tolerate<T>(
    policy: FailurePolicy,
    op: &'static str,
    result: StoreResult<T>,
) -> Result<Option<T>, BlockCode> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            metrics::record_store_degraded(op);
            match policy {
                FailurePolicy::Open => {
                    tracing::warn!(op, error = %e, "Store failure, continuing without signal");
                    Ok(None)
                }
                FailurePolicy::Closed => {
                    tracing::error!(op, error = %e, "Store failure, rejecting request");
                    Err(BlockCode::ServiceUnavailable)
                }
            }
        }
    }
}

use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

/// Fails with `Overlap` if an approved request other than `exclude`
/// shares time with `span`. Callers hold the place write lock.
pub(crate) fn check_no_overlap(
    ps: &PlaceState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match ps.approved_conflict(span, exclude) {
        Some(existing) => Err(EngineError::Overlap {
            span: *span,
            conflicting: existing.id,
        }),
        None => Ok(()),
    }
}

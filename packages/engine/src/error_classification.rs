use crate::errors::ErrorCode;
use crate::LightningError;

pub(crate) fn is_transient_database_error(err: &LightningError) -> bool {
    if err.matches_code(ErrorCode::TransientDatabase) {
        return true;
    }
    let lower = err.description.to_lowercase();
    lower.contains("deadlock")
        || lower.contains("lock wait timeout")
        || lower.contains("try restarting transaction")
        || lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("broken pipe")
        || lower.contains("server has gone away")
}

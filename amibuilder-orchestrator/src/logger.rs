use std::time::Instant;

use uuid::Uuid;

/// Action logger for provider-facing steps. Every action gets its own id so
/// begin and completion lines can be joined when reading the logs.
pub fn log_event(action_type: &str, status: &str, subject: &str, error_message: Option<&str>) -> Uuid {
    log_event_with_metadata(action_type, status, subject, error_message, None)
}

/// Log event with metadata (context info)
pub fn log_event_with_metadata(
    action_type: &str,
    status: &str,
    subject: &str,
    error_message: Option<&str>,
    metadata: Option<serde_json::Value>,
) -> Uuid {
    let log_id = Uuid::new_v4();
    let metadata = metadata.unwrap_or(serde_json::Value::Null);
    match error_message {
        Some(err) => tracing::warn!(
            %log_id,
            action = action_type,
            status,
            subject,
            error = err,
            %metadata,
            "📝 [orchestrator] {} - {}",
            action_type,
            status
        ),
        None => tracing::info!(
            %log_id,
            action = action_type,
            status,
            subject,
            %metadata,
            "📝 [orchestrator] {} - {}",
            action_type,
            status
        ),
    }
    log_id
}

/// Log event completion with duration
pub fn log_event_complete(log_id: Uuid, action_type: &str, status: &str, duration_ms: u128, error_message: Option<&str>) {
    match error_message {
        Some(err) => tracing::warn!(
            %log_id,
            action = action_type,
            status,
            duration_ms = duration_ms as u64,
            error = err,
            "📝 [orchestrator] {} completed: {} ({} ms)",
            action_type,
            status,
            duration_ms
        ),
        None => tracing::info!(
            %log_id,
            action = action_type,
            status,
            duration_ms = duration_ms as u64,
            "📝 [orchestrator] {} completed: {} ({} ms)",
            action_type,
            status,
            duration_ms
        ),
    }
}

/// Quick log for one-off events (like state transitions)
pub fn log_quick(action_type: &str, subject: &str, details: Option<&str>) {
    let details = details.unwrap_or("");
    tracing::info!(action = action_type, subject, details, "📝 [orchestrator] {}", action_type);
}

/// Begin/complete pair around one action.
pub struct ActionTimer {
    log_id: Uuid,
    action_type: &'static str,
    started: Instant,
}

impl ActionTimer {
    pub fn start(action_type: &'static str, subject: &str, metadata: Option<serde_json::Value>) -> Self {
        let log_id = log_event_with_metadata(action_type, "in_progress", subject, None, metadata);
        Self {
            log_id,
            action_type,
            started: Instant::now(),
        }
    }

    pub fn log_id(&self) -> Uuid {
        self.log_id
    }

    pub fn success(self) {
        let ms = self.started.elapsed().as_millis();
        log_event_complete(self.log_id, self.action_type, "success", ms, None);
    }

    pub fn failure(self, error: &dyn std::fmt::Display) {
        let ms = self.started.elapsed().as_millis();
        let msg = error.to_string();
        log_event_complete(self.log_id, self.action_type, "failed", ms, Some(&msg));
    }

    /// Complete according to `result`, passing it through untouched.
    pub fn finish<T, E: std::fmt::Display>(self, result: Result<T, E>) -> Result<T, E> {
        match &result {
            Ok(_) => self.success(),
            Err(e) => self.failure(e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_ids_are_unique() {
        let a = ActionTimer::start("PROVISION_ROLE", "run", None);
        let b = ActionTimer::start("PROVISION_ROLE", "run", Some(serde_json::json!({"role": "r"})));
        assert_ne!(a.log_id(), b.log_id());
        let passed: Result<u8, String> = b.finish(Err("boom".to_string()));
        assert!(passed.is_err());
        a.success();
    }
}

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::ApiError;

/// Per-operation loading flags and last errors, keyed by operation key.
///
/// Keys are added as operations run and never removed.
#[derive(Debug, Default)]
pub struct OperationState {
    loading: Mutex<HashMap<String, bool>>,
    errors: Mutex<HashMap<String, Option<ApiError>>>,
}

impl OperationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` loading and clear its error. The flag drops back to
    /// `false` when the returned guard goes out of scope, on every path.
    pub fn begin(&self, key: &str) -> LoadingGuard<'_> {
        self.set_loading(key, true);
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), None);
        LoadingGuard {
            state: self,
            key: key.to_string(),
        }
    }

    fn set_loading(&self, key: &str, value: bool) {
        self.loading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
    }

    pub fn set_error(&self, key: &str, error: ApiError) {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), Some(error));
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.loading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(false)
    }

    pub fn error(&self, key: &str) -> Option<ApiError> {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .flatten()
    }

    pub fn any_loading(&self) -> bool {
        self.loading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|v| *v)
    }

    pub fn loading_snapshot(&self) -> HashMap<String, bool> {
        self.loading.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn errors_snapshot(&self) -> HashMap<String, Option<ApiError>> {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

pub struct LoadingGuard<'a> {
    state: &'a OperationState,
    key: String,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.set_loading(&self.key, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn guard_sets_and_clears_loading() {
        let state = OperationState::new();
        {
            let _guard = state.begin("fetchAnomalies");
            assert!(state.is_loading("fetchAnomalies"));
            assert!(state.any_loading());
        }
        assert!(!state.is_loading("fetchAnomalies"));
        assert!(!state.any_loading());
    }

    #[test]
    fn begin_clears_previous_error() {
        let state = OperationState::new();
        state.set_error("stats_week", ApiError::new(500, "boom", Value::Null));
        assert_eq!(state.error("stats_week").unwrap().status, 500);
        let _guard = state.begin("stats_week");
        assert!(state.error("stats_week").is_none());
    }

    #[test]
    fn keys_are_independent_and_never_pruned() {
        let state = OperationState::new();
        drop(state.begin("fetchAnomaly_A1"));
        state.set_error("fetchAnomaly_A2", ApiError::new(404, "missing", Value::Null));
        drop(state.begin("fetchAnomaly_A3"));

        let loading = state.loading_snapshot();
        assert_eq!(loading.len(), 2);
        assert!(state.error("fetchAnomaly_A1").is_none());
        assert_eq!(state.error("fetchAnomaly_A2").unwrap().status, 404);
        assert_eq!(state.errors_snapshot().len(), 3);
    }

    #[test]
    fn guard_releases_on_panic() {
        let state = OperationState::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = state.begin("export_R1_pdf");
            panic!("renderer exploded");
        }));
        assert!(result.is_err());
        assert!(!state.is_loading("export_R1_pdf"));
    }

    #[test]
    fn unknown_key_is_idle() {
        let state = OperationState::new();
        assert!(!state.is_loading("never"));
        assert!(state.error("never").is_none());
    }
}

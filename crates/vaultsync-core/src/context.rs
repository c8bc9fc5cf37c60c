//! Per-request context threaded through every adapter and orchestration call

use serde::Serialize;
use uuid::Uuid;

/// Who triggered the current operation and through which API.
///
/// Passed explicitly into every call and recorded on tracing spans; there
/// is no ambient per-thread state.
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    pub user: String,
    pub api_url: String,
    pub request_id: Uuid,
}

impl RequestContext {
    pub fn new(user: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            api_url: api_url.into(),
            request_id: Uuid::now_v7(),
        }
    }

    /// Context for internal callers with no end user attached.
    pub fn system(api_url: impl Into<String>) -> Self {
        Self::new("system", api_url)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::system("")
    }
}

//! Logging utilities with request context support.
//!
//! Request ids and the classified initiator live in task-local storage so
//! every log line emitted while serving a request can carry them without
//! threading them through each function.

tokio::task_local! {
    /// Task-local storage for the current request ID.
    pub static REQUEST_ID: String;
}

tokio::task_local! {
    /// Task-local storage for the initiator (`agent` or `user`) of the current request.
    pub static INITIATOR: String;
}

/// Get the current request ID from context, if set.
///
/// Returns an empty string if no request ID is set.
pub fn get_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default()
}

/// Get the current initiator from context.
///
/// Returns "unknown" outside of a request scope.
pub fn get_initiator() -> String {
    INITIATOR
        .try_with(|initiator| initiator.clone())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Generate a new unique request ID using UUID v4.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Execute an async block with request context (request_id and optionally initiator).
///
/// # Example
///
/// ```ignore
/// with_request_context!(request_id, initiator, async {
///     // handler logic here
/// })
/// ```
#[macro_export]
macro_rules! with_request_context {
    ($request_id:expr, $initiator:expr, $body:expr) => {
        $crate::core::logging::REQUEST_ID
            .scope($request_id, async {
                $crate::core::logging::INITIATOR.scope($initiator, $body).await
            })
            .await
    };
    ($request_id:expr, $body:expr) => {
        $crate::core::logging::REQUEST_ID.scope($request_id, $body).await
    };
}

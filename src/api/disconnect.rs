use crate::core::cancel::CancelToken;
use crate::core::logging::{get_initiator, get_request_id};
use crate::core::metrics::get_metrics;
use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A stream wrapper that fires a [`CancelToken`] when dropped.
///
/// axum drops the response body when the client goes away, so a drop before
/// the producer marked the token completed is a disconnect. Disconnects are
/// logged and counted per initiator.
pub struct DisconnectStream<S> {
    stream: S,
    cancel: CancelToken,
    /// Captured at construction; drop runs outside the request's task-local scope
    request_id: String,
    initiator: String,
}

impl<S> DisconnectStream<S> {
    pub fn new(stream: S, cancel: CancelToken) -> Self {
        Self {
            stream,
            cancel,
            request_id: get_request_id(),
            initiator: get_initiator(),
        }
    }
}

impl<S, E> Stream for DisconnectStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

impl<S> Drop for DisconnectStream<S> {
    fn drop(&mut self) {
        if !self.cancel.is_completed() {
            tracing::info!(
                request_id = %self.request_id,
                initiator = %self.initiator,
                "Client disconnected before the stream completed"
            );
            get_metrics()
                .client_disconnects
                .with_label_values(&[self.initiator.as_str()])
                .inc();
        }
        self.cancel.cancel();
    }
}

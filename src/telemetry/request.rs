//! Fulfillment span helpers.
//!
//! One span per request flowing through a worker, from claim to terminal
//! state.

use crate::model::Request;
use tracing::Span;

/// Start a span covering the fulfillment of one claimed request.
///
/// The `request.outcome` field is declared empty and filled in via
/// [`record_outcome`] once the request reaches a terminal state.
pub fn start_fulfill_span(request: &Request) -> Span {
    tracing::info_span!(
        "request.fulfill",
        "request.id" = %request.id,
        "request.kind" = %request.kind,
        "request.content_ref" = %request.content_ref,
        "request.outcome" = tracing::field::Empty,
    )
}

/// Record the terminal outcome on the fulfillment span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("request.outcome", outcome);
}

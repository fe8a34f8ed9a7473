//! Streaming pump: one task per client request, driving
//! `Adapter::transform_stream` over the upstream SSE body and yielding
//! fully-framed canonical SSE events.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::Event;
use eventsource_stream::Eventsource as _;
use futures::{Stream, StreamExt as _};

use crate::{
    adapter::Adapter,
    messages::anthropic::{ErrorEnvelope, StopReason, StreamEvent, Usage},
    stream_state::StreamState,
};

fn to_axum_event(event: &StreamEvent) -> Event {
    let name = match event {
        StreamEvent::MessageStart { .. } => "message_start",
        StreamEvent::ContentBlockStart { .. } => "content_block_start",
        StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        StreamEvent::ContentBlockStop { .. } => "content_block_stop",
        StreamEvent::MessageDelta { .. } => "message_delta",
        StreamEvent::MessageStop => "message_stop",
        StreamEvent::Ping => "ping",
        StreamEvent::Error { .. } => "error",
    };
    Event::default().event(name).json_data(event).unwrap_or_else(|_| Event::default().event("error"))
}

/// Drive one upstream response to completion, yielding ready-to-write SSE
/// events. Idle gaps between upstream chunks longer than `idle_timeout`
/// terminate the stream with a best-effort `message_stop`.
pub fn pump(
    adapter: Arc<dyn Adapter>,
    upstream: reqwest::Response,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let mut state = StreamState::new();
        let mut events = upstream.bytes_stream().eventsource();

        loop {
            let next = tokio::time::timeout(idle_timeout, events.next()).await;

            let item = match next {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => {
                    for event in terminate_on_timeout(&mut state) {
                        yield Ok(to_axum_event(&event));
                    }
                    return;
                }
            };

            let raw = match item {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("upstream stream read error: {e}");
                    yield Ok(to_axum_event(&terminal_error("upstream connection closed unexpectedly")));
                    return;
                }
            };

            for event in adapter.transform_stream(&raw.event, &raw.data, &mut state) {
                yield Ok(to_axum_event(&event));
            }

            if state.finish_sent {
                return;
            }
        }

        if state.message_start_sent && !state.finish_sent {
            for event in crate::adapter::finish_stream(&mut state, StopReason::EndTurn, Usage::default()) {
                yield Ok(to_axum_event(&event));
            }
        }
    }
}

fn terminal_error(message: &str) -> StreamEvent {
    StreamEvent::Error {
        error: ErrorEnvelope::new("api_error", message).error,
    }
}

fn terminate_on_timeout(state: &mut StreamState) -> Vec<StreamEvent> {
    if state.message_start_sent && !state.finish_sent {
        crate::adapter::finish_stream(state, StopReason::EndTurn, Usage::default())
    } else {
        vec![terminal_error("timed out waiting for upstream")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timeout_after_message_start_emits_best_effort_stop() {
        let mut state = StreamState::new();
        state.message_start_sent = true;
        state.text_block_index();
        state.content_blocks.get_mut(&0).unwrap().start_sent = true;

        let events = terminate_on_timeout(&mut state);

        assert!(matches!(events[0], StreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(events[1], StreamEvent::MessageDelta { .. }));
        assert!(matches!(events[2], StreamEvent::MessageStop));
        assert!(state.finish_sent);
    }

    #[test]
    fn idle_timeout_before_message_start_emits_error_event() {
        let mut state = StreamState::new();
        let events = terminate_on_timeout(&mut state);
        assert!(matches!(&events[..], [StreamEvent::Error { .. }]));
    }
}

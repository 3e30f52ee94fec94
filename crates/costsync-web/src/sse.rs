//! Server-Sent Events for service status

use axum::response::sse::{Event, KeepAlive, Sse};
use costsync_core::{DataEvent, EventBus};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

/// Event name and JSON body of one bus event
pub fn encode_event(event: &DataEvent) -> (&'static str, serde_json::Value) {
    match event {
        DataEvent::ProducerStatusChanged(connected) => {
            ("producer_status", json!({ "connected": connected }))
        }
        DataEvent::StoreStatusChanged(connected) => {
            ("store_status", json!({ "connected": connected }))
        }
        DataEvent::ProjectUpdated(update) => (
            "project_updated",
            json!({
                "projectName": update.project_name,
                "projectId": update.project_id,
                "elementCount": update.element_count,
                "totalCost": update.total_cost,
            }),
        ),
        DataEvent::ProjectDataDeleted(name) => {
            ("project_data_deleted", json!({ "projectName": name }))
        }
    }
}

/// Create an SSE stream from the event bus
/// Takes EventBus by value (cheap clone, Arc internally)
pub fn create_sse_stream(
    event_bus: EventBus,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = event_bus.subscribe();
    let stream = BroadcastStream::new(rx);

    let sse_stream = stream.filter_map(|result: Result<DataEvent, _>| {
        result.ok().map(|event: DataEvent| {
            let (event_type, data) = encode_event(&event);
            Ok(Event::default().event(event_type).data(data.to_string()))
        })
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_deleted_event() {
        let (name, data) = encode_event(&DataEvent::ProjectDataDeleted("Tower A".into()));
        assert_eq!(name, "project_data_deleted");
        assert_eq!(data["projectName"], "Tower A");
    }
}

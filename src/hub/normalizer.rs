use crate::core::errors::IngestError;
use crate::core::types::{EntityState, StateChange};
use crate::hub::types::{WireEntityState, WireEvent};
use chrono::{DateTime, Utc};

/// Convert a raw event payload into the canonical record.
///
/// Required fields: entity id and a new-state value. A frame missing
/// either is rejected as malformed; the caller drops and counts it without
/// touching the session.
pub fn normalize(
    connection_id: &str,
    event: WireEvent,
    received_at: DateTime<Utc>,
) -> Result<StateChange, IngestError> {
    let entity_id = event
        .data
        .entity_id
        .or_else(|| {
            event
                .data
                .new_state
                .as_ref()
                .and_then(|state| state.entity_id.clone())
        })
        .ok_or_else(|| IngestError::MalformedEvent("missing entity_id".to_string()))?;

    let new_state = event
        .data
        .new_state
        .ok_or_else(|| IngestError::MalformedEvent("missing new_state".to_string()))?;

    let new_state = convert_state(new_state)
        .ok_or_else(|| IngestError::MalformedEvent("new_state missing state value".to_string()))?;

    Ok(StateChange {
        event_type: event.event_type,
        entity_id,
        old_state: event.data.old_state.and_then(convert_state),
        new_state,
        time_fired: event.time_fired,
        received_at,
        connection_id: connection_id.to_string(),
    })
}

fn convert_state(wire: WireEntityState) -> Option<EntityState> {
    Some(EntityState {
        value: wire.state?,
        attributes: wire.attributes,
        last_changed: wire.last_changed,
        last_updated: wire.last_updated,
    })
}

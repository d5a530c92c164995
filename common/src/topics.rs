pub const TOPIC_BACKEND_STATE_WILDCARD: &str = "room_hvac/backend/+/state";

pub const TOPIC_CONTROLLER_STATE: &str = "room_hvac/controller/state";
pub const TOPIC_CONTROLLER_STATUS: &str = "room_hvac/controller/status";

pub const TOPIC_CMD_MODE: &str = "room_hvac/cmnd/mode";
pub const TOPIC_CMD_TARGET: &str = "room_hvac/cmnd/target";
pub const TOPIC_CMD_PRESET: &str = "room_hvac/cmnd/preset";

const BACKEND_PREFIX: &str = "room_hvac/backend/";

pub fn backend_state_topic(backend_id: &str) -> String {
    format!("{BACKEND_PREFIX}{backend_id}/state")
}

pub fn backend_command_topic(backend_id: &str) -> String {
    format!("{BACKEND_PREFIX}{backend_id}/set")
}

/// Backend id of a `room_hvac/backend/{id}/state` topic.
pub fn backend_id_from_state_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(BACKEND_PREFIX)?
        .strip_suffix("/state")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

/// Backend id of a `room_hvac/backend/{id}/set` topic.
pub fn backend_id_from_command_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(BACKEND_PREFIX)?
        .strip_suffix("/set")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

/// Counter for rebalance events handled by a group session (label: event_type = assign/revoke/error)
pub const REBALANCE_EVENTS_COUNTER: &str = "kafka_client_rebalance_events_total";

/// Counter for synchronous offset commits (label: outcome = success/failure)
pub const OFFSET_COMMITS_COUNTER: &str = "kafka_client_offset_commits_total";

/// Counter for produced messages (label: outcome = delivered/too_large/failed)
pub const MESSAGE_DELIVERIES_COUNTER: &str = "kafka_client_message_deliveries_total";

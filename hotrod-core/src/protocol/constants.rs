//! Protocol constants for the Hot Rod binary protocol.

/// Magic byte opening every request.
pub const REQUEST_MAGIC: u8 = 0xA0;

/// Magic byte opening every response and event.
pub const RESPONSE_MAGIC: u8 = 0xA1;

/// Protocol version 3.0.
pub const VERSION_30: u8 = 30;

/// Protocol version 3.1, which adds bloom filter near-cache listeners.
pub const VERSION_31: u8 = 31;

// Request opcodes. The matching response opcode is always `request + 1`.

/// Put a value.
pub const PUT_REQUEST: u8 = 0x01;
/// Get a value.
pub const GET_REQUEST: u8 = 0x03;
/// Put a value only when the key is absent.
pub const PUT_IF_ABSENT_REQUEST: u8 = 0x05;
/// Replace a value only when the key is present.
pub const REPLACE_REQUEST: u8 = 0x07;
/// Replace a value only when its version matches.
pub const REPLACE_IF_UNMODIFIED_REQUEST: u8 = 0x09;
/// Remove a key.
pub const REMOVE_REQUEST: u8 = 0x0B;
/// Remove a key only when its version matches.
pub const REMOVE_IF_UNMODIFIED_REQUEST: u8 = 0x0D;
/// Check for key presence.
pub const CONTAINS_KEY_REQUEST: u8 = 0x0F;
/// Clear the cache.
pub const CLEAR_REQUEST: u8 = 0x13;
/// Server statistics.
pub const STATS_REQUEST: u8 = 0x15;
/// Liveness and capability check.
pub const PING_REQUEST: u8 = 0x17;
/// Get a value with its version and expiration metadata.
pub const GET_WITH_METADATA_REQUEST: u8 = 0x1B;
/// Stream all keys.
pub const BULK_GET_KEYS_REQUEST: u8 = 0x1D;
/// List the SASL mechanisms the server accepts.
pub const AUTH_MECH_LIST_REQUEST: u8 = 0x21;
/// One SASL exchange step.
pub const AUTH_REQUEST: u8 = 0x23;
/// Register a listener.
pub const ADD_CLIENT_LISTENER_REQUEST: u8 = 0x25;
/// Deregister a listener.
pub const REMOVE_CLIENT_LISTENER_REQUEST: u8 = 0x27;
/// Number of entries.
pub const SIZE_REQUEST: u8 = 0x29;
/// Execute a server-side task.
pub const EXEC_REQUEST: u8 = 0x2B;
/// Put several entries.
pub const PUT_ALL_REQUEST: u8 = 0x2D;
/// Get several entries.
pub const GET_ALL_REQUEST: u8 = 0x2F;
/// Open a server-side iteration.
pub const ITERATION_START_REQUEST: u8 = 0x31;
/// Fetch the next iteration batch.
pub const ITERATION_NEXT_REQUEST: u8 = 0x33;
/// Close a server-side iteration.
pub const ITERATION_END_REQUEST: u8 = 0x35;
/// Register a near-cache listener filtered by a client bloom filter.
pub const ADD_BLOOM_FILTER_NEAR_CACHE_LISTENER_REQUEST: u8 = 0x41;
/// Push a new bloom filter bitmap for a near-cache listener.
pub const UPDATE_BLOOM_FILTER_REQUEST: u8 = 0x43;

/// Opcode of an error response, regardless of the request.
pub const ERROR_RESPONSE: u8 = 0x50;

/// Entry created event.
pub const CACHE_ENTRY_CREATED_EVENT_RESPONSE: u8 = 0x60;
/// Entry modified event.
pub const CACHE_ENTRY_MODIFIED_EVENT_RESPONSE: u8 = 0x61;
/// Entry removed event.
pub const CACHE_ENTRY_REMOVED_EVENT_RESPONSE: u8 = 0x62;
/// Entry expired event.
pub const CACHE_ENTRY_EXPIRED_EVENT_RESPONSE: u8 = 0x63;

/// Returns the response opcode paired with a request opcode.
pub const fn response_opcode(request: u8) -> u8 {
    request + 1
}

/// Returns `true` for opcodes that carry a pushed listener event.
pub const fn is_event_opcode(opcode: u8) -> bool {
    opcode >= CACHE_ENTRY_CREATED_EVENT_RESPONSE && opcode <= CACHE_ENTRY_EXPIRED_EVENT_RESPONSE
}

// Status codes.

/// Success.
pub const NO_ERROR_STATUS: u8 = 0x00;
/// Conditional operation not executed.
pub const NOT_PUT_REMOVED_REPLACED_STATUS: u8 = 0x01;
/// Key not found.
pub const KEY_DOES_NOT_EXIST_STATUS: u8 = 0x02;
/// Success, previous value follows.
pub const SUCCESS_WITH_PREVIOUS: u8 = 0x03;
/// Not executed, previous value follows.
pub const NOT_EXECUTED_WITH_PREVIOUS: u8 = 0x04;
/// The iteration id is unknown to the server.
pub const INVALID_ITERATION: u8 = 0x05;
/// Success, server stores objects.
pub const NO_ERROR_STATUS_OBJ_STORAGE: u8 = 0x06;
/// Success with previous value, server stores objects.
pub const SUCCESS_WITH_PREVIOUS_OBJ_STORAGE: u8 = 0x07;
/// Not executed with previous value, server stores objects.
pub const NOT_EXECUTED_WITH_PREVIOUS_OBJ_STORAGE: u8 = 0x08;
/// Bad magic byte or message id.
pub const INVALID_MAGIC_OR_MESSAGE_ID_STATUS: u8 = 0x81;
/// Unknown opcode.
pub const UNKNOWN_COMMAND_STATUS: u8 = 0x82;
/// Unknown protocol version.
pub const UNKNOWN_VERSION_STATUS: u8 = 0x83;
/// The server could not parse the request.
pub const REQUEST_PARSING_ERROR_STATUS: u8 = 0x84;
/// Internal server failure.
pub const SERVER_ERROR_STATUS: u8 = 0x85;
/// Server-side timeout.
pub const COMMAND_TIMEOUT_STATUS: u8 = 0x86;
/// A cluster node was suspected while handling the request.
pub const NODE_SUSPECTED_STATUS: u8 = 0x87;
/// The server is starting or stopping.
pub const ILLEGAL_LIFECYCLE_STATE_STATUS: u8 = 0x88;

/// Returns `true` for statuses reporting a successful execution.
pub const fn is_success(status: u8) -> bool {
    matches!(
        status,
        NO_ERROR_STATUS
            | SUCCESS_WITH_PREVIOUS
            | NO_ERROR_STATUS_OBJ_STORAGE
            | SUCCESS_WITH_PREVIOUS_OBJ_STORAGE
    )
}

/// Returns `true` when the key was not found.
pub const fn is_not_exist(status: u8) -> bool {
    status == KEY_DOES_NOT_EXIST_STATUS
}

/// Returns `true` when a conditional operation was not applied.
pub const fn is_not_executed(status: u8) -> bool {
    matches!(
        status,
        NOT_PUT_REMOVED_REPLACED_STATUS
            | NOT_EXECUTED_WITH_PREVIOUS
            | NOT_EXECUTED_WITH_PREVIOUS_OBJ_STORAGE
    )
}

/// Returns `true` when a previous value follows the status.
pub const fn has_previous(status: u8) -> bool {
    matches!(
        status,
        SUCCESS_WITH_PREVIOUS
            | NOT_EXECUTED_WITH_PREVIOUS
            | SUCCESS_WITH_PREVIOUS_OBJ_STORAGE
            | NOT_EXECUTED_WITH_PREVIOUS_OBJ_STORAGE
    )
}

/// Returns `true` for error statuses, whose body is a message string.
pub const fn is_error(status: u8) -> bool {
    status >= INVALID_MAGIC_OR_MESSAGE_ID_STATUS && status <= ILLEGAL_LIFECYCLE_STATE_STATUS
}

// Listener interests, sent as a vint bitmask.

/// Receive created events.
pub const INTEREST_CREATED: u8 = 0x01;
/// Receive modified events.
pub const INTEREST_MODIFIED: u8 = 0x02;
/// Receive removed events.
pub const INTEREST_REMOVED: u8 = 0x04;
/// Receive expired events.
pub const INTEREST_EXPIRED: u8 = 0x08;
/// Receive every event type.
pub const INTEREST_ALL: u8 = INTEREST_CREATED | INTEREST_MODIFIED | INTEREST_REMOVED | INTEREST_EXPIRED;

/// Topology id sent before any topology has been received.
pub const DEFAULT_CACHE_TOPOLOGY: i32 = -1;

/// Topology id sent right after a cluster switch.
pub const SWITCH_CLUSTER_TOPOLOGY: i32 = -2;

/// Prefix of server-side admin task names.
pub const ADMIN_TASK_PREFIX: &str = "@@";

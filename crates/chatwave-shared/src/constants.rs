/// Protocol version reported by `/health`.
pub const PROTOCOL_VERSION: &str = "chatwave/1.0";

/// Prefix of every client-generated temporary message id.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Maximum text content length in characters.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Maximum attachment reference length in bytes.
pub const MAX_ATTACHMENT_REF_LEN: usize = 2_048;

/// Length of the preview handed to the notification collaborator.
pub const SUMMARY_CHARS: usize = 100;

/// Default page size for history fetches.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Default HTTP / WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Per-session outbound queue depth before events are dropped for that session.
pub const DEFAULT_SESSION_QUEUE: usize = 256;

//! Message kinds carried in the frame header.

/// Request that expects exactly one reply.
pub const INVOKE: u16 = 1;

/// Reply to an earlier invoke, correlated by request id.
pub const REPLY: u16 = 2;

/// One-way event on a named channel (sends and forwarded callbacks).
pub const EVENT: u16 = 3;

/// Returns a human-readable name for a message kind.
pub fn kind_name(kind: u16) -> &'static str {
    match kind {
        INVOKE => "INVOKE",
        REPLY => "REPLY",
        EVENT => "EVENT",
        _ => "UNKNOWN",
    }
}


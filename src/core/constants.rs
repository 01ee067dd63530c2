//! Protocol constants and configuration defaults.
//!
//! The wire values are fixed by the protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// ADDRESS HANDSHAKE
// =============================================================================

/// Address length byte for an IPv4 address.
pub const IPV4_ADDR_LEN: u8 = 4;

/// Address length byte for an IPv6 address.
pub const IPV6_ADDR_LEN: u8 = 16;

/// Largest address frame on the wire (length byte + IPv6 address).
pub const MAX_ADDRESS_FRAME_SIZE: usize = 1 + IPV6_ADDR_LEN as usize;

// =============================================================================
// HEARTBEAT
// =============================================================================

/// Tag byte of a heartbeat frame. Any other tag announces that many bytes of
/// payload to be skipped.
pub const HEARTBEAT_TAG: u8 = 0x00;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5000);

/// Number of missed heartbeats tolerated before the peer is declared dead.
pub const DEFAULT_MISSED_HEARTBEATS: u32 = 3;

/// Shortest pause between reconnection attempts.
pub const DEFAULT_REDIAL_MIN: Duration = Duration::from_millis(1000);

/// Longest pause between reconnection attempts.
pub const DEFAULT_REDIAL_MAX: Duration = Duration::from_millis(15000);

/// Placeholder replaced by the new address in hook scripts.
pub const DEFAULT_SCRIPT_KEYWORD: &str = "{}";

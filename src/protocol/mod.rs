//! Wire protocol: the one-shot address handshake and the heartbeat session.
//!
//! ```text
//! server -> client, once:   [len:1 ∈ {4,16}][address:len]
//! both ways, thereafter:    [tag:1]            tag = 0: heartbeat
//!                           [tag:1][skip:tag]  tag > 0: ignorable payload
//! ```

mod handshake;
mod heartbeat;

pub use handshake::{AddressFrame, recv_address, send_address};
pub use heartbeat::{HeartbeatFrame, HeartbeatSession, Role, SessionSummary};

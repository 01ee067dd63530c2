//! Collaborator traits consumed by the liveness engine.
//!
//! The engine never decides how errors are presented or what happens when the
//! address changes; it hands both to these sinks.

use std::net::IpAddr;

use async_trait::async_trait;

use super::error::LivenessError;

/// Receives every error the engine observes.
///
/// The engine suppresses nothing. Severity and de-duplication are the
/// implementor's business.
pub trait ErrorSink: Send + Sync {
    /// Report an error.
    fn report(&self, err: &LivenessError);
}

impl<F> ErrorSink for F
where
    F: Fn(&LivenessError) + Send + Sync,
{
    fn report(&self, err: &LivenessError) {
        self(err)
    }
}

/// Invoked when the client learns a new public address.
///
/// Called only on a change of value, never for repeats, and always off the
/// heartbeat path.
#[async_trait]
pub trait AddressChangeSink: Send + Sync {
    /// Handle the new address.
    async fn on_update(&self, addr: IpAddr) -> Result<(), LivenessError>;
}

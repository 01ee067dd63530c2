//! Client lifecycle: dial loop, handshake receive and address notification.

#[allow(clippy::module_inception)]
mod client;
mod notify;

pub use client::*;
pub use notify::{AddressNotifier, AddressTracker};

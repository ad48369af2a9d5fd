//! Peripheral (GATT server) side of the gattlink message link
//!
//! - [`adapter`] - the radio capability contract and the events it reports
//! - [`config`] - session configuration
//! - [`subscribers`] - CCCD subscriber bookkeeping
//! - [`delivery`] - per-send delivery reports
//! - [`session`] - the [`PeripheralSession`] state machine
//!
//! The host supplies the radio by implementing [`PeripheralAdapter`] and
//! feeding its callbacks to [`PeripheralSession::handle_event`], or by sending
//! them over a channel drained with [`PeripheralSession::run`].

pub mod adapter;
pub mod config;
pub mod delivery;
pub mod session;
pub mod subscribers;

pub use adapter::{
    AdvertiseData, AdvertiseMode, AdvertiseSettings, PeripheralAdapter, PeripheralEvent,
    RequestId, ServerHandle,
};
pub use config::PeripheralConfig;
pub use delivery::DeliveryReport;
pub use session::PeripheralSession;
pub use subscribers::{SubscriberSet, SubscriberSnapshot};

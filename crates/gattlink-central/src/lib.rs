//! Central (GATT client) side of the gattlink message link
//!
//! - [`adapter`] - the radio capability contract and the events it reports
//! - [`config`] - session configuration
//! - [`registry`] - discovered-device list maintenance
//! - [`session`] - the [`CentralSession`] state machine
//!
//! With the `btleplug` feature, [`BtleplugAdapter`] drives a real host adapter.
//!
//! ```rust,no_run
//! # #[cfg(feature = "btleplug")]
//! # async fn example() -> gattlink_core::Result<()> {
//! use std::sync::Arc;
//!
//! use gattlink_central::{BtleplugAdapter, CentralConfig, CentralSession};
//! use gattlink_core::AlwaysGranted;
//!
//! let (adapter, events) = BtleplugAdapter::new().await?;
//! let session = CentralSession::new(
//!     Arc::new(adapter),
//!     Arc::new(AlwaysGranted),
//!     CentralConfig::default(),
//! )?;
//!
//! let pump = session.clone();
//! tokio::spawn(async move { pump.run(events).await });
//!
//! session.start_scan();
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod registry;
pub mod session;

#[cfg(feature = "btleplug")]
mod btleplug_adapter;

pub use adapter::{
    CentralAdapter, CentralEvent, LinkState, ScanFilter, ScanMode, ScanRecord, ScanSettings,
    TransportHandle,
};
#[cfg(feature = "btleplug")]
pub use btleplug_adapter::BtleplugAdapter;
pub use config::CentralConfig;
pub use session::{CentralSession, LinkPhase};

//! A central and a peripheral session wired through one virtual radio

use std::sync::Arc;

use gattlink_central::{CentralConfig, CentralSession};
use gattlink_core::{AlwaysGranted, Result};
use gattlink_peripheral::{PeripheralConfig, PeripheralSession};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::radio::{RadioConfig, VirtualRadio};

/// Both sessions plus the radio between them
///
/// Event pumps for both sessions run on the current runtime until the pair is
/// dropped.
pub struct SimulatedPair {
    pub radio: Arc<VirtualRadio>,
    pub central: CentralSession,
    pub peripheral: PeripheralSession,
    pumps: Vec<JoinHandle<()>>,
}

impl SimulatedPair {
    /// Build a pair with default session configs
    pub fn new(radio_config: RadioConfig) -> Result<Self> {
        Self::with_configs(
            radio_config,
            CentralConfig::default(),
            PeripheralConfig::default(),
        )
    }

    pub fn with_configs(
        radio_config: RadioConfig,
        central_config: CentralConfig,
        peripheral_config: PeripheralConfig,
    ) -> Result<Self> {
        let (radio, events) = VirtualRadio::new(radio_config);

        // Fails without a runtime, so the spawns below are safe.
        let central = CentralSession::new(radio.clone(), Arc::new(AlwaysGranted), central_config)?;
        let peripheral =
            PeripheralSession::new(radio.clone(), Arc::new(AlwaysGranted), peripheral_config);

        let central_pump = {
            let session = central.clone();
            tokio::spawn(async move { session.run(events.central).await })
        };
        let peripheral_pump = {
            let session = peripheral.clone();
            tokio::spawn(async move { session.run(events.peripheral).await })
        };
        debug!("Simulated pair ready");

        Ok(Self {
            radio,
            central,
            peripheral,
            pumps: vec![central_pump, peripheral_pump],
        })
    }
}

impl Drop for SimulatedPair {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

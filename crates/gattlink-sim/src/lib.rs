//! Deterministic in-process BLE link for exercising gattlink sessions
//!
//! [`VirtualRadio`] implements both adapter contracts and routes each side's
//! requests to the other side as events. [`SimulatedPair`] wires a
//! [`CentralSession`](gattlink_central::CentralSession) and a
//! [`PeripheralSession`](gattlink_peripheral::PeripheralSession) through one
//! radio. Faults such as refused connections or failing notifies are injected
//! with [`VirtualRadio::update_faults`].

pub mod pair;
pub mod radio;

pub use pair::SimulatedPair;
pub use radio::{encode_advertisement, RadioCall, RadioConfig, RadioEvents, RadioFaults, VirtualRadio};

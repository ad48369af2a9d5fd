//! Discovered-device list maintenance

use gattlink_core::{current_timestamp, ScannedDevice};

use crate::adapter::ScanRecord;

/// Turn a sighting into a listable device, dropping unnamed advertisers
pub fn device_from_record(record: ScanRecord) -> Option<ScannedDevice> {
    let name = record.name.filter(|name| !name.is_empty())?;
    Some(ScannedDevice {
        address: record.address,
        name,
        rssi: record.rssi,
        advertisement: record.advertisement,
        discovered_at: current_timestamp(),
    })
}

/// Replace any entry with the same address and keep the list ordered by RSSI,
/// strongest first. Equal RSSI keeps insertion order.
pub fn upsert(devices: &mut Vec<ScannedDevice>, device: ScannedDevice) {
    devices.retain(|existing| existing.address != device.address);
    devices.push(device);
    devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattlink_core::PeerAddress;
    use proptest::prelude::*;

    fn record(address: &str, name: Option<&str>, rssi: i16) -> ScanRecord {
        ScanRecord {
            address: PeerAddress::from(address),
            name: name.map(str::to_string),
            rssi,
            advertisement: vec![0x02, 0x01, 0x06],
        }
    }

    #[test]
    fn test_unnamed_records_are_dropped() {
        assert!(device_from_record(record("A", None, -40)).is_none());
        assert!(device_from_record(record("A", Some(""), -40)).is_none());
        assert!(device_from_record(record("A", Some("BLE Server"), -40)).is_some());
    }

    #[test]
    fn test_rediscovery_replaces_and_resorts() {
        let mut devices = Vec::new();
        for r in [
            record("A", Some("a"), -70),
            record("B", Some("b"), -50),
            record("A", Some("a"), -40),
        ] {
            upsert(&mut devices, device_from_record(r).unwrap());
        }

        let order: Vec<&str> = devices.iter().map(|d| d.address.as_str()).collect();
        assert_eq!(order, vec!["A", "B"]);
        assert_eq!(devices[0].rssi, -40);
    }

    proptest! {
        #[test]
        fn prop_list_is_unique_and_sorted(
            sightings in proptest::collection::vec((0u8..8, -100i16..0), 0..64)
        ) {
            let mut devices = Vec::new();
            for (id, rssi) in &sightings {
                let r = record(&format!("dev-{}", id), Some("named"), *rssi);
                upsert(&mut devices, device_from_record(r).unwrap());
            }

            let mut addresses: Vec<_> = devices.iter().map(|d| d.address.clone()).collect();
            addresses.sort();
            addresses.dedup();
            prop_assert_eq!(addresses.len(), devices.len());
            prop_assert!(devices.windows(2).all(|w| w[0].rssi >= w[1].rssi));

            // each address reports its most recent sighting
            for device in &devices {
                let last = sightings
                    .iter()
                    .rev()
                    .find(|(id, _)| format!("dev-{}", id) == device.address.as_str())
                    .map(|(_, rssi)| *rssi);
                prop_assert_eq!(last, Some(device.rssi));
            }
        }
    }
}

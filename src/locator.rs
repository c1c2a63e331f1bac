//! Discovery of attached devices, in application mode and bootloader mode.

use std::collections::BTreeMap;

use rusb::{Context, Device, UsbContext};

use crate::constants::{PRODUCT_ID_APPLICATION, PRODUCT_ID_BOOTLOADER, VENDOR_ID};
use crate::error::{Error, Result};

/// The two personalities a board enumerates as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The user firmware, a serial-class device.
    Application,
    /// The HalfKay HID programming interface, after a reset.
    Bootloader,
}

impl Mode {
    const fn product_id(self) -> u16 {
        match self {
            Mode::Application => PRODUCT_ID_APPLICATION,
            Mode::Bootloader => PRODUCT_ID_BOOTLOADER,
        }
    }
}

/// A target device, either already located or referenced by serial number.
#[derive(Debug, Clone)]
pub enum DeviceRef<T> {
    BySerial(String),
    ByDevice(T),
}

pub fn find_application_devices(ctx: &Context) -> Result<BTreeMap<String, Device<Context>>> {
    find_devices(ctx, Mode::Application)
}

pub fn find_bootloader_devices(ctx: &Context) -> Result<BTreeMap<String, Device<Context>>> {
    find_devices(ctx, Mode::Bootloader)
}

/// Enumerate matching devices keyed by serial number.
///
/// Bootloader-mode devices often carry no serial descriptor at all; those
/// fall back to a bus:address key, which stays unique until the device
/// re-enumerates.
pub fn find_devices(ctx: &Context, mode: Mode) -> Result<BTreeMap<String, Device<Context>>> {
    let mut found = BTreeMap::new();
    for device in ctx.devices()?.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if desc.vendor_id() != VENDOR_ID || desc.product_id() != mode.product_id() {
            continue;
        }
        let key = device
            .open()
            .ok()
            .and_then(|handle| handle.read_serial_number_string_ascii(&desc).ok())
            .unwrap_or_else(|| format!("{:03}:{:03}", device.bus_number(), device.address()));
        log::debug!("Found {:?} mode device {}", mode, key);
        found.insert(key, device);
    }
    Ok(found)
}

/// Resolve a device reference against an enumeration map, consuming the map
/// entry on a serial match.
pub fn resolve<T>(devices: &mut BTreeMap<String, T>, target: DeviceRef<T>) -> Result<T> {
    match target {
        DeviceRef::ByDevice(device) => Ok(device),
        DeviceRef::BySerial(serial) => devices
            .remove(&serial)
            .ok_or_else(|| Error::DeviceNotFound {
                serial: Some(serial),
            }),
    }
}

/// Pick the only attached device, refusing to guess between several.
pub fn select_single<T>(devices: BTreeMap<String, T>) -> Result<(String, T)> {
    let mut devices = devices.into_iter();
    match devices.next() {
        None => Err(Error::DeviceNotFound { serial: None }),
        Some(first) => {
            let rest = devices.count();
            if rest > 0 {
                Err(Error::AmbiguousDevice { count: rest + 1 })
            } else {
                Ok(first)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(keys: &[&str]) -> BTreeMap<String, u32> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| (k.to_string(), i as u32))
            .collect()
    }

    #[test]
    fn select_single_rejects_an_empty_map() {
        assert!(matches!(
            select_single(map(&[])),
            Err(Error::DeviceNotFound { serial: None })
        ));
    }

    #[test]
    fn select_single_rejects_multiple_matches() {
        assert!(matches!(
            select_single(map(&["123", "456"])),
            Err(Error::AmbiguousDevice { count: 2 })
        ));
    }

    #[test]
    fn select_single_returns_the_only_match() {
        let (serial, value) = select_single(map(&["123"])).unwrap();
        assert_eq!(serial, "123");
        assert_eq!(value, 0);
    }

    #[test]
    fn resolve_passes_devices_through() {
        let mut devices = map(&["123"]);
        assert_eq!(resolve(&mut devices, DeviceRef::ByDevice(99)).unwrap(), 99);
        assert_eq!(devices.len(), 1, "the map is untouched");
    }

    #[test]
    fn resolve_looks_up_serials() {
        let mut devices = map(&["123", "456"]);
        assert_eq!(
            resolve(&mut devices, DeviceRef::BySerial("456".into())).unwrap(),
            1
        );
        assert!(matches!(
            resolve(&mut devices, DeviceRef::BySerial("789".into())),
            Err(Error::DeviceNotFound { serial: Some(s) }) if s == "789"
        ));
    }
}

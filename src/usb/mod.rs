// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use log::debug;
use nusb::DeviceInfo;
use serde::{Deserialize, Serialize};

use crate::usb::basestation_interface::BasestationInterface;
use crate::usb::errors::DeviceOpenError;
use crate::usb::transport::LinkOpener;

pub mod basestation_interface;
pub mod errors;
pub mod transport;

pub const BASESTATION_VENDOR_ID: u16 = 0x0483;
pub const BASESTATION_PRODUCT_ID: u16 = 0x5740;
pub const BASESTATION_INTERFACE_NUMBER: u8 = 1;
pub const BULK_OUT_ENDPOINT: u8 = 0x01;
pub const BULK_IN_ENDPOINT: u8 = 0x81;

/// Which of the attached basestations serves a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasestationBinding {
    /// Position among attached basestations ordered by bus and address.
    Index(usize),
    Serial(String),
}

impl std::fmt::Display for BasestationBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BasestationBinding::Index(index) => write!(f, "basestation #{}", index),
            BasestationBinding::Serial(serial) => write!(f, "basestation with serial {}", serial),
        }
    }
}

pub fn is_basestation(device_info: &DeviceInfo) -> bool {
    device_info.vendor_id() == BASESTATION_VENDOR_ID && device_info.product_id() == BASESTATION_PRODUCT_ID
}

/// Attached basestations in a stable order.
pub fn list_basestations() -> Result<Vec<DeviceInfo>, DeviceOpenError> {
    let mut devices: Vec<DeviceInfo> = nusb::list_devices()
        .map_err(DeviceOpenError::Enumeration)?
        .filter(is_basestation)
        .collect();
    devices.sort_by_key(|d| (d.bus_number(), d.device_address()));
    Ok(devices)
}

/// Opens the device, detaching any kernel driver, and claims the basestation interface.
///
/// The device handle is only kept alive by the returned interface, so a failed
/// claim releases everything that was opened.
pub fn open_interface(device_info: &DeviceInfo, interface_number: u8) -> Result<nusb::Interface, DeviceOpenError> {
    let device = device_info.open().map_err(DeviceOpenError::Open)?;
    let interface = device
        .detach_and_claim_interface(interface_number)
        .map_err(|source| DeviceOpenError::Claim { interface: interface_number, source })?;
    Ok(interface)
}

/// The device a transport stays bound to once it was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PinnedDevice {
    Serial(String),
    BusAddress(u8, u8),
}

impl PinnedDevice {
    fn of(serial: Option<&str>, bus: u8, address: u8) -> Self {
        match serial {
            Some(serial) => PinnedDevice::Serial(serial.to_string()),
            None => PinnedDevice::BusAddress(bus, address),
        }
    }

    fn matches(&self, (serial, bus, address): (Option<&str>, u8, u8)) -> bool {
        match self {
            PinnedDevice::Serial(pinned) => serial == Some(pinned.as_str()),
            PinnedDevice::BusAddress(pinned_bus, pinned_address) => {
                serial.is_none() && (bus, address) == (*pinned_bus, *pinned_address)
            }
        }
    }
}

/// Position in `candidates` (serial, bus, address) of the device to open.
fn select_candidate(
    binding: &BasestationBinding,
    pinned: Option<&PinnedDevice>,
    candidates: &[(Option<&str>, u8, u8)],
) -> Option<usize> {
    match (pinned, binding) {
        (Some(pinned), _) => candidates.iter().position(|c| pinned.matches(*c)),
        (None, BasestationBinding::Serial(serial)) => candidates.iter().position(|c| c.0 == Some(serial.as_str())),
        (None, BasestationBinding::Index(index)) => (*index < candidates.len()).then_some(*index),
    }
}

/// Opens the basestation selected by a [`BasestationBinding`].
///
/// The first device opened is remembered by serial number, or by bus and address
/// when it has none, so a reconnect never picks up a different basestation.
pub struct UsbLinkOpener {
    binding: BasestationBinding,
    pinned: Mutex<Option<PinnedDevice>>,
}

impl UsbLinkOpener {
    pub fn new(binding: BasestationBinding) -> Self {
        Self { binding, pinned: Mutex::new(None) }
    }

    fn select(&self, candidates: Vec<DeviceInfo>) -> Option<DeviceInfo> {
        let pinned = self.pinned.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let identities: Vec<_> = candidates
            .iter()
            .map(|d| (d.serial_number(), d.bus_number(), d.device_address()))
            .collect();
        let index = select_candidate(&self.binding, pinned.as_ref(), &identities)?;
        candidates.into_iter().nth(index)
    }
}

#[async_trait]
impl LinkOpener for UsbLinkOpener {
    type Link = BasestationInterface;

    async fn open(&self) -> Result<BasestationInterface, DeviceOpenError> {
        let device_info = self
            .select(list_basestations()?)
            .ok_or_else(|| DeviceOpenError::NotFound(self.binding.to_string()))?;
        debug!(
            "Opening basestation \"{}\" on bus {} address {}",
            device_info.serial_number().unwrap_or("unknown"),
            device_info.bus_number(),
            device_info.device_address()
        );
        let interface = open_interface(&device_info, BASESTATION_INTERFACE_NUMBER)?;
        self.pinned.lock().unwrap_or_else(PoisonError::into_inner).get_or_insert_with(|| {
            PinnedDevice::of(device_info.serial_number(), device_info.bus_number(), device_info.device_address())
        });
        Ok(BasestationInterface::new(interface))
    }
}

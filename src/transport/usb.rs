//! USB transportation.

use std::{thread::sleep, time::Duration};

use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType};

use super::Transport;
use crate::constants::timeouts;
use crate::error::Result;
use crate::protocol::ControlRequest;

pub struct UsbTransport {
    device_handle: DeviceHandle<Context>,
}

impl UsbTransport {
    /// Open the device and take interface 0 from the kernel, leaving it
    /// configured and ready for control traffic.
    pub fn open(device: &Device<Context>) -> Result<UsbTransport> {
        let mut device_handle = device.open()?;
        if device_handle.kernel_driver_active(0).unwrap_or(false) {
            device_handle.detach_kernel_driver(0)?;
            sleep(timeouts::SETTLE);
        }
        device_handle.set_active_configuration(1)?;
        device_handle.claim_interface(0)?;
        Ok(UsbTransport { device_handle })
    }
}

impl Transport for UsbTransport {
    fn control_write(
        &mut self,
        request: ControlRequest,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface);
        let written = self.device_handle.write_control(
            request_type,
            request.request,
            request.value,
            request.index,
            payload,
            timeout,
        )?;
        Ok(written)
    }
}

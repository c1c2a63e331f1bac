//! Board flashing logic: the reset, program and boot workflow.

use std::collections::BTreeSet;
use std::thread::sleep;

use indicatif::ProgressBar;
use rusb::{Context, Device};

use crate::constants::timeouts;
use crate::device::McuProfile;
use crate::error::{Error, Result};
use crate::format::FirmwareImage;
use crate::locator::{self, DeviceRef};
use crate::protocol::Command;
use crate::transport::{PollPolicy, Transport, UsbTransport};

pub struct Flashing<T: Transport> {
    transport: T,
    profile: McuProfile,
    /// Pacing of the first page write and the boot request. The bootloader
    /// erases all of flash while handling the first write, so it answers
    /// slowly.
    long_poll: PollPolicy,
    /// Pacing of every later page write.
    short_poll: PollPolicy,
}

impl Flashing<UsbTransport> {
    /// Locate a bootloader-mode device and open it.
    ///
    /// If the target is only present in application mode it is soft-rebooted
    /// into HalfKay first. With no target given, exactly one attached device
    /// is expected.
    pub fn new_from_usb(
        ctx: &Context,
        profile: McuProfile,
        target: Option<DeviceRef<Device<Context>>>,
    ) -> Result<Self> {
        let device = locate_bootloader(ctx, target)?;
        let transport = UsbTransport::open(&device)?;
        Ok(Flashing::new(transport, profile))
    }
}

fn locate_bootloader(
    ctx: &Context,
    target: Option<DeviceRef<Device<Context>>>,
) -> Result<Device<Context>> {
    let mut bootloader = locator::find_bootloader_devices(ctx)?;
    match target {
        Some(DeviceRef::ByDevice(device)) => Ok(device),
        Some(DeviceRef::BySerial(serial)) => {
            if let Some(device) = bootloader.remove(&serial) {
                log::debug!("{} is already in bootloader mode", serial);
                return Ok(device);
            }
            let mut applications = locator::find_application_devices(ctx)?;
            let device = locator::resolve(&mut applications, DeviceRef::BySerial(serial))?;
            let device = reboot_to_bootloader(ctx, &device)?;
            sleep(timeouts::REENUMERATE);
            Ok(device)
        }
        None => match locator::select_single(bootloader) {
            Ok((serial, device)) => {
                log::debug!("{} is already in bootloader mode", serial);
                Ok(device)
            }
            Err(Error::DeviceNotFound { .. }) => {
                let (serial, device) =
                    locator::select_single(locator::find_application_devices(ctx)?)?;
                log::info!("Rebooting {} into the bootloader", serial);
                let device = reboot_to_bootloader(ctx, &device)?;
                sleep(timeouts::REENUMERATE);
                Ok(device)
            }
            Err(err) => Err(err),
        },
    }
}

/// Force an application-mode device into HalfKay and wait for it to come
/// back.
///
/// The device drops off the bus and re-enumerates, usually under a new
/// address and without a usable serial, so "the same device" is whichever
/// bootloader-mode device was not there before the reboot.
pub fn reboot_to_bootloader(ctx: &Context, device: &Device<Context>) -> Result<Device<Context>> {
    let before: BTreeSet<String> = locator::find_bootloader_devices(ctx)?
        .into_keys()
        .collect();

    let mut transport = UsbTransport::open(device)?;
    log::info!("Requesting reboot into the bootloader");
    transport.send(Command::Reboot, timeouts::REBOOT)?;
    // release the handle; the device is about to drop off the bus
    drop(transport);

    let policy = PollPolicy::new(timeouts::POLL_INTERVAL, timeouts::LONG);
    policy
        .wait_for(|_| {
            let fresh = locator::find_bootloader_devices(ctx).ok()?;
            fresh
                .into_iter()
                .find(|(key, _)| !before.contains(key))
                .map(|(key, device)| {
                    log::debug!("Bootloader enumerated as {}", key);
                    device
                })
        })
        .ok_or(Error::BootloaderReappearTimeout)
}

impl<T: Transport> Flashing<T> {
    pub fn new(transport: T, profile: McuProfile) -> Self {
        Flashing::with_policies(
            transport,
            profile,
            PollPolicy::new(timeouts::POLL_INTERVAL, timeouts::LONG),
            PollPolicy::new(timeouts::POLL_INTERVAL, timeouts::SHORT),
        )
    }

    /// Like [`Flashing::new`], with explicit retry pacing.
    pub fn with_policies(
        transport: T,
        profile: McuProfile,
        long_poll: PollPolicy,
        short_poll: PollPolicy,
    ) -> Self {
        Flashing {
            transport,
            profile,
            long_poll,
            short_poll,
        }
    }

    pub fn dump_info(&self) {
        log::info!("MCU: {}", self.profile);
    }

    /// Write the image to code flash, page by page.
    ///
    /// Pages above the high-water mark are never sent; untouched pages in
    /// between are skipped, except the first page, which always goes out.
    /// A page that cannot be pushed within its budget aborts the whole
    /// operation.
    pub fn program(&mut self, image: &FirmwareImage) -> Result<()> {
        let block_size = match self.profile.block_size {
            512 | 1024 => self.profile.block_size as usize,
            other => return Err(Error::UnsupportedBlockSize(other)),
        };

        let total_pages = image.high_water_mark().div_ceil(block_size);
        log::info!(
            "Writing {} bytes in up to {} pages of {}",
            image.high_water_mark(),
            total_pages,
            block_size
        );
        let progress = ProgressBar::new(total_pages as u64);

        let mut policy = self.long_poll;
        for page in image.pages(block_size) {
            if page.should_send() {
                let offset = page.offset;
                let cmd = Command::WritePage {
                    address: offset as u32,
                    data: page.data,
                };
                if !self.send_with_retry(cmd, &policy)? {
                    progress.finish_and_clear();
                    return Err(Error::WriteTimeout { offset });
                }
            } else {
                log::debug!("Skipping untouched page at {:#x}", page.offset);
            }
            // only the first page gets the long budget
            policy = self.short_poll;
            progress.inc(1);
        }
        progress.finish_and_clear();
        log::info!("Firmware written");
        Ok(())
    }

    /// Ask the bootloader to jump to the application.
    ///
    /// Failure is reported rather than raised: by the time the transfer
    /// errors out the firmware may well already be running.
    pub fn boot(&mut self) -> bool {
        let cmd = Command::Boot {
            block_size: self.profile.block_size,
        };
        let request = cmd.request();
        let Ok(raw) = cmd.into_raw() else {
            return false;
        };
        log::info!("Booting...");
        self.long_poll
            .wait_for(|remaining| {
                self.transport
                    .control_write(request, &raw, remaining)
                    .ok()
                    .map(|_| ())
            })
            .is_some()
    }

    /// Push one command until the device has taken the whole payload.
    ///
    /// A failed attempt counts as zero bytes transferred; bytes accumulate
    /// across attempts until the total is reached or the budget runs out.
    fn send_with_retry(&mut self, cmd: Command, policy: &PollPolicy) -> Result<bool> {
        let request = cmd.request();
        let raw = cmd.into_raw()?;
        let total = raw.len();
        let mut transferred = 0usize;
        let done = policy.wait_for(|remaining| {
            transferred += self
                .transport
                .control_write(request, &raw, remaining)
                .unwrap_or(0);
            (transferred >= total).then_some(())
        });
        Ok(done.is_some())
    }
}

//! The HalfKay wire protocol.
//!
//! HalfKay is write-only: every exchange is a class-type control transfer
//! directed at interface 0, and the bootloader never answers. Page writes
//! and the boot request travel as HID SET_REPORT transfers; the only other
//! request is the soft reboot sent to the application firmware's serial
//! interface.

use scroll::{LE, Pwrite};

use crate::constants::{BOOT_ADDRESS, HEADER_SIZE, REBOOT_MAGIC, SHORT_HEADER_SIZE, requests};
use crate::error::Result;

/// Parameters of one control-out transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// HalfKay command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the application firmware to reboot into HalfKay.
    Reboot,
    /// Write one flash page. `address` is a page-aligned byte offset into
    /// code flash.
    WritePage { address: u32, data: Vec<u8> },
    /// Leave the bootloader and jump to the application.
    Boot { block_size: u32 },
}

impl Command {
    pub fn request(&self) -> ControlRequest {
        match self {
            Command::Reboot => ControlRequest {
                request: requests::SOFT_REBOOT,
                value: 0,
                index: 0,
            },
            Command::WritePage { .. } | Command::Boot { .. } => ControlRequest {
                request: requests::SET_REPORT,
                value: requests::REPORT_OUTPUT,
                index: 0,
            },
        }
    }

    pub fn into_raw(self) -> Result<Vec<u8>> {
        match self {
            Command::Reboot => Ok(vec![REBOOT_MAGIC]),
            Command::WritePage { address, data } => {
                // 3 byte little-endian page address, zero padding up to the
                // 64 byte header, then the page itself.
                let mut buf = vec![0u8; HEADER_SIZE + data.len()];
                buf.pwrite_with(address & 0x00ff_ffff, 0, LE)?;
                buf[HEADER_SIZE..].copy_from_slice(&data);
                Ok(buf)
            }
            Command::Boot { block_size } => {
                // Same length as a page write, but the address sentinel
                // tells the bootloader to jump instead of writing. The
                // small AVR parts use a 2 byte header.
                let header = if block_size >= 512 {
                    HEADER_SIZE
                } else {
                    SHORT_HEADER_SIZE
                };
                let mut buf = vec![0u8; header + block_size as usize];
                buf.pwrite_with(BOOT_ADDRESS, 0, LE)?;
                Ok(buf)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reboot_is_a_single_magic_byte() {
        let cmd = Command::Reboot;
        assert_eq!(
            cmd.request(),
            ControlRequest {
                request: 0x20,
                value: 0,
                index: 0
            }
        );
        assert_eq!(cmd.into_raw().unwrap(), vec![0x86]);
    }

    #[test]
    fn write_page_layout() {
        let data = vec![0xab; 512];
        let cmd = Command::WritePage {
            address: 0x020104,
            data: data.clone(),
        };
        assert_eq!(
            cmd.request(),
            ControlRequest {
                request: 0x09,
                value: 0x0200,
                index: 0
            }
        );
        let raw = cmd.into_raw().unwrap();
        assert_eq!(raw.len(), 64 + 512);
        assert_eq!(&raw[..3], &[0x04, 0x01, 0x02]);
        assert!(raw[3..64].iter().all(|&b| b == 0));
        assert_eq!(&raw[64..], &data[..]);
    }

    #[test]
    fn boot_payload_carries_the_sentinel() {
        let raw = Command::Boot { block_size: 1024 }.into_raw().unwrap();
        assert_eq!(raw.len(), 64 + 1024);
        assert_eq!(&raw[..3], &[0xff, 0xff, 0xff]);
        assert!(raw[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn boot_payload_for_small_blocks_uses_the_short_header() {
        let raw = Command::Boot { block_size: 128 }.into_raw().unwrap();
        assert_eq!(raw.len(), 2 + 128);
        assert_eq!(&raw[..3], &[0xff, 0xff, 0xff]);
    }
}

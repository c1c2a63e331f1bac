//! Error taxonomy of the flashing workflow.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A hex record's trailing checksum disagrees with its contents.
    #[error("checksum mismatch: computed {expected:#04x}, record says {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// Only data and end-of-file records are understood.
    #[error("unsupported hex record type {0:#04x}")]
    UnsupportedRecordType(u8),

    #[error("malformed hex record: {0}")]
    MalformedRecord(String),

    /// A data record reaches past the MCU's code flash.
    #[error("record at {address:#06x} overflows the {code_size} byte code flash")]
    RecordOverflow { address: u32, code_size: usize },

    #[error("unknown mcu {0:?}")]
    UnknownMcu(String),

    /// The programmer only speaks the 512/1024 byte page variant of the
    /// protocol.
    #[error("unsupported block size {0}")]
    UnsupportedBlockSize(u32),

    #[error("{}", device_not_found_msg(.serial))]
    DeviceNotFound { serial: Option<String> },

    #[error("found {count} matching devices, refusing to pick one")]
    AmbiguousDevice { count: usize },

    /// The device never re-enumerated in bootloader mode after a soft
    /// reboot.
    #[error("device did not reappear in bootloader mode after reboot")]
    BootloaderReappearTimeout,

    /// A page write did not complete within its time budget.
    #[error("write of the page at {offset:#x} timed out")]
    WriteTimeout { offset: usize },

    #[error("usb: {0}")]
    Usb(#[from] rusb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("device database: {0}")]
    Db(#[from] serde_yaml::Error),

    #[error("wire format: {0}")]
    Wire(#[from] scroll::Error),
}

fn device_not_found_msg(serial: &Option<String>) -> String {
    match serial {
        Some(serial) => format!("device {serial} not found"),
        None => "no matching device found".to_owned(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

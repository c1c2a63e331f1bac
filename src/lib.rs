//! HalfKay bootloader protocol implementation.
//!
//! Reboots a Teensy out of its application firmware, feeds flash pages to
//! the HalfKay bootloader over HID control transfers, and finally asks it
//! to jump to the freshly written code.

pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod format;
pub mod locator;
pub mod protocol;
pub mod transport;

pub use self::device::{McuDb, McuProfile};
pub use self::error::{Error, Result};
pub use self::flashing::Flashing;
pub use self::format::FirmwareImage;
pub use self::locator::DeviceRef;
pub use self::protocol::Command;
pub use self::transport::{PollPolicy, Transport};

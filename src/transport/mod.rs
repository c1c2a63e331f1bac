//! Abstract device transport interface.

use std::{thread, time::Duration};

use crate::error::Result;
use crate::protocol::{Command, ControlRequest};

pub use self::usb::UsbTransport;

mod usb;

/// Abstraction of the control transfer layer.
///
/// HalfKay only ever receives; a transport is anything that can push one
/// control-out transfer to the device.
pub trait Transport {
    /// Issue a single control-out transfer, returning the number of bytes
    /// the device accepted.
    fn control_write(
        &mut self,
        request: ControlRequest,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Encode and send one command without retrying.
    fn send(&mut self, cmd: Command, timeout: Duration) -> Result<usize> {
        let request = cmd.request();
        let raw = cmd.into_raw()?;
        log::trace!("=> {}", hex::encode(&raw));
        self.control_write(request, &raw, timeout)
    }
}

/// Pacing of a suspend-and-retry operation: poll every `interval`, giving
/// up once `budget` is spent.
///
/// The budget is decremented per attempt rather than per wall clock, so the
/// elapsed time may overrun the nominal budget by up to one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub budget: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, budget: Duration) -> Self {
        PollPolicy { interval, budget }
    }

    /// Invoke `attempt` with the remaining budget until it produces a value
    /// or the budget runs out.
    pub fn wait_for<T>(&self, mut attempt: impl FnMut(Duration) -> Option<T>) -> Option<T> {
        let mut remaining = self.budget;
        while !remaining.is_zero() {
            if let Some(found) = attempt(remaining) {
                return Some(found);
            }
            thread::sleep(self.interval);
            remaining = remaining.saturating_sub(self.interval);
        }
        None
    }
}

//! MCU definitions: flash geometry per supported chip, with board-name
//! aliases.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Board assumed when the CLI is not told otherwise.
pub const DEFAULT_MCU: &str = "TEENSY32";

/// Flash geometry of one MCU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McuProfile {
    /// Chip name, e.g. `mk20dx256`.
    pub name: String,
    /// Usable code flash in bytes. The AVR parts reserve the tail of flash
    /// for the bootloader, hence the odd sizes.
    pub code_size: u32,
    /// Flash page written per control transfer.
    pub block_size: u32,
    /// Friendly board names from boards.txt resolving to this chip.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl fmt::Display for McuProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (code flash {} bytes, {} byte pages)",
            self.name, self.code_size, self.block_size
        )
    }
}

/// The table of supported MCUs, built once at startup and never mutated.
#[derive(Debug, Deserialize)]
pub struct McuDb {
    boards: Vec<McuProfile>,
}

impl McuDb {
    pub fn load() -> Result<McuDb> {
        Ok(serde_yaml::from_str(include_str!("../devices/teensy.yaml"))?)
    }

    /// Look up a profile by chip name or board alias, case-insensitively.
    pub fn lookup(&self, name: &str) -> Result<McuProfile> {
        self.boards
            .iter()
            .find(|profile| {
                profile.name.eq_ignore_ascii_case(name)
                    || profile
                        .aliases
                        .iter()
                        .any(|alias| alias.eq_ignore_ascii_case(name))
            })
            .cloned()
            .ok_or_else(|| Error::UnknownMcu(name.to_owned()))
    }

    pub fn profiles(&self) -> impl Iterator<Item = &McuProfile> {
        self.boards.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_chip_name() {
        let db = McuDb::load().unwrap();
        let profile = db.lookup("mk20dx256").unwrap();
        assert_eq!(profile.code_size, 262144);
        assert_eq!(profile.block_size, 1024);
    }

    #[test]
    fn lookup_by_alias() {
        let db = McuDb::load().unwrap();
        let profile = db.lookup("TEENSY32").unwrap();
        assert_eq!(profile.name, "mk20dx256");
        // TEENSY31 and TEENSY32 share a chip
        let other = db.lookup("TEENSY31").unwrap();
        assert_eq!(other.name, profile.name);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let db = McuDb::load().unwrap();
        assert_eq!(db.lookup("teensy36").unwrap().name, "mk66fx1m0");
        assert_eq!(db.lookup("MKL26Z64").unwrap().block_size, 512);
    }

    #[test]
    fn unknown_mcu_is_reported() {
        let db = McuDb::load().unwrap();
        assert!(matches!(
            db.lookup("stm32f103"),
            Err(Error::UnknownMcu(name)) if name == "stm32f103"
        ));
    }

    #[test]
    fn default_mcu_exists() {
        let db = McuDb::load().unwrap();
        db.lookup(DEFAULT_MCU).unwrap();
    }

    #[test]
    fn geometry_is_sane() {
        let db = McuDb::load().unwrap();
        for profile in db.profiles() {
            assert!(
                [128, 256, 512, 1024].contains(&profile.block_size),
                "{} has block size {}",
                profile.name,
                profile.block_size
            );
            assert_eq!(profile.code_size % profile.block_size, 0);
        }
    }
}

//! Firmware file format: Intel HEX decoding into a flat flash image.

use std::path::Path;

use scroll::{BE, Pread};

use crate::constants::ERASED_BYTE;
use crate::error::{Error, Result};

/// A decoded firmware image the size of the target's code flash.
///
/// Bytes never covered by a data record keep the erased-flash value, and the
/// mask records exactly which addresses a record touched. The high-water
/// mark is one past the greatest address written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
    mask: Vec<bool>,
    high_water_mark: usize,
}

pub fn read_firmware_from_file<P: AsRef<Path>>(path: P, code_size: usize) -> Result<FirmwareImage> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    log::info!("Reading {} as Intel HEX", path.display());
    FirmwareImage::parse(&raw, code_size)
}

impl FirmwareImage {
    /// Decode Intel HEX text into an image of `code_size` bytes.
    ///
    /// Decoding ends successfully at an end-of-file record or at the first
    /// line not starting with the record marker. Every record's trailing
    /// two's-complement checksum is verified before its type is considered.
    pub fn parse(source: &str, code_size: usize) -> Result<FirmwareImage> {
        let mut image = FirmwareImage {
            data: vec![ERASED_BYTE; code_size],
            mask: vec![false; code_size],
            high_water_mark: 0,
        };

        for line in source.lines() {
            let Some(body) = line.trim().strip_prefix(':') else {
                break;
            };
            let raw =
                hex::decode(body).map_err(|err| Error::MalformedRecord(err.to_string()))?;
            if raw.len() < 5 {
                return Err(Error::MalformedRecord(format!(
                    "record of {} bytes is too short",
                    raw.len()
                )));
            }
            let byte_count = raw[0] as usize;
            if raw.len() < byte_count + 5 {
                return Err(Error::MalformedRecord(format!(
                    "record claims {} payload bytes but carries {}",
                    byte_count,
                    raw.len().saturating_sub(5)
                )));
            }
            let address = raw.pread_with::<u16>(1, BE)? as usize;
            let record_type = raw[3];
            let payload = &raw[4..4 + byte_count];

            let actual = raw[4 + byte_count];
            let expected = raw[..4 + byte_count]
                .iter()
                .fold(0u8, |sum, &byte| sum.wrapping_add(byte))
                .wrapping_neg();
            if expected != actual {
                return Err(Error::ChecksumMismatch { expected, actual });
            }

            match record_type {
                0x00 => {
                    let end = address + byte_count;
                    if end > code_size {
                        return Err(Error::RecordOverflow {
                            address: address as u32,
                            code_size,
                        });
                    }
                    image.data[address..end].copy_from_slice(payload);
                    image.mask[address..end].fill(true);
                    image.high_water_mark = image.high_water_mark.max(end);
                }
                0x01 => break,
                other => return Err(Error::UnsupportedRecordType(other)),
            }
        }

        Ok(image)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// One past the greatest address any data record wrote.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Split the image into pages of `block_size` bytes, up to the
    /// high-water mark. The final page is padded with the erased value.
    pub fn pages(&self, block_size: usize) -> Pages<'_> {
        Pages {
            image: self,
            block_size,
            offset: 0,
        }
    }
}

/// One protocol-sized chunk of the image, derived on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub data: Vec<u8>,
    dirty: bool,
}

impl Page {
    /// Untouched pages are not transmitted, with one exception: the first
    /// page always goes out so the device receives at least one write.
    pub fn should_send(&self) -> bool {
        self.dirty || self.offset == 0
    }
}

pub struct Pages<'a> {
    image: &'a FirmwareImage,
    block_size: usize,
    offset: usize,
}

impl Iterator for Pages<'_> {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        if self.offset >= self.image.high_water_mark {
            return None;
        }
        let start = self.offset;
        let end = (start + self.block_size).min(self.image.data.len());
        let mut data = self.image.data[start..end].to_vec();
        data.resize(self.block_size, ERASED_BYTE);
        let dirty = self.image.mask[start..end].iter().any(|&used| used);
        self.offset += self.block_size;
        Some(Page {
            offset: start,
            data,
            dirty,
        })
    }
}

/// Build a single data record line with a valid checksum.
#[cfg(test)]
pub(crate) fn data_record(address: u16, payload: &[u8]) -> String {
    let mut raw = vec![
        payload.len() as u8,
        (address >> 8) as u8,
        address as u8,
        0x00,
    ];
    raw.extend_from_slice(payload);
    let checksum = raw
        .iter()
        .fold(0u8, |sum, &byte| sum.wrapping_add(byte))
        .wrapping_neg();
    raw.push(checksum);
    format!(":{}", hex::encode_upper(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOF: &str = ":00000001FF";

    #[test]
    fn decodes_data_records() {
        let source = format!("{}\n{}\n", data_record(0, &[0x01, 0x02, 0x03, 0x04]), EOF);
        let image = FirmwareImage::parse(&source, 16).unwrap();
        assert_eq!(&image.data()[..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(image.high_water_mark(), 4);
        assert!(image.mask()[..4].iter().all(|&m| m));
        assert!(image.mask()[4..].iter().all(|&m| !m));
    }

    #[test]
    fn rejects_bad_checksum() {
        // :0400000001020304F2 is valid; F4 is not
        let err = FirmwareImage::parse(":0400000001020304F4", 16).unwrap_err();
        assert!(matches!(
            err,
            Error::ChecksumMismatch {
                expected: 0xf2,
                actual: 0xf4
            }
        ));
    }

    #[test]
    fn any_corrupted_checksum_is_caught() {
        for payload in [&[0x00u8][..], &[0xff, 0x10, 0x80][..], &[0u8; 16][..]] {
            let record = data_record(0x0120, payload);
            let mut raw = hex::decode(&record[1..]).unwrap();
            let last = raw.len() - 1;
            raw[last] = raw[last].wrapping_add(1);
            let corrupted = format!(":{}", hex::encode_upper(&raw));
            assert!(matches!(
                FirmwareImage::parse(&corrupted, 0x1000),
                Err(Error::ChecksumMismatch { .. })
            ));
        }
    }

    #[test]
    fn rejects_unsupported_record_type() {
        // extended segment address, checksum valid
        let err = FirmwareImage::parse(":00000002FE", 16).unwrap_err();
        assert!(matches!(err, Error::UnsupportedRecordType(0x02)));
    }

    #[test]
    fn rejects_truncated_record() {
        assert!(matches!(
            FirmwareImage::parse(":040000000102F9", 16),
            Err(Error::MalformedRecord(_))
        ));
        assert!(matches!(
            FirmwareImage::parse(":zz", 16),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn rejects_record_past_code_size() {
        let source = data_record(6, &[0xaa, 0xbb, 0xcc, 0xdd]);
        assert!(matches!(
            FirmwareImage::parse(&source, 8),
            Err(Error::RecordOverflow {
                address: 6,
                code_size: 8
            })
        ));
    }

    #[test]
    fn non_record_line_ends_decoding() {
        let source = format!(
            "{}\nnot a record\n{}\n",
            data_record(0, &[0x11]),
            data_record(1, &[0x22])
        );
        let image = FirmwareImage::parse(&source, 8).unwrap();
        assert_eq!(image.data()[0], 0x11);
        // the record after the terminator is never decoded
        assert!(!image.mask()[1]);
        assert_eq!(image.high_water_mark(), 1);
    }

    #[test]
    fn records_after_eof_are_ignored() {
        let source = format!("{}\n{}\n{}\n", data_record(0, &[0x11]), EOF, data_record(1, &[0x22]));
        let image = FirmwareImage::parse(&source, 8).unwrap();
        assert!(!image.mask()[1]);
    }

    #[test]
    fn unmasked_bytes_stay_erased() {
        let source = format!("{}\n{}\n", data_record(3, &[0x00, 0x42]), EOF);
        let image = FirmwareImage::parse(&source, 16).unwrap();
        for (addr, (&byte, &used)) in image.data().iter().zip(image.mask()).enumerate() {
            if !used {
                assert_eq!(byte, ERASED_BYTE, "address {addr}");
            }
        }
        assert_eq!(image.data()[3], 0x00);
        assert_eq!(image.data()[4], 0x42);
    }

    #[test]
    fn page_splitting_skips_clean_middle_pages() {
        // code size 10, block size 4: data at 0..4 and 8..10
        let source = format!(
            "{}\n{}\n{}\n",
            data_record(0, &[0x01, 0x02, 0x03, 0x04]),
            data_record(8, &[0xff, 0xff]),
            EOF
        );
        let image = FirmwareImage::parse(&source, 10).unwrap();
        assert_eq!(image.high_water_mark(), 10);

        let pages: Vec<Page> = image.pages(4).collect();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].offset, 0);
        assert!(pages[0].should_send());
        assert!(!pages[1].should_send(), "untouched page at 4 is skipped");
        assert_eq!(pages[2].offset, 8);
        assert!(pages[2].should_send());
        // short final page is padded with the erased value
        assert_eq!(pages[2].data, vec![0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn first_page_is_sent_even_when_clean() {
        let source = format!("{}\n{}\n", data_record(8, &[0x55]), EOF);
        let image = FirmwareImage::parse(&source, 16).unwrap();
        let pages: Vec<Page> = image.pages(4).collect();
        assert!(!pages[0].dirty);
        assert!(pages[0].should_send());
    }

    #[test]
    fn empty_image_has_no_pages() {
        let image = FirmwareImage::parse(EOF, 16).unwrap();
        assert_eq!(image.high_water_mark(), 0);
        assert_eq!(image.pages(4).count(), 0);
    }

    fn encode_min_records(image: &FirmwareImage) -> String {
        let mut out = String::new();
        let mut addr = 0;
        while addr < image.high_water_mark() {
            if !image.mask()[addr] {
                addr += 1;
                continue;
            }
            let mut end = addr;
            while end < image.high_water_mark() && image.mask()[end] && end - addr < 16 {
                end += 1;
            }
            out.push_str(&data_record(addr as u16, &image.data()[addr..end]));
            out.push('\n');
            addr = end;
        }
        out.push_str(EOF);
        out.push('\n');
        out
    }

    #[test]
    fn round_trips_through_minimal_records() {
        let source = format!(
            "{}\n{}\n{}\n{}\n",
            data_record(0x0000, &[0xde, 0xad, 0xbe, 0xef]),
            data_record(0x0010, &(0..32).collect::<Vec<u8>>()),
            data_record(0x0105, &[0x01]),
            EOF
        );
        let image = FirmwareImage::parse(&source, 0x200).unwrap();
        let reencoded = encode_min_records(&image);
        let again = FirmwareImage::parse(&reencoded, 0x200).unwrap();
        assert_eq!(image, again);
    }
}

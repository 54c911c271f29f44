//! Sequential read-back of records for inspection and tests.

use crate::Datalog;
use crate::error::Error;
use crate::internal::{Location, Step, Walker};
use crate::platform::Platform;
use crate::raw::{self, HEADER_SIZE, INTEGRITY_SIZE};
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::trace;

/// A record read back from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub page: u16,
    pub offset: usize,
    /// The bytes between header and integrity byte.
    pub payload: Vec<u8>,
}

/// Lazy walk over the records of a [`Datalog`], created by [`Datalog::records`],
/// [`Datalog::read_back`] and [`Datalog::read_last`].
///
/// Yields at most the requested number of records. If the walk ends on a header that decodes but
/// cannot describe a record, a final [`Error::CorruptHeader`] is yielded. A record whose integrity
/// byte does not match yields [`Error::IntegrityMismatch`] and the walk continues behind it.
pub struct Records<'a, T: Platform> {
    log: &'a mut Datalog<T>,
    walker: Walker,
    skip: usize,
    remaining: usize,
    done: bool,
}

impl<'a, T: Platform> Records<'a, T> {
    pub(crate) fn new(log: &'a mut Datalog<T>, skip: usize, limit: usize) -> Self {
        let walker = Walker::new(log.cursor.buffer.other());
        Self {
            log,
            walker,
            skip,
            remaining: limit,
            done: false,
        }
    }
}

impl<T: Platform> Iterator for Records<'_, T> {
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == 0 {
            return None;
        }

        loop {
            let step = match self.walker.next_step(self.log) {
                Ok(step) => step,
                Err(e) => {
                    self.done = true;
                    return Some(self.log.track(Err(e)));
                }
            };

            match step {
                Step::Record(_) if self.skip > 0 => self.skip -= 1,
                Step::Record(location) => {
                    self.remaining -= 1;
                    let record = self.log.read_record(location);
                    return Some(self.log.track(record));
                }
                Step::End(end) => {
                    self.done = true;
                    return end
                        .corrupt
                        .map(|(page, offset)| Err(Error::CorruptHeader { page, offset }));
                }
            }
        }
    }
}

impl<T: Platform> Datalog<T> {
    pub(crate) fn read_record(&mut self, location: Location) -> Result<Record, Error> {
        #[cfg(feature = "defmt")]
        trace!(
            "read_record: @{}[{}]: {} bytes",
            location.page, location.offset, location.len
        );

        let mut raw = vec![0u8; location.len];
        self.hal
            .read_buffer(location.buffer, location.offset, &mut raw)
            .map_err(|_| Error::FlashError)?;

        // records of a foreign image may be too short to carry an integrity byte
        let checked = self.config.integrity && location.len > HEADER_SIZE + INTEGRITY_SIZE;
        let payload_end = if checked {
            location.len - INTEGRITY_SIZE
        } else {
            location.len
        };

        if checked && raw[payload_end] != raw::integrity_byte(T::crc32, &raw[..payload_end]) {
            return Err(Error::IntegrityMismatch {
                page: location.page,
                offset: location.offset,
            });
        }

        raw.truncate(payload_end);
        raw.drain(..HEADER_SIZE);
        Ok(Record {
            page: location.page,
            offset: location.offset,
            payload: raw,
        })
    }
}

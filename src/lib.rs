#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

mod config;
pub mod error;
mod internal;
pub mod nor;
pub mod platform;
pub mod raw;
mod read;

pub use config::{Config, DEFAULT_READY_POLL_LIMIT, FullPolicy, StartMode};
pub use read::{Record, Records};

extern crate alloc;

use crate::error::Error;
use crate::internal::{Step, Walker};
use crate::platform::{BufferId, Platform};
use crate::raw::MAX_RECORD_LEN;
#[cfg(feature = "defmt")]
use defmt::info;

/// Position of the next append: the active staging buffer, the page it will be committed to and
/// the offset of the next record within that page.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cursor {
    pub buffer: BufferId,
    pub page: u16,
    pub offset: usize,
}

/// Result of walking the device from page 0.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanOutcome {
    /// Page 0 starts with an invalid header.
    Empty,
    /// The first free offset after the last valid record.
    Resume { page: u16, offset: usize },
    /// Every page up to the last one is full of records.
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogStatistics {
    pub record_len: usize,
    pub records_per_page: usize,
    pub page_count: u16,
    /// Valid records between page 0 and the end of the log.
    pub records: u32,
    /// Pages holding at least one valid record.
    pub pages_used: u16,
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub(crate) enum State {
    Uninitialized,
    Active,
    /// The last page has been committed and wrapping is disabled.
    Exhausted,
}

/// An append-only record log on a page buffered dataflash.
///
/// The struct only keeps the write cursor in memory, everything else is recovered from the
/// self-describing record headers on the medium.
pub struct Datalog<T: Platform> {
    pub(crate) hal: T,
    pub(crate) config: Config,
    pub(crate) record_len: usize,
    pub(crate) page_size: usize,
    pub(crate) page_count: u16,
    pub(crate) state: State,
    pub(crate) cursor: Cursor,
    pub(crate) faulted: bool,
}

impl<T: Platform> Datalog<T> {
    /// Validates the configuration against the device geometry. The returned log does not accept
    /// appends until [`Datalog::initialize`] succeeded.
    pub fn new(config: Config, hal: T) -> Result<Datalog<T>, Error> {
        let page_size = hal.page_size();
        let page_count = hal.page_count();
        let record_len = config.record_len();

        if page_size == 0 {
            return Err(Error::InvalidPageSize);
        }
        if page_count == 0 {
            return Err(Error::InvalidPartitionSize);
        }
        if config.payload_size == 0 || record_len > MAX_RECORD_LEN || record_len > page_size {
            return Err(Error::InvalidRecordSize);
        }

        #[cfg(feature = "debug-logs")]
        println!(
            "datalog: record size: {record_len}, records per page: {}",
            page_size / record_len
        );

        Ok(Self {
            hal,
            config,
            record_len,
            page_size,
            page_count,
            state: State::Uninitialized,
            cursor: Cursor {
                buffer: BufferId::One,
                page: 0,
                offset: 0,
            },
            faulted: false,
        })
    }

    /// Places the write cursor, either at the start of the device or right after the last record
    /// found by a recovery scan.
    ///
    /// If the scan finds every page full the configured [`FullPolicy`] decides: `Wrap` restarts at
    /// page 0, `Stop` returns [`Error::DeviceFull`] and appends keep failing with the same error
    /// until the log is initialized again.
    pub fn initialize(&mut self, mode: StartMode) -> Result<Cursor, Error> {
        self.faulted = false;
        self.state = State::Uninitialized;
        self.cursor.buffer = BufferId::One;

        let result = match mode {
            StartMode::Fresh => self.start_at(0, 0),
            StartMode::Resume => self.resume(),
        };

        #[cfg(feature = "defmt")]
        {
            if let Ok(cursor) = &result {
                info!(
                    "initialize: page {:#06x} offset {:#06x}",
                    cursor.page, cursor.offset
                );
            }
        }

        self.track(result)
    }

    /// Writes one record into the active staging buffer. The buffer is committed as soon as the
    /// page can not take another record.
    pub fn append(&mut self, payload: &[u8]) -> Result<(), Error> {
        match self.state {
            State::Uninitialized => return Err(Error::NotInitialized),
            State::Exhausted => return Err(Error::DeviceFull),
            State::Active => {}
        }
        if self.faulted {
            return Err(Error::FlashError);
        }
        if payload.len() != self.config.payload_size {
            return Err(Error::PayloadSizeMismatch {
                expected: self.config.payload_size,
                actual: payload.len(),
            });
        }

        let result = self.append_record(payload);
        self.track(result)
    }

    /// Commits the active buffer to its page without moving the cursor. Call before a controlled
    /// shutdown, records that were never flushed are lost on power loss.
    pub fn flush(&mut self) -> Result<(), Error> {
        match self.state {
            State::Uninitialized => return Err(Error::NotInitialized),
            // the last page was committed when the device filled up
            State::Exhausted => return Ok(()),
            State::Active => {}
        }
        if self.faulted {
            return Err(Error::FlashError);
        }

        let result = self.flush_active();
        self.track(result)
    }

    /// Runs the recovery scan without touching the write cursor. Running it twice without appends
    /// in between yields the same outcome.
    pub fn scan(&mut self) -> Result<ScanOutcome, Error> {
        let result = self.scan_device();
        self.track(result)
    }

    /// Erases the whole device and starts over at page 0.
    pub fn erase(&mut self) -> Result<Cursor, Error> {
        let result = self.erase_device();
        self.track(result)?;
        self.initialize(StartMode::Fresh)
    }

    /// The write cursor, `None` unless the log accepts appends.
    pub fn cursor(&self) -> Option<Cursor> {
        match self.state {
            State::Active => Some(self.cursor),
            _ => None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lazily walks all records from page 0. Every call starts a new walk.
    pub fn records(&mut self) -> Records<'_, T> {
        Records::new(self, 0, usize::MAX)
    }

    /// The first `n` records of the log.
    pub fn read_back(&mut self, n: usize) -> Records<'_, T> {
        Records::new(self, 0, n)
    }

    /// The last `n` records of the log. Costs one extra pass over the headers to count them.
    pub fn read_last(&mut self, n: usize) -> Result<Records<'_, T>, Error> {
        let result = self.count_records();
        let (count, _) = self.track(result)?;
        Ok(Records::new(self, count.saturating_sub(n), n))
    }

    /// Walks all headers and reports usage of the device
    pub fn statistics(&mut self) -> Result<LogStatistics, Error> {
        let result = self.count_records();
        let (records, pages_used) = self.track(result)?;

        Ok(LogStatistics {
            record_len: self.record_len,
            records_per_page: self.page_size / self.record_len,
            page_count: self.page_count,
            records: records as u32,
            pages_used,
            cursor: self.cursor(),
        })
    }

    fn count_records(&mut self) -> Result<(usize, u16), Error> {
        let mut walker = Walker::new(self.cursor.buffer.other());
        let mut records = 0;
        let mut pages_used = 0;
        let mut last_page = None;
        loop {
            match walker.next_step(self)? {
                Step::Record(location) => {
                    records += 1;
                    if last_page != Some(location.page) {
                        last_page = Some(location.page);
                        pages_used += 1;
                    }
                }
                Step::End(_) => return Ok((records, pages_used)),
            }
        }
    }

    /// Latches backend failures, the cursor can not be trusted afterward.
    pub(crate) fn track<R>(&mut self, result: Result<R, Error>) -> Result<R, Error> {
        if matches!(result, Err(Error::FlashError) | Err(Error::DeviceNotReady)) {
            self.faulted = true;
        }
        result
    }
}

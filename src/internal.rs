use crate::error::Error;
use crate::platform::{BufferId, Platform};
use crate::raw::{self, ERASED, HEADER_SIZE, MAX_RECORD_LEN};
use crate::{Cursor, Datalog, FullPolicy, ScanOutcome, State};
#[cfg(feature = "defmt")]
use defmt::trace;
#[cfg(feature = "defmt")]
use defmt::warn;

/// Bytes written per call while filling a buffer with the erased pattern.
const SCRUB_CHUNK: usize = 64;

/// A record found by the walker. `buffer` holds the page the record was read from.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Location {
    pub(crate) buffer: BufferId,
    pub(crate) page: u16,
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct End {
    pub(crate) outcome: ScanOutcome,
    /// Set if the walk stopped on a header that decoded but described an impossible record.
    pub(crate) corrupt: Option<(u16, usize)>,
}

pub(crate) enum Step {
    Record(Location),
    End(End),
}

/// Header directed walk over the device, shared by the recovery scan and the reader.
///
/// Pages are loaded into the scratch buffer one after the other. Within a page the walker hops from
/// header to header until a header fails to decode. If the last record seen would not fit again
/// behind that point the page counts as full and the walk continues on the next page, otherwise the
/// walk ends there.
///
/// The page the log is currently writing to is read from the active buffer instead, so records that
/// have not been committed yet are visible and the walk always ends at the write cursor.
pub(crate) struct Walker {
    scratch: BufferId,
    page: u16,
    offset: usize,
    last_len: usize,
    source: Option<BufferId>,
    corrupt: bool,
    end: Option<End>,
}

impl Walker {
    pub(crate) fn new(scratch: BufferId) -> Self {
        Self {
            scratch,
            page: 0,
            offset: 0,
            last_len: 0,
            source: None,
            corrupt: false,
            end: None,
        }
    }

    pub(crate) fn next_step<T: Platform>(&mut self, log: &mut Datalog<T>) -> Result<Step, Error> {
        loop {
            if let Some(end) = self.end {
                return Ok(Step::End(end));
            }

            let source = match self.source {
                Some(buffer) => buffer,
                None => {
                    let buffer = log.page_source(self.page, self.scratch)?;
                    self.source = Some(buffer);
                    buffer
                }
            };

            if self.offset + HEADER_SIZE <= log.page_size {
                let mut header = [0u8; HEADER_SIZE];
                log.hal
                    .read_buffer(source, self.offset, &mut header)
                    .map_err(|_| Error::FlashError)?;

                match raw::decode_header(header) {
                    Some(len)
                        if len as usize >= HEADER_SIZE
                            && self.offset + len as usize <= log.page_size =>
                    {
                        let location = Location {
                            buffer: source,
                            page: self.page,
                            offset: self.offset,
                            len: len as usize,
                        };
                        self.offset += location.len;
                        self.last_len = location.len;
                        return Ok(Step::Record(location));
                    }
                    Some(_len) => {
                        #[cfg(feature = "defmt")]
                        warn!(
                            "walk: implausible header @{}[{}]: length {}",
                            self.page, self.offset, _len
                        );
                        self.corrupt = true;
                    }
                    None => {}
                }
            }

            if self.last_len > 0 && self.offset + self.last_len > log.page_size {
                #[cfg(feature = "defmt")]
                trace!("walk: page {} full", self.page);

                if self.page as usize + 1 >= log.page_count as usize {
                    self.end = Some(End {
                        outcome: ScanOutcome::Full,
                        corrupt: None,
                    });
                } else {
                    self.page += 1;
                    self.offset = 0;
                    self.last_len = 0;
                    self.source = None;
                    self.corrupt = false;
                }
                continue;
            }

            let outcome = if self.page == 0 && self.offset == 0 {
                ScanOutcome::Empty
            } else {
                ScanOutcome::Resume {
                    page: self.page,
                    offset: self.offset,
                }
            };
            self.end = Some(End {
                outcome,
                corrupt: self.corrupt.then_some((self.page, self.offset)),
            });
        }
    }
}

impl<T: Platform> Datalog<T> {
    pub(crate) fn resume(&mut self) -> Result<Cursor, Error> {
        match self.scan_device()? {
            ScanOutcome::Empty => self.start_at(0, 0),
            ScanOutcome::Resume { page, offset } if offset + self.record_len <= self.page_size => {
                self.start_at(page, offset)
            }
            // the records on the medium are shorter than ours and left too little room
            ScanOutcome::Resume { page, .. } => match self.next_page(page) {
                Some(next) => self.start_at(next, 0),
                None => self.device_full(),
            },
            ScanOutcome::Full => self.device_full(),
        }
    }

    fn device_full(&mut self) -> Result<Cursor, Error> {
        match self.config.on_full {
            FullPolicy::Wrap => {
                #[cfg(feature = "defmt")]
                warn!("device full, wrapping around to page 0");
                self.start_at(0, 0)
            }
            FullPolicy::Stop => {
                #[cfg(feature = "defmt")]
                warn!("device full");
                self.state = State::Exhausted;
                Err(Error::DeviceFull)
            }
        }
    }

    /// Moves the cursor to `page`/`offset` on buffer one and prepares the buffer: a partially
    /// written page is loaded so its records survive the next commit, a fresh page is scrubbed.
    pub(crate) fn start_at(&mut self, page: u16, offset: usize) -> Result<Cursor, Error> {
        let buffer = BufferId::One;
        if offset == 0 {
            // buffer one may still be committing the page of a previous session
            self.wait_ready()?;
            self.scrub_buffer(buffer)?;
        } else {
            self.load_page(buffer, page)?;
        }

        self.cursor = Cursor {
            buffer,
            page,
            offset,
        };
        self.state = State::Active;
        Ok(self.cursor)
    }

    /// Writes the record at the cursor, then rolls over if the next record would not fit.
    ///
    /// The record length is constant, so the check after the write guarantees the page capacity
    /// is respected by every following write. Variable length records would need the check before
    /// the write instead.
    pub(crate) fn append_record(&mut self, payload: &[u8]) -> Result<(), Error> {
        let len = self.record_len;
        debug_assert!(self.cursor.offset + len <= self.page_size);

        let mut record = [ERASED; MAX_RECORD_LEN];
        let header = raw::encode_header(len as u8);
        record[..HEADER_SIZE].copy_from_slice(&header);
        record[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        if self.config.integrity {
            let end = HEADER_SIZE + payload.len();
            record[end] = raw::integrity_byte(T::crc32, &record[..end]);
        }

        #[cfg(feature = "defmt")]
        trace!(
            "append: buffer {} @{}[{}]",
            self.cursor.buffer,
            self.cursor.page,
            self.cursor.offset
        );

        self.hal
            .write_buffer(self.cursor.buffer, self.cursor.offset, &record[..len])
            .map_err(|_| Error::FlashError)?;
        self.cursor.offset += len;

        if self.cursor.offset + len > self.page_size {
            self.roll_over()?;
        }

        Ok(())
    }

    /// Commits the active buffer and continues on the other buffer with the next page. The commit
    /// runs in the background while the other buffer is filled.
    fn roll_over(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!(
            "roll_over: buffer {} -> page {}",
            self.cursor.buffer,
            self.cursor.page
        );

        self.wait_ready()?;
        self.hal
            .commit_buffer(self.cursor.buffer, self.cursor.page)
            .map_err(|_| Error::FlashError)?;

        let next = match self.next_page(self.cursor.page) {
            Some(next) => next,
            None => {
                #[cfg(feature = "defmt")]
                warn!("roll_over: last page written, device full");
                self.state = State::Exhausted;
                return Ok(());
            }
        };

        let buffer = self.cursor.buffer.other();
        self.scrub_buffer(buffer)?;
        self.cursor = Cursor {
            buffer,
            page: next,
            offset: 0,
        };
        Ok(())
    }

    /// The page after `page`, wrapping to 0 if the policy allows it.
    fn next_page(&self, page: u16) -> Option<u16> {
        if (page as usize) + 1 < self.page_count as usize {
            Some(page + 1)
        } else {
            match self.config.on_full {
                FullPolicy::Wrap => Some(0),
                FullPolicy::Stop => None,
            }
        }
    }

    pub(crate) fn flush_active(&mut self) -> Result<(), Error> {
        if self.cursor.offset == 0 {
            return Ok(());
        }

        #[cfg(feature = "defmt")]
        trace!(
            "flush: buffer {} -> page {}",
            self.cursor.buffer,
            self.cursor.page
        );

        self.wait_ready()?;
        self.hal
            .commit_buffer(self.cursor.buffer, self.cursor.page)
            .map_err(|_| Error::FlashError)?;
        self.wait_ready()
    }

    pub(crate) fn scan_device(&mut self) -> Result<ScanOutcome, Error> {
        let mut walker = Walker::new(self.cursor.buffer.other());
        loop {
            if let Step::End(end) = walker.next_step(self)? {
                #[cfg(feature = "defmt")]
                trace!("scan: {}", end.outcome);
                return Ok(end.outcome);
            }
        }
    }

    pub(crate) fn erase_device(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_device");

        self.state = State::Uninitialized;
        self.wait_ready()?;
        self.hal.erase_chip().map_err(|_| Error::FlashError)?;
        self.wait_ready()
    }

    /// The buffer to read `page` from, loading it into `scratch` unless it is the page being
    /// assembled.
    pub(crate) fn page_source(&mut self, page: u16, scratch: BufferId) -> Result<BufferId, Error> {
        if self.state == State::Active && page == self.cursor.page {
            return Ok(self.cursor.buffer);
        }
        self.load_page(scratch, page)?;
        Ok(scratch)
    }

    fn load_page(&mut self, buffer: BufferId, page: u16) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("load_page: page {} -> buffer {}", page, buffer);

        self.wait_ready()?;
        self.hal
            .load_page(buffer, page)
            .map_err(|_| Error::FlashError)?;
        self.wait_ready()
    }

    fn scrub_buffer(&mut self, buffer: BufferId) -> Result<(), Error> {
        let erased = [ERASED; SCRUB_CHUNK];
        let mut offset = 0;
        while offset < self.page_size {
            let len = SCRUB_CHUNK.min(self.page_size - offset);
            self.hal
                .write_buffer(buffer, offset, &erased[..len])
                .map_err(|_| Error::FlashError)?;
            offset += len;
        }
        Ok(())
    }

    /// Bounded replacement for busy-waiting on the status register.
    fn wait_ready(&mut self) -> Result<(), Error> {
        for _ in 0..self.config.ready_poll_limit.max(1) {
            if self.hal.is_ready().map_err(|_| Error::FlashError)? {
                return Ok(());
            }
        }

        #[cfg(feature = "defmt")]
        warn!(
            "wait_ready: not ready after {} polls",
            self.config.ready_poll_limit
        );
        Err(Error::DeviceNotReady)
    }
}

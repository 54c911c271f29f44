#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use dataflash_log::platform::BufferId;
use dataflash_log::raw;
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

// AT45DB321D in its default 528 byte page mode
pub const PAGE_SIZE: usize = 528;
pub const PAYLOAD_SIZE: usize = 18;
pub const RECORD_LEN: usize = raw::HEADER_SIZE + PAYLOAD_SIZE;
pub const RECORDS_PER_PAGE: usize = PAGE_SIZE / RECORD_LEN;
pub const BUSY_POLLS: u32 = 3;

pub fn payload(i: usize) -> [u8; PAYLOAD_SIZE] {
    let mut buf = [0u8; PAYLOAD_SIZE];
    for (j, byte) in buf.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_mul(31).wrapping_add(j as u8);
    }
    buf
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    BufferWrite { buffer: u8, offset: usize, len: usize },
    BufferRead { buffer: u8, offset: usize, len: usize },
    Commit { buffer: u8, page: u16 },
    Load { buffer: u8, page: u16 },
    ChipErase,
}

/// Simulated dataflash with two SRAM buffers. Page operations keep the device busy for
/// `busy_polls` status polls, during which the busy buffer must not be touched.
pub struct Dataflash {
    pub pages: Vec<Vec<u8>>,
    pub buffers: [Vec<u8>; 2],
    pub busy_polls: u32,
    pub stuck: bool,
    pub fail_after_operation: usize,
    pub operations: Vec<Operation>,
    pub polls: usize,
    busy: u32,
    busy_buffer: Option<BufferId>,
}

impl Dataflash {
    pub fn new(pages: u16) -> Self {
        Self::with_page_size(pages, PAGE_SIZE)
    }

    pub fn with_page_size(pages: u16, page_size: usize) -> Self {
        Self {
            pages: vec![vec![0xffu8; page_size]; pages as usize],
            // SRAM content is undefined after power up
            buffers: [vec![0x00u8; page_size], vec![0x00u8; page_size]],
            busy_polls: BUSY_POLLS,
            stuck: false,
            fail_after_operation: usize::MAX,
            operations: Vec::new(),
            polls: 0,
            busy: 0,
            busy_buffer: None,
        }
    }

    pub fn new_with_fault(pages: u16, fail_after_operation: usize) -> Self {
        Self {
            fail_after_operation,
            ..Self::new(pages)
        }
    }

    /// Power cycle: pages survive, buffers and pending operations do not.
    pub fn restart(&mut self) {
        for buffer in self.buffers.iter_mut() {
            buffer.fill(0x00);
        }
        self.busy = 0;
        self.busy_buffer = None;
        self.operations.clear();
        self.polls = 0;
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    pub fn commits(&self) -> Vec<(u8, u16)> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::Commit { buffer, page } => Some((*buffer, *page)),
                _ => None,
            })
            .collect()
    }

    pub fn loads(&self) -> Vec<(u8, u16)> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::Load { buffer, page } => Some((*buffer, *page)),
                _ => None,
            })
            .collect()
    }

    /// Places `count` records with the given total length directly on a page.
    pub fn put_records(&mut self, page: u16, offset: usize, total_len: usize, count: usize) {
        let header = raw::encode_header(total_len as u8);
        for i in 0..count {
            let start = offset + i * total_len;
            let record = &mut self.pages[page as usize][start..start + total_len];
            record[..2].copy_from_slice(&header);
            record[2..].fill(i as u8);
        }
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }

    fn record(&mut self, op: Operation) -> Result<(), FlashError> {
        if self.operations.len() >= self.fail_after_operation {
            println!("    dataflash: FAULT");
            return Err(FlashError);
        }
        self.operations.push(op);
        Ok(())
    }

    fn assert_idle(&self) {
        assert_eq!(self.busy, 0, "page operation issued while the device is busy");
    }

    fn assert_not_busy(&self, buffer: BufferId) {
        if self.busy > 0 {
            assert_ne!(
                self.busy_buffer,
                Some(buffer),
                "buffer {buffer} accessed during a page operation"
            );
        }
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Dataflash {
    type Error = FlashError;
}

impl dataflash_log::platform::Dataflash for Dataflash {
    fn page_size(&self) -> usize {
        self.buffers[0].len()
    }

    fn page_count(&self) -> u16 {
        self.pages.len() as u16
    }

    fn write_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), Self::Error> {
        self.assert_not_busy(buffer);
        self.record(Operation::BufferWrite {
            buffer: buffer as u8,
            offset,
            len: bytes.len(),
        })?;
        let idx = buffer as usize - 1;
        self.buffers[idx][offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        bytes: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.assert_not_busy(buffer);
        self.record(Operation::BufferRead {
            buffer: buffer as u8,
            offset,
            len: bytes.len(),
        })?;
        let idx = buffer as usize - 1;
        bytes.copy_from_slice(&self.buffers[idx][offset..offset + bytes.len()]);
        Ok(())
    }

    fn commit_buffer(&mut self, buffer: BufferId, page: u16) -> Result<(), Self::Error> {
        self.assert_idle();
        println!("    dataflash: commit buffer {buffer} -> page {page}");
        self.record(Operation::Commit {
            buffer: buffer as u8,
            page,
        })?;
        let idx = buffer as usize - 1;
        self.pages[page as usize] = self.buffers[idx].clone();
        self.busy = self.busy_polls;
        self.busy_buffer = Some(buffer);
        Ok(())
    }

    fn load_page(&mut self, buffer: BufferId, page: u16) -> Result<(), Self::Error> {
        self.assert_idle();
        println!("    dataflash: load page {page} -> buffer {buffer}");
        self.record(Operation::Load {
            buffer: buffer as u8,
            page,
        })?;
        let idx = buffer as usize - 1;
        self.buffers[idx] = self.pages[page as usize].clone();
        self.busy = self.busy_polls;
        self.busy_buffer = Some(buffer);
        Ok(())
    }

    fn is_ready(&mut self) -> Result<bool, Self::Error> {
        self.polls += 1;
        if self.stuck {
            return Ok(false);
        }
        if self.busy > 0 {
            self.busy -= 1;
            return Ok(false);
        }
        self.busy_buffer = None;
        Ok(true)
    }

    fn erase_chip(&mut self) -> Result<(), Self::Error> {
        self.assert_idle();
        self.record(Operation::ChipErase)?;
        for page in self.pages.iter_mut() {
            page.fill(0xff);
        }
        self.busy = self.busy_polls;
        self.busy_buffer = None;
        Ok(())
    }
}

impl dataflash_log::platform::Crc for Dataflash {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        unsafe { libz_sys::crc32(init as u64, data.as_ptr(), data.len() as u32) as u32 }
    }
}

pub const FLASH_SECTOR_SIZE: usize = 4096;
// Taken from https://github.com/esp-rs/esp-hal/blob/main/esp-storage/src/stub.rs
pub const WORD_SIZE: usize = 4;

#[derive(Debug, PartialEq, Clone)]
pub enum FlashOperation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

/// NOR flash with ESP-like geometry, writes can only clear bits.
#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    pub operations: Vec<FlashOperation>,
}

impl Flash {
    pub fn new(sectors: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::READ_SIZE));

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        self.operations.push(FlashOperation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(FlashOperation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE));
        assert!(!bytes.is_empty());

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(FlashOperation::Write {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // flash can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

impl dataflash_log::platform::Crc for Flash {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        unsafe { libz_sys::crc32(init as u64, data.as_ptr(), data.len() as u32) as u32 }
    }
}

//! Runs the log on plain NOR flash, e.g. the internal flash of a microcontroller.
//!
//! The two staging buffers live in RAM and every log page occupies one erase unit of the flash.
//! Committing a buffer erases the unit and programs the page, which matches the erase-and-program
//! semantics of a dataflash buffer commit.

use crate::error::Error;
use crate::platform::{BufferId, Crc, Dataflash};
use crate::raw::ERASED;
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::trace;
use embedded_storage::nor_flash::{ErrorType, NorFlash, ReadNorFlash};

pub(crate) trait AlignedOps: NorFlash {
    fn align_read(size: usize) -> usize {
        align_ceil(size, Self::READ_SIZE)
    }

    fn align_write_ceil(size: usize) -> usize {
        align_ceil(size, Self::WRITE_SIZE)
    }

    fn align_write_floor(size: usize) -> usize {
        align_floor(size, Self::WRITE_SIZE)
    }
}

#[inline(always)]
const fn align_ceil(size: usize, alignment: usize) -> usize {
    if size.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
const fn align_floor(size: usize, alignment: usize) -> usize {
    if size.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

impl<T: NorFlash> AlignedOps for T {}

/// Two RAM buffers in front of a NOR flash partition.
pub struct NorFlashPages<F: NorFlash> {
    flash: F,
    base_address: usize,
    page_size: usize,
    page_count: u16,
    buffers: [Vec<u8>; 2],
}

impl<F: NorFlash> NorFlashPages<F> {
    /// `partition_offset` and `partition_size` have to be multiples of the erase size, `page_size`
    /// must not exceed it. Every erase unit of the partition becomes one page.
    pub fn new(
        flash: F,
        partition_offset: usize,
        partition_size: usize,
        page_size: usize,
    ) -> Result<Self, Error> {
        if !partition_offset.is_multiple_of(F::ERASE_SIZE) {
            return Err(Error::InvalidPartitionOffset);
        }

        if partition_size == 0 || !partition_size.is_multiple_of(F::ERASE_SIZE) {
            return Err(Error::InvalidPartitionSize);
        }

        if partition_offset + partition_size > flash.capacity() {
            return Err(Error::InvalidPartitionSize);
        }

        let pages = partition_size / F::ERASE_SIZE;
        if pages > u16::MAX as usize {
            return Err(Error::InvalidPartitionSize);
        }

        if page_size == 0 || page_size > F::ERASE_SIZE {
            return Err(Error::InvalidPageSize);
        }

        // room for aligned reads and writes of a whole page, the tail stays erased
        let buffer_len = F::align_read(page_size).max(F::align_write_ceil(page_size));
        Ok(Self {
            flash,
            base_address: partition_offset,
            page_size,
            page_count: pages as u16,
            buffers: [vec![ERASED; buffer_len], vec![ERASED; buffer_len]],
        })
    }

    /// Gives the flash back, e.g. to hand the rest of the chip to other users.
    pub fn into_inner(self) -> F {
        self.flash
    }

    fn page_address(&self, page: u16) -> u32 {
        (self.base_address + page as usize * F::ERASE_SIZE) as u32
    }
}

impl<F: NorFlash> ErrorType for NorFlashPages<F> {
    type Error = F::Error;
}

impl<F: NorFlash> Dataflash for NorFlashPages<F> {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u16 {
        self.page_count
    }

    fn write_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), Self::Error> {
        self.buffers[buffer.index()][offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        bytes: &mut [u8],
    ) -> Result<(), Self::Error> {
        bytes.copy_from_slice(&self.buffers[buffer.index()][offset..offset + bytes.len()]);
        Ok(())
    }

    fn commit_buffer(&mut self, buffer: BufferId, page: u16) -> Result<(), Self::Error> {
        let address = self.page_address(page);

        #[cfg(feature = "defmt")]
        trace!("commit_buffer: buffer {} -> @{:#08x}", buffer, address);

        self.flash.erase(address, address + F::ERASE_SIZE as u32)?;
        write_aligned(
            &mut self.flash,
            address,
            &self.buffers[buffer.index()][..self.page_size],
        )
    }

    fn load_page(&mut self, buffer: BufferId, page: u16) -> Result<(), Self::Error> {
        let address = self.page_address(page);

        #[cfg(feature = "defmt")]
        trace!("load_page: @{:#08x} -> buffer {}", address, buffer);

        let len = F::align_read(self.page_size);
        self.flash
            .read(address, &mut self.buffers[buffer.index()][..len])
    }

    fn is_ready(&mut self) -> Result<bool, Self::Error> {
        // NorFlash operations block until they are done
        Ok(true)
    }

    fn erase_chip(&mut self) -> Result<(), Self::Error> {
        let from = self.page_address(0);
        let to = from + (self.page_count as usize * F::ERASE_SIZE) as u32;
        self.flash.erase(from, to)
    }
}

impl<F: NorFlash + Crc> Crc for NorFlashPages<F> {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        F::crc32(init, data)
    }
}

#[inline(always)]
pub(crate) fn write_aligned<F: NorFlash>(
    flash: &mut F,
    offset: u32,
    bytes: &[u8],
) -> Result<(), F::Error> {
    #[cfg(feature = "defmt")]
    trace!("write_aligned @{:#08x}: [{}]", offset, bytes.len());

    if bytes.len().is_multiple_of(F::WRITE_SIZE) {
        flash.write(offset, bytes)
    } else {
        let pivot = F::align_write_floor(bytes.len());
        let header = &bytes[..pivot];
        let trailer = &bytes[pivot..];
        if !header.is_empty() {
            flash.write(offset, header)?;
        }

        // no need to write the trailer if remaining data is all ones - this the default state of the flash
        if trailer.iter().any(|&e| e != ERASED) {
            let mut buf = vec![ERASED; F::WRITE_SIZE];
            buf[..trailer.len()].copy_from_slice(trailer);
            flash.write(offset + (pivot as u32), &buf)?
        }

        Ok(())
    }
}

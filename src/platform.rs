use embedded_storage::nor_flash::ErrorType;

/// Everything the log needs from the hardware. See README.md for an example implementation.
pub trait Platform: Crc + Dataflash {}

impl<T: Crc + Dataflash> Platform for T {}

pub type FnCrc32 = fn(init: u32, data: &[u8]) -> u32;

pub trait Crc {
    fn crc32(init: u32, data: &[u8]) -> u32;
}

impl<T: Crc> Crc for &mut T {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        T::crc32(init, data)
    }
}

/// One of the two SRAM staging buffers of the device.
#[derive(strum::Display, Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum BufferId {
    One = 1,
    Two = 2,
}

impl BufferId {
    pub const fn other(self) -> BufferId {
        match self {
            BufferId::One => BufferId::Two,
            BufferId::Two => BufferId::One,
        }
    }

    pub(crate) const fn index(self) -> usize {
        self as usize - 1
    }
}

/// Page addressed storage with two staging buffers, modelled after the AT45DB dataflash family.
///
/// Pages are never written directly. Data is assembled in one of the buffers and committed to a
/// page as a whole, which erases the page and programs the complete buffer. Reading goes the other
/// way: a page is loaded into a buffer and then read from there.
///
/// Commits and loads may complete asynchronously; the log polls [`Dataflash::is_ready`] before it
/// issues the next page operation. Writing to the buffer that is not being committed is allowed
/// while the device is busy.
pub trait Dataflash: ErrorType {
    /// Bytes per page and per staging buffer.
    fn page_size(&self) -> usize;

    /// Number of addressable pages, the last page index is `page_count() - 1`.
    fn page_count(&self) -> u16;

    /// No bounds checking is expected, the caller keeps `offset + bytes.len() <= page_size()`.
    fn write_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), Self::Error>;

    fn read_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        bytes: &mut [u8],
    ) -> Result<(), Self::Error>;

    /// Erase `page` and program it with the contents of `buffer`. Idempotent.
    fn commit_buffer(&mut self, buffer: BufferId, page: u16) -> Result<(), Self::Error>;

    fn load_page(&mut self, buffer: BufferId, page: u16) -> Result<(), Self::Error>;

    /// A single, non-blocking status poll.
    fn is_ready(&mut self) -> Result<bool, Self::Error>;

    /// Erase every page of the device.
    fn erase_chip(&mut self) -> Result<(), Self::Error>;
}

impl<T: Dataflash> Dataflash for &mut T {
    fn page_size(&self) -> usize {
        T::page_size(self)
    }

    fn page_count(&self) -> u16 {
        T::page_count(self)
    }

    fn write_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), Self::Error> {
        T::write_buffer(self, buffer, offset, bytes)
    }

    fn read_buffer(
        &mut self,
        buffer: BufferId,
        offset: usize,
        bytes: &mut [u8],
    ) -> Result<(), Self::Error> {
        T::read_buffer(self, buffer, offset, bytes)
    }

    fn commit_buffer(&mut self, buffer: BufferId, page: u16) -> Result<(), Self::Error> {
        T::commit_buffer(self, buffer, page)
    }

    fn load_page(&mut self, buffer: BufferId, page: u16) -> Result<(), Self::Error> {
        T::load_page(self, buffer, page)
    }

    fn is_ready(&mut self) -> Result<bool, Self::Error> {
        T::is_ready(self)
    }

    fn erase_chip(&mut self) -> Result<(), Self::Error> {
        T::erase_chip(self)
    }
}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use esp_storage::FlashStorage;

    use crate::nor::NorFlashPages;
    use crate::platform::Crc;

    /// The internal flash of an ESP chip, one log page per 4k sector.
    pub type EspDataflash<'d> = NorFlashPages<FlashStorage<'d>>;

    impl Crc for FlashStorage<'_> {
        fn crc32(init: u32, data: &[u8]) -> u32 {
            esp_hal::rom::crc::crc32_le(init, data)
        }
    }
}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
pub use chip::*;

//! Events and completion callbacks.
//!
//! The queueing machinery itself lives in the back-ends; this module holds
//! the shared vocabulary: event status, the launch completion callback and
//! the validation performed when buffer transfer commands are recorded.

use crate::error::{Error, Result};
use crate::memobject::{Buffer, SubBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    Failed,
}

/// Fired exactly once when every work-group of a launch has finished. An
/// `Err` carries the first failure observed by the back-end.
pub type CompletionCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDir {
    Read,
    Write,
}

/// A validated buffer read or write command.
#[derive(Debug)]
pub struct BufferRwEvent {
    dir: TransferDir,
    offset: usize,
    len: usize,
    status: EventStatus,
}

impl BufferRwEvent {
    pub fn read(buffer: &Buffer, offset: usize, len: usize) -> Result<Self> {
        Self::new(TransferDir::Read, buffer.len(), None, offset, len, 0)
    }

    pub fn write(buffer: &Buffer, offset: usize, len: usize) -> Result<Self> {
        Self::new(TransferDir::Write, buffer.len(), None, offset, len, 0)
    }

    /// Transfers against a sub-buffer additionally check that its origin
    /// honors the device's base-address alignment.
    pub fn read_sub(
        sub: &SubBuffer,
        offset: usize,
        len: usize,
        align_bits: u32,
    ) -> Result<Self> {
        Self::new(
            TransferDir::Read,
            sub.len(),
            Some(sub.origin()),
            offset,
            len,
            align_bits,
        )
    }

    pub fn write_sub(
        sub: &SubBuffer,
        offset: usize,
        len: usize,
        align_bits: u32,
    ) -> Result<Self> {
        Self::new(
            TransferDir::Write,
            sub.len(),
            Some(sub.origin()),
            offset,
            len,
            align_bits,
        )
    }

    fn new(
        dir: TransferDir,
        size: usize,
        sub_origin: Option<usize>,
        offset: usize,
        len: usize,
        align_bits: u32,
    ) -> Result<Self> {
        if offset.checked_add(len).is_none_or(|end| end > size) {
            return Err(Error::InvalidBufferRange { offset, len, size });
        }

        if let Some(origin) = sub_origin {
            check_sub_alignment(origin, align_bits)?;
        }

        Ok(Self {
            dir,
            offset,
            len,
            status: EventStatus::Queued,
        })
    }

    pub fn dir(&self) -> TransferDir {
        self.dir
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn set_status(&mut self, status: EventStatus) {
        self.status = status;
    }
}

fn check_sub_alignment(origin: usize, align_bits: u32) -> Result<()> {
    let mask = match 1usize.checked_shl(align_bits) {
        Some(bit) => bit - 1,
        None => usize::MAX,
    };

    if origin & mask != 0 {
        return Err(Error::MisalignedSubBuffer { origin, align_bits });
    }

    Ok(())
}

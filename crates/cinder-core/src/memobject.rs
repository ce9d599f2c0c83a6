//! Memory objects: buffers, sub-buffers and images.
//!
//! Storage is host-backed. Compiled kernels receive raw pointers into these
//! objects and write through them while the host only reads results after
//! launch completion, so the backing store lives behind an `UnsafeCell`.

use std::cell::UnsafeCell;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Channel layout of an image, numbered as the compute API does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChannelOrder {
    R = 0x10B0,
    A = 0x10B1,
    Rg = 0x10B2,
    Ra = 0x10B3,
    Rgb = 0x10B4,
    Rgba = 0x10B5,
    Bgra = 0x10B6,
    Argb = 0x10B7,
    Intensity = 0x10B8,
    Luminance = 0x10B9,
    Rx = 0x10BA,
    Rgx = 0x10BB,
    Rgbx = 0x10BC,
}

impl ChannelOrder {
    pub fn channel_count(self) -> usize {
        match self {
            ChannelOrder::R
            | ChannelOrder::A
            | ChannelOrder::Intensity
            | ChannelOrder::Luminance
            | ChannelOrder::Rx => 1,
            ChannelOrder::Rg | ChannelOrder::Ra | ChannelOrder::Rgx => 2,
            ChannelOrder::Rgb | ChannelOrder::Rgbx => 3,
            ChannelOrder::Rgba | ChannelOrder::Bgra | ChannelOrder::Argb => 4,
        }
    }
}

/// Per-channel storage format, numbered as the compute API does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChannelType {
    SnormInt8 = 0x10D0,
    SnormInt16 = 0x10D1,
    UnormInt8 = 0x10D2,
    UnormInt16 = 0x10D3,
    SignedInt8 = 0x10D7,
    SignedInt16 = 0x10D8,
    SignedInt32 = 0x10D9,
    UnsignedInt8 = 0x10DA,
    UnsignedInt16 = 0x10DB,
    UnsignedInt32 = 0x10DC,
    Float32 = 0x10DE,
}

impl ChannelType {
    pub fn bytes_per_channel(self) -> usize {
        match self {
            ChannelType::SnormInt8
            | ChannelType::UnormInt8
            | ChannelType::SignedInt8
            | ChannelType::UnsignedInt8 => 1,
            ChannelType::SnormInt16
            | ChannelType::UnormInt16
            | ChannelType::SignedInt16
            | ChannelType::UnsignedInt16 => 2,
            ChannelType::SignedInt32 | ChannelType::UnsignedInt32 | ChannelType::Float32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub order: ChannelOrder,
    pub ty: ChannelType,
}

impl ImageFormat {
    pub fn new(order: ChannelOrder, ty: ChannelType) -> Self {
        Self { order, ty }
    }

    pub fn pixel_size(self) -> usize {
        self.order.channel_count() * self.ty.bytes_per_channel()
    }
}

/// A plain byte buffer on the host.
#[derive(Debug)]
pub struct Buffer {
    data: UnsafeCell<Vec<u8>>,
}

// SAFETY: kernels of one launch write disjoint ranges and the host only
// touches the data outside of a launch; the runtime never hands the same
// range to concurrent writers.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    pub fn new(len: usize) -> Self {
        Self {
            data: UnsafeCell::new(vec![0; len]),
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: UnsafeCell::new(data),
        }
    }

    pub fn len(&self) -> usize {
        unsafe { (*self.data.get()).len() }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw pointer handed to compiled kernels.
    pub fn data_ptr(&self) -> *mut u8 {
        unsafe { (*self.data.get()).as_mut_ptr() }
    }

    /// Copies a range out of the buffer. Host-side use only.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.check_range(offset, out.len())?;
        unsafe {
            out.copy_from_slice(&(&*self.data.get())[offset..offset + out.len()]);
        }
        Ok(())
    }

    /// Copies a range into the buffer. Host-side use only.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;
        unsafe {
            (&mut *self.data.get())[offset..offset + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.len()) {
            return Err(Error::InvalidBufferRange {
                offset,
                len,
                size: self.len(),
            });
        }
        Ok(())
    }

    /// Creates a sub-buffer over `origin..origin + len`.
    pub fn sub_buffer(self: &Arc<Self>, origin: usize, len: usize) -> Result<SubBuffer> {
        self.check_range(origin, len)?;
        Ok(SubBuffer {
            parent: Arc::clone(self),
            origin,
            len,
        })
    }
}

/// A window into a parent buffer.
#[derive(Debug, Clone)]
pub struct SubBuffer {
    parent: Arc<Buffer>,
    origin: usize,
    len: usize,
}

impl SubBuffer {
    pub fn parent(&self) -> &Arc<Buffer> {
        &self.parent
    }

    pub fn origin(&self) -> usize {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data_ptr(&self) -> *mut u8 {
        unsafe { self.parent.data_ptr().add(self.origin) }
    }
}

/// A 2-D or 3-D image with explicit row and slice pitches.
#[derive(Debug)]
pub struct Image {
    width: usize,
    height: usize,
    depth: usize,
    row_pitch: usize,
    slice_pitch: usize,
    format: ImageFormat,
    data: UnsafeCell<Vec<u8>>,
}

// SAFETY: as for `Buffer`, writers of one launch target disjoint texels.
unsafe impl Send for Image {}
unsafe impl Sync for Image {}

impl Image {
    /// A 2-D image. A zero `row_pitch` means tightly packed rows.
    pub fn new_2d(width: usize, height: usize, row_pitch: usize, format: ImageFormat) -> Self {
        Self::new_3d(width, height, 1, row_pitch, 0, format)
    }

    /// A 3-D image. Zero pitches mean tightly packed rows and slices.
    pub fn new_3d(
        width: usize,
        height: usize,
        depth: usize,
        row_pitch: usize,
        slice_pitch: usize,
        format: ImageFormat,
    ) -> Self {
        let row_pitch = if row_pitch == 0 {
            width * format.pixel_size()
        } else {
            row_pitch
        };
        let slice_pitch = if slice_pitch == 0 {
            row_pitch * height
        } else {
            slice_pitch
        };

        Self {
            width,
            height,
            depth,
            row_pitch,
            slice_pitch,
            format,
            data: UnsafeCell::new(vec![0; slice_pitch * depth]),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    pub fn slice_pitch(&self) -> usize {
        self.slice_pitch
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn pixel_size(&self) -> usize {
        self.format.pixel_size()
    }

    pub fn is_3d(&self) -> bool {
        self.depth > 1
    }

    pub fn data_ptr(&self) -> *mut u8 {
        unsafe { (*self.data.get()).as_mut_ptr() }
    }

    /// Image bytes for host-side inspection.
    ///
    /// # Safety
    /// Callers must ensure no kernel is concurrently writing the image.
    pub unsafe fn bytes(&self) -> &[u8] {
        &*self.data.get()
    }
}

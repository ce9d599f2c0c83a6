//! Image data-layout handling: channel swizzling, format narrowing and
//! texel addressing.
//!
//! Sampling and filtering happen in compiled kernel code; the host side
//! only rearranges channels between the canonical RGBA register layout and
//! the image's storage order, narrows 32-bit components to the storage
//! format, and computes texel addresses.

use cinder_core::memobject::{ChannelOrder, ChannelType, Image};

/// Rearranges a stored texel into canonical RGBA channel positions.
/// Missing channels read as zero, a missing alpha reads as `t_max`.
pub fn swizzle_read(texel: [u32; 4], order: ChannelOrder, t_max: u32) -> [u32; 4] {
    let [x, y, z, w] = texel;
    match order {
        ChannelOrder::R | ChannelOrder::Rx => [x, 0, 0, t_max],
        ChannelOrder::A => [0, 0, 0, x],
        ChannelOrder::Intensity => [x, x, x, x],
        ChannelOrder::Luminance => [x, x, x, t_max],
        ChannelOrder::Rg | ChannelOrder::Rgx => [x, y, 0, t_max],
        ChannelOrder::Ra => [x, 0, 0, y],
        ChannelOrder::Rgb | ChannelOrder::Rgbx | ChannelOrder::Rgba => texel,
        ChannelOrder::Argb => [y, z, w, x],
        ChannelOrder::Bgra => [z, y, x, w],
    }
}

/// Rearranges a canonical RGBA color into the image's storage order.
/// Channels the order does not store are dropped on the copy-out.
pub fn swizzle_store(color: [u32; 4], order: ChannelOrder) -> [u32; 4] {
    let [x, y, z, w] = color;
    match order {
        ChannelOrder::A => [w, w, w, w],
        ChannelOrder::Ra => [x, w, w, w],
        ChannelOrder::Argb => [w, x, y, z],
        ChannelOrder::Bgra => [z, y, x, w],
        _ => color,
    }
}

/// Narrows four float components into the staging buffer at the storage
/// format's component stride.
fn narrow_f(staging: &mut [u8; 16], color: [f32; 4], ty: ChannelType) {
    for (i, c) in color.into_iter().enumerate() {
        match ty {
            ChannelType::Float32 => {
                staging[i * 4..i * 4 + 4].copy_from_slice(&c.to_ne_bytes());
            }
            ChannelType::SnormInt8 => staging[i] = (c * 127.0) as i8 as u8,
            ChannelType::SnormInt16 => {
                staging[i * 2..i * 2 + 2].copy_from_slice(&((c * 32767.0) as i16).to_ne_bytes());
            }
            ChannelType::UnormInt8 => staging[i] = (c * 255.0) as u8,
            ChannelType::UnormInt16 => {
                staging[i * 2..i * 2 + 2].copy_from_slice(&((c * 65535.0) as u16).to_ne_bytes());
            }
            // Integer formats are not written through the float path.
            _ => {}
        }
    }
}

fn narrow_i(staging: &mut [u8; 16], color: [i32; 4], ty: ChannelType) {
    for (i, c) in color.into_iter().enumerate() {
        match ty {
            ChannelType::SignedInt32 => {
                staging[i * 4..i * 4 + 4].copy_from_slice(&c.to_ne_bytes());
            }
            ChannelType::SignedInt8 => staging[i] = c as i8 as u8,
            ChannelType::SignedInt16 => {
                staging[i * 2..i * 2 + 2].copy_from_slice(&(c as i16).to_ne_bytes());
            }
            _ => {}
        }
    }
}

fn narrow_ui(staging: &mut [u8; 16], color: [u32; 4], ty: ChannelType) {
    for (i, c) in color.into_iter().enumerate() {
        match ty {
            ChannelType::UnsignedInt32 => {
                staging[i * 4..i * 4 + 4].copy_from_slice(&c.to_ne_bytes());
            }
            ChannelType::UnsignedInt8 => staging[i] = c as u8,
            ChannelType::UnsignedInt16 => {
                staging[i * 2..i * 2 + 2].copy_from_slice(&(c as u16).to_ne_bytes());
            }
            _ => {}
        }
    }
}

/// Address of the texel at `(x, y, z)`.
pub(crate) fn texel_ptr(image: &Image, x: i32, y: i32, z: i32) -> *mut u8 {
    let offset = z as usize * image.slice_pitch()
        + y as usize * image.row_pitch()
        + x as usize * image.pixel_size();
    unsafe { image.data_ptr().add(offset) }
}

fn store_pixel(image: &Image, x: i32, y: i32, z: i32, staging: &[u8; 16]) {
    let target = texel_ptr(image, x, y, z);
    unsafe {
        std::ptr::copy_nonoverlapping(staging.as_ptr(), target, image.pixel_size());
    }
}

/// Writes a float color: swizzle to the storage order, narrow to the
/// storage format, copy `pixel_size` bytes into the image.
pub fn write_image_f(image: &Image, x: i32, y: i32, z: i32, color: [f32; 4]) {
    let format = image.format();
    let swizzled = swizzle_store(color.map(f32::to_bits), format.order).map(f32::from_bits);

    let mut staging = [0u8; 16];
    narrow_f(&mut staging, swizzled, format.ty);
    store_pixel(image, x, y, z, &staging);
}

/// Writes a signed integer color.
pub fn write_image_i(image: &Image, x: i32, y: i32, z: i32, color: [i32; 4]) {
    let format = image.format();
    let swizzled = swizzle_store(color.map(|c| c as u32), format.order).map(|c| c as i32);

    let mut staging = [0u8; 16];
    narrow_i(&mut staging, swizzled, format.ty);
    store_pixel(image, x, y, z, &staging);
}

/// Writes an unsigned integer color.
pub fn write_image_ui(image: &Image, x: i32, y: i32, z: i32, color: [u32; 4]) {
    let format = image.format();
    let swizzled = swizzle_store(color, format.order);

    let mut staging = [0u8; 16];
    narrow_ui(&mut staging, swizzled, format.ty);
    store_pixel(image, x, y, z, &staging);
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::memobject::ImageFormat;

    #[test]
    fn test_swizzle_read_single_channel_orders() {
        let texel = [7, 0, 0, 0];
        assert_eq!(swizzle_read(texel, ChannelOrder::R, 255), [7, 0, 0, 255]);
        assert_eq!(swizzle_read(texel, ChannelOrder::A, 255), [0, 0, 0, 7]);
        assert_eq!(
            swizzle_read(texel, ChannelOrder::Intensity, 255),
            [7, 7, 7, 7]
        );
        assert_eq!(
            swizzle_read(texel, ChannelOrder::Luminance, 255),
            [7, 7, 7, 255]
        );
    }

    #[test]
    fn test_swizzle_read_reordering() {
        let texel = [1, 2, 3, 4];
        assert_eq!(swizzle_read(texel, ChannelOrder::Rgba, 9), [1, 2, 3, 4]);
        assert_eq!(swizzle_read(texel, ChannelOrder::Argb, 9), [2, 3, 4, 1]);
        assert_eq!(swizzle_read(texel, ChannelOrder::Bgra, 9), [3, 2, 1, 4]);
        assert_eq!(swizzle_read(texel, ChannelOrder::Ra, 9), [1, 0, 0, 2]);
    }

    #[test]
    fn test_swizzle_round_trip() {
        // Storing then reading a color through a reordered format must give
        // the color back.
        let color = [1, 2, 3, 4];
        for order in [ChannelOrder::Rgba, ChannelOrder::Bgra, ChannelOrder::Argb] {
            let stored = swizzle_store(color, order);
            assert_eq!(swizzle_read(stored, order, 0), color);
        }
    }

    #[test]
    fn test_write_unorm8_bgra() {
        let image = Image::new_2d(
            2,
            2,
            0,
            ImageFormat::new(ChannelOrder::Bgra, ChannelType::UnormInt8),
        );

        write_image_f(&image, 1, 0, 0, [1.0, 0.5, 0.0, 1.0]);

        let bytes = unsafe { image.bytes() };
        // Texel (1, 0): stored as B, G, R, A.
        assert_eq!(&bytes[4..8], &[0, 127, 255, 255]);
    }

    #[test]
    fn test_write_uint32_rgba() {
        let image = Image::new_2d(
            1,
            1,
            0,
            ImageFormat::new(ChannelOrder::Rgba, ChannelType::UnsignedInt32),
        );

        write_image_ui(&image, 0, 0, 0, [1, 2, 3, 4]);

        let bytes = unsafe { image.bytes() };
        let texel: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(texel, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_write_all_four_components_of_int16() {
        let image = Image::new_2d(
            1,
            1,
            0,
            ImageFormat::new(ChannelOrder::Rgba, ChannelType::SignedInt16),
        );

        write_image_i(&image, 0, 0, 0, [-1, 2, -3, 4]);

        let bytes = unsafe { image.bytes() };
        let texel: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(texel, vec![-1, 2, -3, 4]);
    }

    #[test]
    fn test_texel_ptr_uses_pitches() {
        let image = Image::new_3d(
            4,
            4,
            2,
            64,
            512,
            ImageFormat::new(ChannelOrder::Rgba, ChannelType::UnormInt8),
        );
        let base = image.data_ptr() as usize;
        assert_eq!(texel_ptr(&image, 2, 3, 1) as usize - base, 512 + 3 * 64 + 8);
    }
}

//! Built-in dispatch surface linked into compiled kernels.
//!
//! The code generator resolves builtin names to host function pointers via
//! [`resolve`] before a kernel module is executed. The shims are plain
//! `extern "C"` functions; a compiled kernel calls them with no context
//! argument, so they locate the executor through a thread-local pointer
//! installed by [`WorkGroup::run`](crate::work_group::WorkGroup::run).
//! Everything below the shims takes the work-group explicitly.

use std::cell::Cell;
use std::ptr;

use tracing::warn;

use cinder_core::memobject::Image;

use crate::image;
use crate::work_group::WorkGroup;

thread_local! {
    static CURRENT_WORK_GROUP: Cell<*const WorkGroup> = const { Cell::new(ptr::null()) };
}

pub(crate) fn set_current_work_group(wg: &WorkGroup) {
    CURRENT_WORK_GROUP.with(|current| current.set(wg as *const WorkGroup));
}

pub(crate) fn clear_current_work_group() {
    CURRENT_WORK_GROUP.with(|current| current.set(ptr::null()));
}

fn with_current<R>(f: impl FnOnce(&WorkGroup) -> R) -> Option<R> {
    CURRENT_WORK_GROUP.with(|current| {
        let wg = current.get();
        if wg.is_null() {
            None
        } else {
            // SAFETY: the pointer is set by WorkGroup::run for the extent
            // of the execution and cleared before it returns; kernel code
            // (and with it every shim call) only runs inside that window.
            Some(f(unsafe { &*wg }))
        }
    })
}

/*
 * Identity and coordination builtins
 */

pub extern "C" fn get_work_dim() -> u32 {
    with_current(|wg| wg.work_dim()).unwrap_or(1)
}

pub extern "C" fn get_global_size(dim: u32) -> usize {
    with_current(|wg| wg.global_size(dim)).unwrap_or(1)
}

pub extern "C" fn get_local_size(dim: u32) -> usize {
    with_current(|wg| wg.local_size(dim)).unwrap_or(1)
}

pub extern "C" fn get_global_offset(dim: u32) -> usize {
    with_current(|wg| wg.global_offset(dim)).unwrap_or(0)
}

pub extern "C" fn get_num_groups(dim: u32) -> usize {
    with_current(|wg| wg.num_groups(dim)).unwrap_or(1)
}

pub extern "C" fn get_group_id(dim: u32) -> usize {
    with_current(|wg| wg.group_id(dim)).unwrap_or(0)
}

pub extern "C" fn get_local_id(dim: u32) -> usize {
    with_current(|wg| wg.local_id(dim)).unwrap_or(0)
}

pub extern "C" fn get_global_id(dim: u32) -> usize {
    with_current(|wg| wg.global_id(dim)).unwrap_or(0)
}

pub extern "C" fn barrier(flags: u32) {
    let _ = with_current(|wg| wg.barrier(flags));
}

/// Base of the per-work-group `__local` block.
pub extern "C" fn local_mem_base() -> *mut u8 {
    with_current(|wg| wg.local_mem_base()).unwrap_or(ptr::null_mut())
}

/*
 * Image builtins. Image arguments reach the kernel as opaque host
 * pointers; the shims are the only code that looks through them.
 */

/// # Safety
/// `image` must be a live [`Image`] bound as a kernel argument.
pub unsafe extern "C" fn get_image_width(image: *const Image) -> i32 {
    (*image).width() as i32
}

/// # Safety
/// `image` must be a live [`Image`] bound as a kernel argument.
pub unsafe extern "C" fn get_image_height(image: *const Image) -> i32 {
    (*image).height() as i32
}

/// # Safety
/// `image` must be a live [`Image`] bound as a kernel argument.
pub unsafe extern "C" fn get_image_depth(image: *const Image) -> i32 {
    if !(*image).is_3d() {
        return 1;
    }
    (*image).depth() as i32
}

/// # Safety
/// `image` must be a live [`Image`] bound as a kernel argument.
pub unsafe extern "C" fn get_image_channel_data_type(image: *const Image) -> i32 {
    (*image).format().ty as i32
}

/// # Safety
/// `image` must be a live [`Image`] bound as a kernel argument.
pub unsafe extern "C" fn get_image_channel_order(image: *const Image) -> i32 {
    (*image).format().order as i32
}

/// # Safety
/// `image` must be a live [`Image`] bound as a kernel argument.
pub unsafe extern "C" fn is_image_3d(image: *const Image) -> i32 {
    (*image).is_3d() as i32
}

/// Pointer to the texel at `(x, y, z)`, with the image's channel order and
/// data type written through `order` and `ty`.
///
/// # Safety
/// `image` must be a live [`Image`]; `order` and `ty` must be writable.
pub unsafe extern "C" fn image_data(
    image: *const Image,
    x: i32,
    y: i32,
    z: i32,
    order: *mut i32,
    ty: *mut i32,
) -> *mut u8 {
    let image = &*image;
    *order = image.format().order as i32;
    *ty = image.format().ty as i32;
    image::texel_ptr(image, x, y, z)
}

/// # Safety
/// `image` must be a live [`Image`]; `color` must point to four floats.
pub unsafe extern "C" fn write_imagef(
    image: *const Image,
    x: i32,
    y: i32,
    z: i32,
    color: *const f32,
) {
    image::write_image_f(&*image, x, y, z, *(color as *const [f32; 4]));
}

/// # Safety
/// `image` must be a live [`Image`]; `color` must point to four ints.
pub unsafe extern "C" fn write_imagei(
    image: *const Image,
    x: i32,
    y: i32,
    z: i32,
    color: *const i32,
) {
    image::write_image_i(&*image, x, y, z, *(color as *const [i32; 4]));
}

/// # Safety
/// `image` must be a live [`Image`]; `color` must point to four uints.
pub unsafe extern "C" fn write_imageui(
    image: *const Image,
    x: i32,
    y: i32,
    z: i32,
    color: *const u32,
) {
    image::write_image_ui(&*image, x, y, z, *(color as *const [u32; 4]));
}

extern "C" fn unimplemented_stub() {}

/// Resolves a builtin name to the host function the code generator should
/// link against. Unknown names get a benign no-op stub and a diagnostic.
pub fn resolve(name: &str) -> *const () {
    match name {
        "get_work_dim" => get_work_dim as extern "C" fn() -> u32 as *const (),
        "get_global_size" => get_global_size as extern "C" fn(u32) -> usize as *const (),
        "get_local_size" => get_local_size as extern "C" fn(u32) -> usize as *const (),
        "get_global_offset" => get_global_offset as extern "C" fn(u32) -> usize as *const (),
        "get_num_groups" => get_num_groups as extern "C" fn(u32) -> usize as *const (),
        "get_group_id" => get_group_id as extern "C" fn(u32) -> usize as *const (),
        "get_local_id" => get_local_id as extern "C" fn(u32) -> usize as *const (),
        "get_global_id" => get_global_id as extern "C" fn(u32) -> usize as *const (),
        "barrier" => barrier as extern "C" fn(u32) as *const (),

        "__cpu_local_mem_base" => local_mem_base as extern "C" fn() -> *mut u8 as *const (),

        "__cpu_get_image_width" => {
            get_image_width as unsafe extern "C" fn(*const Image) -> i32 as *const ()
        }
        "__cpu_get_image_height" => {
            get_image_height as unsafe extern "C" fn(*const Image) -> i32 as *const ()
        }
        "__cpu_get_image_depth" => {
            get_image_depth as unsafe extern "C" fn(*const Image) -> i32 as *const ()
        }
        "__cpu_get_image_channel_data_type" => {
            get_image_channel_data_type as unsafe extern "C" fn(*const Image) -> i32 as *const ()
        }
        "__cpu_get_image_channel_order" => {
            get_image_channel_order as unsafe extern "C" fn(*const Image) -> i32 as *const ()
        }
        "__cpu_is_image_3d" => {
            is_image_3d as unsafe extern "C" fn(*const Image) -> i32 as *const ()
        }
        "__cpu_image_data" => {
            image_data
                as unsafe extern "C" fn(*const Image, i32, i32, i32, *mut i32, *mut i32) -> *mut u8
                as *const ()
        }
        "__cpu_write_imagef" => {
            write_imagef as unsafe extern "C" fn(*const Image, i32, i32, i32, *const f32)
                as *const ()
        }
        "__cpu_write_imagei" => {
            write_imagei as unsafe extern "C" fn(*const Image, i32, i32, i32, *const i32)
                as *const ()
        }
        "__cpu_write_imageui" => {
            write_imageui as unsafe extern "C" fn(*const Image, i32, i32, i32, *const u32)
                as *const ()
        }

        "debug" => {
            libc::printf as unsafe extern "C" fn(*const libc::c_char, ...) -> libc::c_int
                as *const ()
        }

        _ => {
            match with_current(|wg| wg.kernel_name().to_owned()) {
                Some(kernel) => warn!(
                    builtin = name,
                    kernel = %kernel,
                    "unknown builtin requested; substituting no-op stub"
                ),
                None => warn!(builtin = name, "unknown builtin requested; substituting no-op stub"),
            }
            unimplemented_stub as extern "C" fn() as *const ()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::memobject::{ChannelOrder, ChannelType, ImageFormat};

    #[test]
    fn test_shims_without_work_group_return_identities() {
        clear_current_work_group();
        assert_eq!(get_work_dim(), 1);
        assert_eq!(get_global_size(0), 1);
        assert_eq!(get_local_size(0), 1);
        assert_eq!(get_global_offset(0), 0);
        assert_eq!(get_num_groups(0), 1);
        assert_eq!(get_group_id(0), 0);
        assert_eq!(get_local_id(0), 0);
        assert_eq!(get_global_id(0), 0);
        assert!(local_mem_base().is_null());
    }

    #[test]
    fn test_resolve_known_names() {
        assert_eq!(
            resolve("get_global_id"),
            get_global_id as extern "C" fn(u32) -> usize as *const ()
        );
        assert_eq!(resolve("barrier"), barrier as extern "C" fn(u32) as *const ());
        assert!(!resolve("__cpu_image_data").is_null());
    }

    #[test]
    fn test_resolve_unknown_name_yields_stub() {
        let stub = resolve("definitely_not_a_builtin");
        assert_eq!(stub, unimplemented_stub as extern "C" fn() as *const ());
        // The stub is safe to call.
        let stub: extern "C" fn() = unsafe { std::mem::transmute(stub) };
        stub();
    }

    #[test]
    fn test_image_metadata_shims() {
        let image = Image::new_2d(
            8,
            4,
            0,
            ImageFormat::new(ChannelOrder::Bgra, ChannelType::UnormInt8),
        );

        unsafe {
            assert_eq!(get_image_width(&image), 8);
            assert_eq!(get_image_height(&image), 4);
            assert_eq!(get_image_depth(&image), 1);
            assert_eq!(is_image_3d(&image), 0);
            assert_eq!(get_image_channel_order(&image), ChannelOrder::Bgra as i32);
            assert_eq!(
                get_image_channel_data_type(&image),
                ChannelType::UnormInt8 as i32
            );

            let mut order = 0;
            let mut ty = 0;
            let texel = image_data(&image, 2, 1, 0, &mut order, &mut ty);
            assert_eq!(order, ChannelOrder::Bgra as i32);
            assert_eq!(ty, ChannelType::UnormInt8 as i32);
            assert_eq!(
                texel as usize - image.data_ptr() as usize,
                image.row_pitch() + 2 * image.pixel_size()
            );
        }
    }
}

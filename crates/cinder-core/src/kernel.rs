//! Kernel object model and the native-kernel surface back-ends consume.
//!
//! A [`Kernel`] is minted from a built program. Its compiled entry point and
//! metadata are immutable after construction; only the argument bindings
//! change, and those are snapshotted by the dispatch layer before a launch.
//! Back-ends see kernels exclusively through the [`NativeKernel`] trait.

use crate::error::{Error, Result};
use crate::program::BuiltKernel;

/// Native entry point of a compiled kernel: a zero-argument function with
/// all argument marshaling folded into the module, callable on an arbitrary
/// stack.
pub type KernelEntry = unsafe extern "C" fn();

/// Scalar or object kind of one kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Buffer,
    Image2d,
    Image3d,
}

impl ArgKind {
    /// Size in bytes of one element of this kind. Object kinds are passed
    /// as host pointers.
    pub fn value_size(self) -> usize {
        match self {
            ArgKind::Int8 => 1,
            ArgKind::Int16 => 2,
            ArgKind::Int32 => 4,
            ArgKind::Int64 => 8,
            ArgKind::Float => 4,
            ArgKind::Double => 8,
            ArgKind::Buffer | ArgKind::Image2d | ArgKind::Image3d => {
                std::mem::size_of::<usize>()
            }
        }
    }
}

/// Address space an argument points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    Private,
    Global,
    Local,
    Constant,
}

/// Signature of one kernel argument, as reported by the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgInfo {
    pub kind: ArgKind,
    pub space: AddressSpace,
    pub vec_dim: u16,
}

impl ArgInfo {
    pub fn value_size(&self) -> usize {
        self.kind.value_size() * self.vec_dim as usize
    }
}

#[derive(Debug, Clone)]
enum Binding {
    Data(Vec<u8>),
    NullObject,
    /// A `__local` pointer argument: the block is allocated per work-group
    /// at launch time, only its size is recorded here.
    RuntimeLocal(usize),
}

#[derive(Debug, Clone)]
struct Arg {
    info: ArgInfo,
    binding: Option<Binding>,
}

/// A kernel minted from a built program.
#[derive(Debug)]
pub struct Kernel {
    name: String,
    entry: KernelEntry,
    args: Vec<Arg>,
    work_group_size: usize,
    private_mem_size: usize,
    local_mem_size: usize,
}

impl Kernel {
    pub(crate) fn from_built(built: &BuiltKernel) -> Self {
        Self {
            name: built.name.clone(),
            entry: built.entry,
            args: built
                .args
                .iter()
                .map(|info| Arg {
                    info: *info,
                    binding: None,
                })
                .collect(),
            work_group_size: built.work_group_size,
            private_mem_size: built.private_mem_size,
            local_mem_size: built.local_mem_size,
        }
    }

    pub fn num_args(&self) -> usize {
        self.args.len()
    }

    pub fn arg_info(&self, index: usize) -> Option<&ArgInfo> {
        self.args.get(index).map(|arg| &arg.info)
    }

    /// Binds one argument.
    ///
    /// `__local` arguments take a non-zero size and no value; every other
    /// argument takes exactly `value_size()` bytes. A missing value is
    /// accepted only for object kinds and binds a null object.
    pub fn set_arg(&mut self, index: usize, size: usize, value: Option<&[u8]>) -> Result<()> {
        let num_args = self.args.len();
        let arg = self
            .args
            .get_mut(index)
            .ok_or(Error::InvalidArgIndex { index, num_args })?;

        if arg.info.space == AddressSpace::Local {
            if size == 0 {
                return Err(Error::InvalidArgSize {
                    index,
                    expected: 1,
                    got: 0,
                });
            }
            if value.is_some() {
                return Err(Error::InvalidArgValue { index });
            }
            arg.binding = Some(Binding::RuntimeLocal(size));
            return Ok(());
        }

        let expected = arg.info.value_size();
        if size != expected {
            return Err(Error::InvalidArgSize {
                index,
                expected,
                got: size,
            });
        }

        match value {
            Some(bytes) => {
                if bytes.len() != size {
                    return Err(Error::InvalidArgSize {
                        index,
                        expected,
                        got: bytes.len(),
                    });
                }
                arg.binding = Some(Binding::Data(bytes.to_vec()));
            }
            None => match arg.info.kind {
                ArgKind::Buffer | ArgKind::Image2d | ArgKind::Image3d => {
                    arg.binding = Some(Binding::NullObject);
                }
                _ => return Err(Error::InvalidArgValue { index }),
            },
        }

        Ok(())
    }

    /// True once every argument has been bound.
    pub fn args_specified(&self) -> bool {
        self.args.iter().all(|arg| arg.binding.is_some())
    }

    /// True if any argument requires a per-launch `__local` allocation.
    pub fn needs_local_allocation(&self) -> bool {
        self.args
            .iter()
            .any(|arg| matches!(arg.binding, Some(Binding::RuntimeLocal(_))))
    }

    /// Total `__local` bytes for one work-group: the module's static local
    /// block plus every runtime-sized local argument.
    pub fn total_local_mem_size(&self) -> usize {
        let runtime: usize = self
            .args
            .iter()
            .filter_map(|arg| match arg.binding {
                Some(Binding::RuntimeLocal(size)) => Some(size),
                _ => None,
            })
            .sum();
        self.local_mem_size + runtime
    }
}

/// What a compute back-end needs from a kernel object.
pub trait NativeKernel: Send + Sync {
    fn name(&self) -> &str;
    fn entry(&self) -> KernelEntry;
    /// Safe default work-group size used when the caller does not specify
    /// a local size.
    fn work_group_size(&self) -> usize;
    /// Private memory consumed by one work-item, used to size its stack.
    fn private_mem_size(&self) -> usize;
    /// `__local` bytes required per work-group.
    fn local_mem_size(&self) -> usize;
}

impl NativeKernel for Kernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn entry(&self) -> KernelEntry {
        self.entry
    }

    fn work_group_size(&self) -> usize {
        self.work_group_size
    }

    fn private_mem_size(&self) -> usize {
        self.private_mem_size
    }

    fn local_mem_size(&self) -> usize {
        self.total_local_mem_size()
    }
}

/// Default local size for one dimension: the largest divisor of the global
/// size that does not exceed the kernel's work-group-size hint.
pub fn guess_work_group_size(hint: usize, global: usize) -> usize {
    if global == 0 {
        return 1;
    }
    let cap = hint.clamp(1, global);
    (1..=cap)
        .rev()
        .find(|candidate| global.is_multiple_of(*candidate))
        .unwrap_or(1)
}

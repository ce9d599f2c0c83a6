//! Error types shared across the cinder crates.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid work dimension {0} (expected 1..=3)")]
    InvalidWorkDim(u32),

    #[error("zero local work size in dimension {0}")]
    ZeroLocalSize(u32),

    #[error("global size {global} is not divisible by local size {local} in dimension {dim}")]
    InvalidWorkGroupSize {
        global: usize,
        local: usize,
        dim: u32,
    },

    #[error("argument index {index} out of range for kernel with {num_args} arguments")]
    InvalidArgIndex { index: usize, num_args: usize },

    #[error("argument {index} has size {got}, expected {expected}")]
    InvalidArgSize {
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("invalid value for argument {index}")]
    InvalidArgValue { index: usize },

    #[error("invalid kernel definition: {0}")]
    InvalidKernelDefinition(String),

    #[error("program is in the wrong state: {0}")]
    InvalidProgramState(&'static str),

    #[error("no kernel named {0} in program")]
    KernelNotFound(String),

    #[error("range {offset}..{offset}+{len} out of bounds for buffer of {size} bytes")]
    InvalidBufferRange {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("sub-buffer origin {origin:#x} violates the device alignment of {align_bits} bits")]
    MisalignedSubBuffer { origin: usize, align_bits: u32 },

    #[error("failed to allocate {needed} bytes of work-item context storage")]
    ContextAllocation {
        needed: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("device error: {0}")]
    Device(String),
}

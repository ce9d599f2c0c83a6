//! Program object model.
//!
//! A program moves through the states `Empty -> Loaded -> Built` (or
//! `Failed`). Compiling sources or binaries into native code is the job of
//! an external code generator; a built program only stores the
//! [`BuiltKernel`] records the generator produced and mints [`Kernel`]
//! objects from them.

use tracing::debug;

use crate::error::{Error, Result};
use crate::kernel::{ArgInfo, Kernel, KernelEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramType {
    Invalid,
    Source,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    Empty,
    Loaded,
    Built,
    Failed,
}

/// One kernel as produced by the code generator: its native entry point and
/// the metadata the runtime needs to launch it.
#[derive(Debug, Clone)]
pub struct BuiltKernel {
    pub name: String,
    pub entry: KernelEntry,
    pub work_group_size: usize,
    pub private_mem_size: usize,
    pub local_mem_size: usize,
    pub args: Vec<ArgInfo>,
}

#[derive(Debug)]
pub struct Program {
    ty: ProgramType,
    state: ProgramState,
    source: Option<String>,
    binary: Option<Vec<u8>>,
    build_log: String,
    kernels: Vec<BuiltKernel>,
}

impl Program {
    pub fn new() -> Self {
        Self {
            ty: ProgramType::Invalid,
            state: ProgramState::Empty,
            source: None,
            binary: None,
            build_log: String::new(),
            kernels: Vec::new(),
        }
    }

    pub fn ty(&self) -> ProgramType {
        self.ty
    }

    pub fn state(&self) -> ProgramState {
        self.state
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn build_log(&self) -> &str {
        &self.build_log
    }

    /// Loads source code. Only an empty program can be loaded.
    pub fn load_source(&mut self, source: impl Into<String>) -> Result<()> {
        if self.state != ProgramState::Empty {
            return Err(Error::InvalidProgramState("expected an empty program"));
        }
        self.source = Some(source.into());
        self.ty = ProgramType::Source;
        self.state = ProgramState::Loaded;
        Ok(())
    }

    /// Loads a prebuilt binary previously retrieved from a built program.
    pub fn load_binary(&mut self, binary: Vec<u8>) -> Result<()> {
        if self.state != ProgramState::Empty {
            return Err(Error::InvalidProgramState("expected an empty program"));
        }
        self.binary = Some(binary);
        self.ty = ProgramType::Binary;
        self.state = ProgramState::Loaded;
        Ok(())
    }

    /// Finishes a build with the kernels the code generator produced.
    ///
    /// Kernel names must be unique; a duplicate marks the build failed.
    pub fn build(&mut self, kernels: Vec<BuiltKernel>) -> Result<()> {
        if self.state != ProgramState::Loaded {
            return Err(Error::InvalidProgramState("expected a loaded program"));
        }

        for (i, kernel) in kernels.iter().enumerate() {
            if kernels[..i].iter().any(|other| other.name == kernel.name) {
                self.state = ProgramState::Failed;
                self.build_log
                    .push_str(&format!("duplicate kernel name: {}\n", kernel.name));
                return Err(Error::InvalidKernelDefinition(kernel.name.clone()));
            }
        }

        debug!(kernels = kernels.len(), "program built");
        self.kernels = kernels;
        self.state = ProgramState::Built;
        Ok(())
    }

    /// Marks the build failed and records the compiler output.
    pub fn fail_build(&mut self, log: impl Into<String>) {
        self.build_log = log.into();
        self.state = ProgramState::Failed;
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|kernel| kernel.name.as_str())
    }

    /// Mints a kernel by name from a built program.
    pub fn create_kernel(&self, name: &str) -> Result<Kernel> {
        if self.state != ProgramState::Built {
            return Err(Error::InvalidProgramState("expected a built program"));
        }
        self.kernels
            .iter()
            .find(|kernel| kernel.name == name)
            .map(Kernel::from_built)
            .ok_or_else(|| Error::KernelNotFound(name.to_owned()))
    }

    /// Mints every kernel of a built program.
    pub fn create_kernels(&self) -> Result<Vec<Kernel>> {
        if self.state != ProgramState::Built {
            return Err(Error::InvalidProgramState("expected a built program"));
        }
        Ok(self.kernels.iter().map(Kernel::from_built).collect())
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

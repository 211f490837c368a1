//! Transposition kernel variants and their SPIR-V binaries.
//!
//! GLSL sources are embedded for inspection. Binaries are loaded at runtime
//! through a [`KernelLoader`]; [`SpirvDirectory::builtin`] points at the
//! binaries `build.rs` produced when `glslc` was on `PATH`.

use crate::error::{Result, VulkanError};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// GLSL source of the padded-tile transposition kernel.
pub const NO_BANK_CONFLICTS_GLSL: &str =
    include_str!("../shaders/transposition_no_bank_conflicts.comp");

/// GLSL source of the unpadded-tile transposition kernel.
pub const BANK_CONFLICTS_GLSL: &str = include_str!("../shaders/transposition_bank_conflicts.comp");

/// GLSL source of the copy-only kernel.
pub const TRANSFER_GLSL: &str = include_str!("../shaders/transfer.comp");

/// The three kernels the benchmark compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum KernelVariant {
    /// Transpose through a shared tile padded by one column.
    NoBankConflict,
    /// Transpose through an unpadded shared tile.
    BankConflict,
    /// Plain copy; the bandwidth baseline.
    PureTransfer,
}

impl KernelVariant {
    pub const ALL: [Self; 3] = [Self::NoBankConflict, Self::BankConflict, Self::PureTransfer];

    /// Map the numeric selector (0, 1, 2) to a variant.
    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            0 => Ok(Self::NoBankConflict),
            1 => Ok(Self::BankConflict),
            2 => Ok(Self::PureTransfer),
            other => Err(VulkanError::UnknownVariant(other)),
        }
    }

    pub fn id(self) -> u32 {
        match self {
            Self::NoBankConflict => 0,
            Self::BankConflict => 1,
            Self::PureTransfer => 2,
        }
    }

    /// File name of the binary without extension.
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::NoBankConflict => "transposition_no_bank_conflicts",
            Self::BankConflict => "transposition_bank_conflicts",
            Self::PureTransfer => "transfer",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NoBankConflict => "no bank conflicts",
            Self::BankConflict => "bank conflicts",
            Self::PureTransfer => "pure transfer",
        }
    }

    pub fn glsl_source(self) -> &'static str {
        match self {
            Self::NoBankConflict => NO_BANK_CONFLICTS_GLSL,
            Self::BankConflict => BANK_CONFLICTS_GLSL,
            Self::PureTransfer => TRANSFER_GLSL,
        }
    }

    /// Whether the output is the transpose of the input (otherwise a copy).
    pub fn transposes(self) -> bool {
        !matches!(self, Self::PureTransfer)
    }
}

impl fmt::Display for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Source of SPIR-V code for a kernel variant.
pub trait KernelLoader {
    fn load(&self, variant: KernelVariant) -> Result<Vec<u32>>;
}

/// Loads `<dir>/<stem>.spv` from a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpirvDirectory {
    root: PathBuf,
}

impl SpirvDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory of binaries compiled at build time, if `glslc` was found.
    pub fn builtin() -> Option<Self> {
        option_env!("TRANSPOSE_SPIRV_DIR").map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, variant: KernelVariant) -> PathBuf {
        self.root.join(format!("{}.spv", variant.file_stem()))
    }
}

impl KernelLoader for SpirvDirectory {
    fn load(&self, variant: KernelVariant) -> Result<Vec<u32>> {
        let path = self.path_for(variant);
        let bytes = std::fs::read(&path)
            .map_err(|source| VulkanError::ShaderNotFound { path: path.clone(), source })?;
        debug!(path = %path.display(), bytes = bytes.len(), "loaded kernel binary");
        Ok(pad_to_words(&bytes))
    }
}

/// Reinterpret bytes as little-endian 32-bit words, zero-padding the tail.
pub fn pad_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

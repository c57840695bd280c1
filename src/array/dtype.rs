//! Element types a buffer can hold

use std::fmt::{self, Display};
use std::str::FromStr;
use serde::{Serialize, Deserialize};

use crate::error::{KernelError, KernelResult};

/// Primitive kinds supported by the host allocator and the accelerator ABI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int8,
    UInt8,
    Int32,
    UInt32,
    Int64,
    Float32,
    Float64,
    Bool,
}

impl ElementType {
    pub const ALL: [ElementType; 8] = [
        ElementType::Int8,
        ElementType::UInt8,
        ElementType::Int32,
        ElementType::UInt32,
        ElementType::Int64,
        ElementType::Float32,
        ElementType::Float64,
        ElementType::Bool,
    ];

    /// Get the size in bytes of this element type
    pub const fn size(&self) -> usize {
        match self {
            ElementType::Int8 | ElementType::UInt8 | ElementType::Bool => 1,
            ElementType::Int32 | ElementType::UInt32 | ElementType::Float32 => 4,
            ElementType::Int64 | ElementType::Float64 => 8,
        }
    }

    /// Natural alignment; equal to the size for every supported kind
    pub const fn align(&self) -> usize {
        self.size()
    }

    /// Type code embedded in accelerator symbol names.
    ///
    /// These are fixed by the kernels library ABI, e.g. `awkward_cuda_ptriU32_alloc`.
    pub const fn code(&self) -> &'static str {
        match self {
            ElementType::Int8 => "i8",
            ElementType::UInt8 => "iU8",
            ElementType::Int32 => "i32",
            ElementType::UInt32 => "iU32",
            ElementType::Int64 => "i64",
            ElementType::Float32 => "f",
            ElementType::Float64 => "d",
            ElementType::Bool => "b",
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            ElementType::Int8 => "int8",
            ElementType::UInt8 => "uint8",
            ElementType::Int32 => "int32",
            ElementType::UInt32 => "uint32",
            ElementType::Int64 => "int64",
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
            ElementType::Bool => "bool",
        }
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, ElementType::Float32 | ElementType::Float64)
    }

    pub const fn is_int(&self) -> bool {
        matches!(
            self,
            ElementType::Int8 | ElementType::UInt8 | ElementType::Int32 | ElementType::UInt32 | ElementType::Int64
        )
    }
}

impl Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementType {
    type Err = KernelError;

    fn from_str(s: &str) -> KernelResult<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        ElementType::ALL
            .iter()
            .copied()
            .find(|t| t.name() == lowered)
            .ok_or_else(|| KernelError::configuration_error(format!("unknown element type '{}'", s)))
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust primitives that map onto an [`ElementType`].
///
/// Sealed: only the eight kinds the accelerator ABI exports can be buffer elements.
pub trait Element: sealed::Sealed + Copy + Send + Sync + 'static {
    const TYPE: ElementType;
}

macro_rules! impl_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {
                const TYPE: ElementType = ElementType::$variant;
            }
        )*
    };
}

impl_element! {
    i8 => Int8,
    u8 => UInt8,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    bool => Bool,
}

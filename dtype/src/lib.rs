//! Element types for buffers and tensor intrinsics.
//!
//! Names follow the lowercase spelling used in intrinsic signatures (`float16`, `int8`, ...), so a
//! dtype can be parsed straight from a descriptor string.

pub mod ext;


use std::fmt;

/// Scalar data types (base numeric types).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumIter, strum::EnumString, strum::IntoStaticStr)]
#[cfg_attr(any(test, feature = "proptest"), derive(proptest_derive::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "lowercase")]
pub enum ScalarDType {
    Bool,

    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,

    Float16,
    BFloat16,
    Float32,
    Float64,
}

impl ScalarDType {
    pub const fn bits(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int8 | Self::UInt8 => 8,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 16,
            Self::Int32 | Self::UInt32 | Self::Float32 => 32,
            Self::Int64 | Self::UInt64 | Self::Float64 => 64,
        }
    }

    /// Storage size; `Bool` occupies a full byte.
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool => 1,
            _ => self.bits() / 8,
        }
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for ScalarDType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Data type of a buffer element: a scalar or a fixed-width vector of scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DType {
    /// Scalar type (single value).
    Scalar(ScalarDType),

    /// Vector type (SIMD).
    Vector { scalar: ScalarDType, count: usize },
}

impl From<ScalarDType> for DType {
    fn from(scalar: ScalarDType) -> Self {
        Self::Scalar(scalar)
    }
}

impl DType {
    /// Create a vector type from this dtype.
    ///
    /// # Panics
    ///
    /// Panics when called on a type that is already a vector.
    pub fn vec(&self, count: usize) -> Self {
        match self {
            _ if count == 1 => *self,
            Self::Scalar(scalar) => Self::Vector { scalar: *scalar, count },
            Self::Vector { .. } => panic!("Cannot vectorize an already vectorized type"),
        }
    }

    /// Get the base scalar type (works for both scalars and vectors).
    pub const fn base(&self) -> ScalarDType {
        match self {
            Self::Scalar(s) => *s,
            Self::Vector { scalar, .. } => *scalar,
        }
    }

    /// Get the vector count (1 for scalars).
    pub const fn count(&self) -> usize {
        match self {
            Self::Vector { count, .. } => *count,
            Self::Scalar(_) => 1,
        }
    }

    pub const fn bits(&self) -> usize {
        self.base().bits() * self.count()
    }

    pub const fn bytes(&self) -> usize {
        self.base().bytes() * self.count()
    }

    pub const fn is_int(&self) -> bool {
        self.base().is_int()
    }

    pub const fn is_float(&self) -> bool {
        self.base().is_float()
    }

    /// Parse a dtype name such as `float32` or `int8x4`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.split_once('x') {
            Some((scalar, count)) if !scalar.is_empty() => {
                let scalar = scalar.parse::<ScalarDType>().ok()?;
                let count = count.parse::<usize>().ok().filter(|&c| c > 0)?;
                Some(Self::Scalar(scalar).vec(count))
            }
            _ => name.parse::<ScalarDType>().ok().map(Self::Scalar),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(scalar) => write!(f, "{scalar}"),
            Self::Vector { scalar, count } => write!(f, "{scalar}x{count}"),
        }
    }
}

// Convenient constructors for common scalar types
#[allow(non_upper_case_globals)]
impl DType {
    pub const Bool: Self = Self::Scalar(ScalarDType::Bool);
    pub const Int8: Self = Self::Scalar(ScalarDType::Int8);
    pub const Int16: Self = Self::Scalar(ScalarDType::Int16);
    pub const Int32: Self = Self::Scalar(ScalarDType::Int32);
    pub const Int64: Self = Self::Scalar(ScalarDType::Int64);
    pub const UInt8: Self = Self::Scalar(ScalarDType::UInt8);
    pub const UInt16: Self = Self::Scalar(ScalarDType::UInt16);
    pub const UInt32: Self = Self::Scalar(ScalarDType::UInt32);
    pub const UInt64: Self = Self::Scalar(ScalarDType::UInt64);
    pub const Float16: Self = Self::Scalar(ScalarDType::Float16);
    pub const BFloat16: Self = Self::Scalar(ScalarDType::BFloat16);
    pub const Float32: Self = Self::Scalar(ScalarDType::Float32);
    pub const Float64: Self = Self::Scalar(ScalarDType::Float64);
}

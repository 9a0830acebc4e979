use std::{fmt, str::FromStr};

use thiserror::Error;

/// Anatomical plane in which a volume was acquired.
///
/// The atlas is always stored horizontally, the sample may be any of the three.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Orientation {
    Horizontal,
    #[default]
    Coronal,
    Sagittal,
}

#[derive(Debug, Error)]
#[error("Unknown orientation '{0}', expected one of horizontal, coronal, sagittal")]
pub struct UnknownOrientation(pub String);

impl FromStr for Orientation {
    type Err = UnknownOrientation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "horizontal" => Ok(Self::Horizontal),
            "coronal" => Ok(Self::Coronal),
            "sagittal" => Ok(Self::Sagittal),
            _ => Err(UnknownOrientation(s.to_string())),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Horizontal => "horizontal",
            Self::Coronal => "coronal",
            Self::Sagittal => "sagittal",
        };
        f.write_str(name)
    }
}

/// Numeric type of the samples stored in a plane or a volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleType {
    U8,
    U16,
    /// Atlas label volumes
    U32,
    F32,
    F64,
}

impl SampleType {
    pub fn byte_size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Ordering applied to the plane paths read from a manifest file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    /// Keep the manifest order
    #[default]
    None,
    Lexicographic,
    /// Digit runs compare by value, so `plane_2` comes before `plane_10`
    Natural,
}

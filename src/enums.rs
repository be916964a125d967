use std::fmt;

/// World-coordinate convention of a volume and its spatial reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Convention {
    /// Left-Posterior-Superior, the DICOM patient coordinate system.
    #[default]
    Lps,
    /// Right-Anterior-Superior, used by NIfTI files.
    Ras,
}

impl Convention {
    pub fn opposite(self) -> Self {
        match self {
            Convention::Lps => Convention::Ras,
            Convention::Ras => Convention::Lps,
        }
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Convention::Lps => write!(f, "LPS"),
            Convention::Ras => write!(f, "RAS"),
        }
    }
}

/// Encoding a series was reconstructed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SourceFormat {
    Dicom,
    Nifti,
}

impl SourceFormat {
    /// Convention the source stores its world coordinates in.
    pub fn native_convention(self) -> Convention {
        match self {
            SourceFormat::Dicom => Convention::Lps,
            SourceFormat::Nifti => Convention::Ras,
        }
    }
}

use std::path::PathBuf;

use crate::manifest::VolumeCategory;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Argument(&'static str),

    #[error("archive has no {0} volume")]
    AbsentCategory(VolumeCategory),

    #[error("failed to read build manifest from {}", archive.display())]
    Manifest {
        archive: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("failed to find {image} in {}", archive.display())]
    NotFoundInArchive { image: String, archive: PathBuf },

    #[error("failed to extract {image} from {}", archive.display())]
    Extraction {
        image: String,
        archive: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("failed to mount {}", image.display())]
    Mount {
        image: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("failed to unmount {}", mount_point.display())]
    Unmount {
        mount_point: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("failed to walk files in dir {}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: ignore::Error,
    },

    #[error("failed to scan files in {category} {image}")]
    Scan {
        category: VolumeCategory,
        image: String,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to encode entitlement database")]
    Encode(#[source] bincode::Error),

    #[error("failed to write entitlement database {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode entitlement database {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("failed to decode entitlements plist for {path}")]
    PlistDecode {
        path: String,
        #[source]
        source: BoxError,
    },
}

impl Error {
    /// True for errors that mean "this category does not exist here" rather
    /// than "something went wrong".
    pub fn is_absent_category(&self) -> bool {
        matches!(self, Error::AbsentCategory(_))
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Argument(_))
    }
}

//! Firmware archive metadata: which disk image backs which volume category.

use memmap2::Mmap;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

use crate::error::{BoxError, Error, Result};

pub const BUILD_MANIFEST: &str = "BuildManifest.plist";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeCategory {
    AppOs,
    SystemOs,
    FileSystem,
}

impl VolumeCategory {
    /// Build order. Later categories win on path collisions.
    pub const ALL: [VolumeCategory; 3] = [
        VolumeCategory::AppOs,
        VolumeCategory::SystemOs,
        VolumeCategory::FileSystem,
    ];

    pub fn label(self) -> &'static str {
        match self {
            VolumeCategory::AppOs => "AppOS",
            VolumeCategory::SystemOs => "SystemOS",
            VolumeCategory::FileSystem => "filesystem",
        }
    }

    pub fn manifest_key(self) -> &'static str {
        match self {
            VolumeCategory::AppOs => "Cryptex1,AppOS",
            VolumeCategory::SystemOs => "Cryptex1,SystemOS",
            VolumeCategory::FileSystem => "OS",
        }
    }
}

impl fmt::Display for VolumeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub trait VolumeResolver {
    /// Image name for `category`, or [`Error::AbsentCategory`] when the
    /// archive does not carry that volume.
    fn resolve(&self, category: VolumeCategory) -> Result<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BuildManifest {
    #[serde(default)]
    build_identities: Vec<BuildIdentity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BuildIdentity {
    #[serde(default)]
    manifest: HashMap<String, ManifestEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ManifestEntry {
    info: Option<ManifestInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ManifestInfo {
    path: Option<String>,
}

#[derive(Debug)]
pub struct BuildManifestResolver {
    manifest: BuildManifest,
}

impl BuildManifestResolver {
    pub fn open(archive_path: &Path) -> Result<Self> {
        let bytes = read_manifest_bytes(archive_path).map_err(|source| Error::Manifest {
            archive: archive_path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(archive_path, &bytes)
    }

    fn from_bytes(archive_path: &Path, bytes: &[u8]) -> Result<Self> {
        let manifest: BuildManifest =
            plist::from_bytes(bytes).map_err(|e| Error::Manifest {
                archive: archive_path.to_path_buf(),
                source: Box::new(e),
            })?;
        Ok(Self { manifest })
    }
}

impl VolumeResolver for BuildManifestResolver {
    fn resolve(&self, category: VolumeCategory) -> Result<String> {
        self.manifest
            .build_identities
            .iter()
            .filter_map(|identity| identity.manifest.get(category.manifest_key()))
            .filter_map(|entry| entry.info.as_ref()?.path.clone())
            .find(|path| !path.is_empty())
            .ok_or(Error::AbsentCategory(category))
    }
}

fn read_manifest_bytes(archive_path: &Path) -> std::result::Result<Vec<u8>, BoxError> {
    let file = File::open(archive_path)?;
    // SAFETY: The archive is opened read-only and the map does not outlive this call.
    let mmap = unsafe { Mmap::map(&file)? };
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))?;
    let mut entry = archive.by_name(BUILD_MANIFEST)?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

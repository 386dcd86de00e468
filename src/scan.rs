use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

use crate::archive::ImageExtractor;
use crate::cache::EntitlementDatabase;
use crate::error::{Error, Result};
use crate::macho::BinaryEntitlementReader;
use crate::manifest::VolumeCategory;
use crate::mount::{MountedVolume, VolumeMounter};

/// Volume images already scanned during this invocation.
#[derive(Debug, Default)]
pub struct ScanSession {
    scanned: BTreeSet<String>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_scanned(&self, image_name: &str) -> bool {
        self.scanned.contains(image_name)
    }

    pub fn scanned(&self) -> impl Iterator<Item = &str> {
        self.scanned.iter().map(String::as_str)
    }

    fn mark_scanned(&mut self, image_name: &str) {
        self.scanned.insert(image_name.to_string());
    }
}

pub struct EntitlementScanner<'a> {
    extractor: &'a dyn ImageExtractor,
    mounter: &'a dyn VolumeMounter,
    reader: &'a dyn BinaryEntitlementReader,
}

impl<'a> EntitlementScanner<'a> {
    pub fn new(
        extractor: &'a dyn ImageExtractor,
        mounter: &'a dyn VolumeMounter,
        reader: &'a dyn BinaryEntitlementReader,
    ) -> Self {
        Self {
            extractor,
            mounter,
            reader,
        }
    }

    /// Scans one volume image and returns `path -> entitlement text` for every
    /// binary on it. Re-scanning an image already in `session` returns an
    /// empty map.
    pub fn scan_volume(
        &self,
        session: &mut ScanSession,
        archive_path: &Path,
        image_name: &str,
        category: VolumeCategory,
    ) -> Result<EntitlementDatabase> {
        if session.is_scanned(image_name) {
            debug!(image = image_name, %category, "volume already scanned");
            return Ok(EntitlementDatabase::new());
        }

        let image = self.extractor.extract(archive_path, image_name)?;

        info!(%category, image = %image.path().display(), "mounting volume");
        let volume = MountedVolume::mount(self.mounter, image.path())?;

        let files = walk_files(volume.mount_point())?;
        let db = self.classify(volume.mount_point(), &files);

        drop(volume);
        drop(image);

        session.mark_scanned(image_name);
        info!(%category, binaries = db.len(), "scanned volume");
        Ok(db)
    }

    fn classify(&self, mount_point: &Path, files: &[PathBuf]) -> EntitlementDatabase {
        let mut db = EntitlementDatabase::new();
        for file in files {
            match self.reader.entitlements(file) {
                Ok(ents) => {
                    db.insert(relative_key(mount_point, file), ents);
                }
                Err(err) => trace!(path = %file.display(), %err, "skipping"),
            }
        }
        db
    }
}

/// Every non-directory entry below `root`. Only a failure on `root` itself
/// is an error; unreadable entries further down are logged and skipped.
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth().is_some_and(|d| d > 0) => {
                warn!(root = %root.display(), %err, "skipping unreadable entry");
                continue;
            }
            Err(source) => {
                return Err(Error::Walk {
                    root: root.to_path_buf(),
                    source,
                });
            }
        };
        if entry.file_type().is_some_and(|t| !t.is_dir()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Volume-relative key with a leading `/`, e.g. `/System/Library/CoreServices/SpringBoard.app/SpringBoard`.
pub fn relative_key(mount_point: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(mount_point).unwrap_or(file);
    let rel = rel.to_string_lossy();
    if rel.starts_with('/') {
        rel.into_owned()
    } else {
        format!("/{rel}")
    }
}

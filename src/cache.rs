//! Persistent entitlement database.
//!
//! The database is a `path -> entitlement text` map, bincode-encoded and
//! gzip-compressed into a single file next to the archive. It is built once
//! when the file is missing and loaded as-is afterwards; nothing checks it
//! against the archive it came from.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::entitlements::decode_entitlements;
use crate::error::{Error, Result};
use crate::manifest::{VolumeCategory, VolumeResolver};
use crate::scan::{EntitlementScanner, ScanSession};

pub const DB_EXTENSION: &str = "entDB";

/// Volume-relative path to raw entitlement text. An empty value means the
/// binary was scanned and carries no entitlements.
pub type EntitlementDatabase = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOrigin {
    Built,
    Loaded,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    db_path: PathBuf,
}

impl CacheStore {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    pub fn exists(&self) -> bool {
        self.db_path.exists()
    }

    /// Loads the database if the cache file exists, otherwise runs `build` and
    /// persists its result. A load failure never falls back to a rebuild.
    pub fn load_or_build<F>(&self, build: F) -> Result<(EntitlementDatabase, CacheOrigin)>
    where
        F: FnOnce() -> Result<EntitlementDatabase>,
    {
        if self.exists() {
            info!(path = %self.db_path.display(), "found entitlement database");
            return Ok((read_database(&self.db_path)?, CacheOrigin::Loaded));
        }

        info!(path = %self.db_path.display(), "generating entitlement database");
        let db = build()?;
        write_database(&self.db_path, &db)?;
        Ok((db, CacheOrigin::Built))
    }
}

/// Scans every volume category in order and merges the results. A category
/// the archive does not have is skipped; any other failure aborts the build.
pub fn build_database(
    archive_path: &Path,
    resolver: &dyn VolumeResolver,
    scanner: &EntitlementScanner<'_>,
    session: &mut ScanSession,
) -> Result<EntitlementDatabase> {
    let mut db = EntitlementDatabase::new();

    for category in VolumeCategory::ALL {
        let image = match resolver.resolve(category) {
            Ok(image) => image,
            Err(err) if err.is_absent_category() => {
                info!(%category, "volume not present in archive, skipping");
                continue;
            }
            Err(err) => return Err(err),
        };

        let ents = scanner
            .scan_volume(session, archive_path, &image, category)
            .map_err(|source| Error::Scan {
                category,
                image: image.clone(),
                source: Box::new(source),
            })?;
        // Later categories overwrite earlier ones on the same path.
        db.extend(ents);
    }

    Ok(db)
}

pub fn encode_database(db: &EntitlementDatabase) -> Result<Vec<u8>> {
    bincode::serialize(db).map_err(Error::Encode)
}

pub fn write_database(path: &Path, db: &EntitlementDatabase) -> Result<()> {
    let encoded = encode_database(db)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| Error::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let tmp = tmp_path(path);
    let written = (|| -> std::io::Result<()> {
        let file = File::create(&tmp)?;
        let mut gz = GzEncoder::new(BufWriter::new(file), Compression::default());
        gz.write_all(&encoded)?;
        gz.finish()?.flush()?;
        std::fs::rename(&tmp, path)
    })();

    if let Err(source) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(Error::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

pub fn read_database(path: &Path) -> Result<EntitlementDatabase> {
    let decode_err = |source: crate::error::BoxError| Error::Decode {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|e| decode_err(e.into()))?;
    let gz = GzDecoder::new(BufReader::new(file));
    bincode::deserialize_from(gz).map_err(|e| decode_err(e.into()))
}

pub(crate) fn tmp_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

#[derive(Debug, serde::Serialize)]
pub struct DatabaseStats {
    pub db_path: String,
    pub origin: CacheOrigin,
    pub binaries: usize,
    pub with_entitlements: usize,
    pub distinct_entitlement_keys: usize,
    pub undecodable_entries: usize,
}

pub fn database_stats(db_path: &Path, origin: CacheOrigin, db: &EntitlementDatabase) -> DatabaseStats {
    let mut keys = BTreeSet::new();
    let mut with_entitlements = 0usize;
    let mut undecodable_entries = 0usize;

    for text in db.values().filter(|t| !t.is_empty()) {
        with_entitlements += 1;
        match decode_entitlements(text) {
            Ok(ents) => keys.extend(ents.into_keys()),
            Err(_) => undecodable_entries += 1,
        }
    }

    DatabaseStats {
        db_path: db_path.to_string_lossy().to_string(),
        origin,
        binaries: db.len(),
        with_entitlements,
        distinct_entitlement_keys: keys.len(),
        undecodable_entries,
    }
}

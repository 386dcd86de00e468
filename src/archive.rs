use memmap2::Mmap;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use zip::ZipArchive;

use crate::error::{BoxError, Error, Result};

/// An image copied out of the archive. The file is removed when this is dropped.
#[derive(Debug)]
pub struct ExtractedImage {
    path: TempPath,
}

impl ExtractedImage {
    pub fn new(path: TempPath) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub trait ImageExtractor {
    fn extract(&self, archive_path: &Path, image_name: &str) -> Result<ExtractedImage>;
}

#[derive(Debug, Clone)]
pub struct ZipImageExtractor {
    temp_dir: PathBuf,
}

impl ZipImageExtractor {
    pub fn new(temp_dir: PathBuf) -> Self {
        Self { temp_dir }
    }
}

impl Default for ZipImageExtractor {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl ImageExtractor for ZipImageExtractor {
    fn extract(&self, archive_path: &Path, image_name: &str) -> Result<ExtractedImage> {
        let extraction = |source: BoxError| Error::Extraction {
            image: image_name.to_string(),
            archive: archive_path.to_path_buf(),
            source,
        };

        let file = File::open(archive_path).map_err(|e| extraction(e.into()))?;
        // SAFETY: The archive is opened read-only and the map is dropped before
        // the file handle at the end of this call.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| extraction(e.into()))?;
        let mut archive =
            ZipArchive::new(Cursor::new(&mmap[..])).map_err(|e| extraction(e.into()))?;

        let Some(index) = find_entry(&mut archive, image_name).map_err(extraction)? else {
            return Err(Error::NotFoundInArchive {
                image: image_name.to_string(),
                archive: archive_path.to_path_buf(),
            });
        };

        let mut entry = archive.by_index(index).map_err(|e| extraction(e.into()))?;
        let mut tmp = tempfile::Builder::new()
            .prefix("ent-finder-")
            .suffix(&format!("-{image_name}"))
            .tempfile_in(&self.temp_dir)
            .map_err(|e| extraction(e.into()))?;
        std::io::copy(&mut entry, tmp.as_file_mut()).map_err(|e| extraction(e.into()))?;

        Ok(ExtractedImage::new(tmp.into_temp_path()))
    }
}

fn find_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    image_name: &str,
) -> std::result::Result<Option<usize>, BoxError> {
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        if entry.is_dir() {
            continue;
        }
        let matches = Path::new(entry.name())
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| eq_fold(n, image_name));
        if matches {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn eq_fold(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

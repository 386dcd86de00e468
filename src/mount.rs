use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::error::{BoxError, Error, Result};

pub trait VolumeMounter {
    fn mount(&self, image: &Path) -> Result<PathBuf>;
    fn unmount(&self, mount_point: &Path) -> Result<()>;
}

/// A mounted volume. Dropping it attempts an unmount; failures are logged and
/// otherwise ignored so they never replace the outcome of the scan.
pub struct MountedVolume<'a> {
    mounter: &'a dyn VolumeMounter,
    mount_point: PathBuf,
}

impl<'a> MountedVolume<'a> {
    pub fn mount(mounter: &'a dyn VolumeMounter, image: &Path) -> Result<Self> {
        let mount_point = mounter.mount(image)?;
        Ok(Self {
            mounter,
            mount_point,
        })
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }
}

impl Drop for MountedVolume<'_> {
    fn drop(&mut self) {
        info!(mount_point = %self.mount_point.display(), "unmounting volume");
        if let Err(err) = self.mounter.unmount(&self.mount_point) {
            warn!(
                mount_point = %self.mount_point.display(),
                error = %format_chain(&err),
                "failed to unmount volume"
            );
        }
    }
}

fn format_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountTool {
    /// macOS disk images.
    Hdiutil,
    /// APFS images on Linux through FUSE.
    ApfsFuse,
}

impl MountTool {
    pub fn for_platform() -> Self {
        if cfg!(target_os = "macos") {
            MountTool::Hdiutil
        } else {
            MountTool::ApfsFuse
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandMounter {
    tool: MountTool,
    mount_root: PathBuf,
}

impl CommandMounter {
    pub fn new(tool: MountTool, mount_root: PathBuf) -> Self {
        Self { tool, mount_root }
    }

    pub fn mount_point_for(&self, image: &Path) -> PathBuf {
        let stem = image
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("image");
        self.mount_root.join(format!("ent-finder-{stem}.mount"))
    }
}

impl VolumeMounter for CommandMounter {
    fn mount(&self, image: &Path) -> Result<PathBuf> {
        let mount_point = self.mount_point_for(image);
        let mount_err = |source: BoxError| Error::Mount {
            image: image.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(&mount_point).map_err(|e| mount_err(e.into()))?;

        let mut cmd = match self.tool {
            MountTool::Hdiutil => {
                let mut c = Command::new("hdiutil");
                c.args(["attach", "-noverify", "-nobrowse", "-readonly", "-mountpoint"])
                    .arg(&mount_point)
                    .arg(image);
                c
            }
            MountTool::ApfsFuse => {
                let mut c = Command::new("apfs-fuse");
                c.arg(image).arg(&mount_point);
                c
            }
        };

        debug!(?cmd, "running mount command");
        if let Err(source) = run(&mut cmd) {
            let _ = std::fs::remove_dir(&mount_point);
            return Err(mount_err(source));
        }

        Ok(mount_point)
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        let mut cmd = match self.tool {
            MountTool::Hdiutil => {
                let mut c = Command::new("hdiutil");
                c.arg("detach").arg(mount_point);
                c
            }
            MountTool::ApfsFuse => {
                let mut c = Command::new("fusermount");
                c.arg("-u").arg(mount_point);
                c
            }
        };

        debug!(?cmd, "running unmount command");
        run(&mut cmd).map_err(|source| Error::Unmount {
            mount_point: mount_point.to_path_buf(),
            source,
        })?;

        let _ = std::fs::remove_dir(mount_point);
        Ok(())
    }
}

fn run(cmd: &mut Command) -> std::result::Result<(), BoxError> {
    let output = cmd.output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{} ({})", stderr.trim(), output.status).into());
    }
    Ok(())
}

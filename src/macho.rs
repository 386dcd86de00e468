//! Entitlement extraction from Mach-O code signatures.
//!
//! The signature is an embedded SuperBlob (big-endian) referenced by the
//! `LC_CODE_SIGNATURE` load command. The entitlements live in the slot of
//! type [`CSSLOT_ENTITLEMENTS`] as an XML property list.

use goblin::mach::load_command::CommandVariant;
use goblin::mach::{Mach, MachO};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xfade_0cc0;
const CSMAGIC_EMBEDDED_ENTITLEMENTS: u32 = 0xfade_7171;
const CSSLOT_ENTITLEMENTS: u32 = 5;

/// The file could not be parsed as an executable binary.
#[derive(Debug, thiserror::Error)]
#[error("not a Mach-O binary: {reason}")]
pub struct NotABinary {
    reason: String,
}

impl NotABinary {
    fn new(reason: impl ToString) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

pub trait BinaryEntitlementReader {
    /// Raw entitlement text of the binary at `path`.
    ///
    /// `Ok("")` means the file is a binary without a signature or without
    /// entitlements. `Err` means it is not a binary at all.
    fn entitlements(&self, path: &Path) -> Result<String, NotABinary>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MachoEntitlementReader;

impl BinaryEntitlementReader for MachoEntitlementReader {
    fn entitlements(&self, path: &Path) -> Result<String, NotABinary> {
        let meta = std::fs::metadata(path).map_err(NotABinary::new)?;
        if !meta.is_file() || meta.len() < 4 {
            return Err(NotABinary::new("too small"));
        }

        let file = File::open(path).map_err(NotABinary::new)?;
        // SAFETY: The file is opened read-only and the map is dropped before returning.
        let mmap = unsafe { Mmap::map(&file) }.map_err(NotABinary::new)?;
        entitlements_from_bytes(&mmap)
    }
}

pub fn entitlements_from_bytes(bytes: &[u8]) -> Result<String, NotABinary> {
    match Mach::parse(bytes).map_err(NotABinary::new)? {
        Mach::Binary(macho) => Ok(signature_entitlements(&macho, bytes).unwrap_or_default()),
        Mach::Fat(multi) => {
            let mut parsed_any = false;
            for arch in multi.iter_arches() {
                let arch = arch.map_err(NotABinary::new)?;
                let start = arch.offset as usize;
                let end = start.saturating_add(arch.size as usize);
                let Some(slice) = bytes.get(start..end) else {
                    continue;
                };
                let Ok(macho) = MachO::parse(slice, 0) else {
                    continue;
                };
                parsed_any = true;
                if let Some(ents) = signature_entitlements(&macho, slice) {
                    return Ok(ents);
                }
            }
            if parsed_any {
                Ok(String::new())
            } else {
                Err(NotABinary::new("no parsable architecture in fat binary"))
            }
        }
    }
}

/// Entitlements from the embedded signature, `None` when there is no
/// signature or it carries no entitlement slot.
fn signature_entitlements(macho: &MachO<'_>, bytes: &[u8]) -> Option<String> {
    let (dataoff, datasize) = macho.load_commands.iter().find_map(|lc| match &lc.command {
        CommandVariant::CodeSignature(cmd) => Some((cmd.dataoff as usize, cmd.datasize as usize)),
        _ => None,
    })?;
    let blob = bytes.get(dataoff..dataoff.checked_add(datasize)?)?;

    if read_be_u32(blob, 0)? != CSMAGIC_EMBEDDED_SIGNATURE {
        return None;
    }
    let count = read_be_u32(blob, 8)? as usize;
    for i in 0..count {
        let index = 12 + i * 8;
        let slot_type = read_be_u32(blob, index)?;
        let offset = read_be_u32(blob, index + 4)? as usize;
        if slot_type != CSSLOT_ENTITLEMENTS {
            continue;
        }
        if read_be_u32(blob, offset)? != CSMAGIC_EMBEDDED_ENTITLEMENTS {
            return None;
        }
        let length = read_be_u32(blob, offset + 4)? as usize;
        let body = blob.get(offset + 8..offset.checked_add(length)?)?;
        let text = String::from_utf8_lossy(body);
        let text = text.trim_end_matches('\0');
        return (!text.is_empty()).then(|| text.to_string());
    }
    None
}

fn read_be_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at.checked_add(4)?)?;
    Some(u32::from_be_bytes(raw.try_into().ok()?))
}


#[cfg(test)]
mod tests {
    use super::fixtures::{fat_bytes, macho_bytes};
    use super::*;

    const ENTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict><key>platform-application</key><true/></dict></plist>"#;

    #[test]
    fn reads_embedded_entitlements() {
        let bytes = macho_bytes(Some(ENTS));
        assert_eq!(entitlements_from_bytes(&bytes).unwrap(), ENTS);
    }

    #[test]
    fn unsigned_binary_has_empty_entitlements() {
        let bytes = macho_bytes(None);
        assert_eq!(entitlements_from_bytes(&bytes).unwrap(), "");
    }

    #[test]
    fn non_binary_is_rejected() {
        assert!(entitlements_from_bytes(b"#!/bin/sh\necho hi\n").is_err());
    }

    #[test]
    fn fat_binary_uses_first_signed_slice() {
        let bytes = fat_bytes(&[macho_bytes(None), macho_bytes(Some(ENTS))]);
        assert_eq!(entitlements_from_bytes(&bytes).unwrap(), ENTS);
    }

    #[test]
    fn unsigned_fat_binary_has_empty_entitlements() {
        let bytes = fat_bytes(&[macho_bytes(None)]);
        assert_eq!(entitlements_from_bytes(&bytes).unwrap(), "");
    }

    #[test]
    fn java_class_with_fat_magic_is_rejected() {
        // CAFEBABE, minor 0, major 52.
        let class = [0xca, 0xfe, 0xba, 0xbe, 0x00, 0x00, 0x00, 0x34];
        assert!(entitlements_from_bytes(&class).is_err());
    }

    #[test]
    fn reader_skips_tiny_and_missing_files() {
        let dir = std::env::temp_dir().join(format!(
            "ent_finder_macho_test_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let tiny = dir.join("tiny");
        std::fs::write(&tiny, b"ab").unwrap();

        let reader = MachoEntitlementReader;
        assert!(reader.entitlements(&tiny).is_err());
        assert!(reader.entitlements(&dir.join("missing")).is_err());
        assert!(reader.entitlements(&dir).is_err());

        let signed = dir.join("signed");
        std::fs::write(&signed, macho_bytes(Some(ENTS))).unwrap();
        assert_eq!(reader.entitlements(&signed).unwrap(), ENTS);

        let _ = std::fs::remove_dir_all(dir);
    }
}

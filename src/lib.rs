//! # ent-finder
//!
//! Scans the disk-image volumes of a firmware archive (IPSW) for signed
//! Mach-O binaries, caches their code-signing entitlements, and searches them
//! by file path or by entitlement key.
//!
//! ## Architecture
//!
//! - **manifest**: Volume categories and image-name resolution from `BuildManifest.plist`
//! - **archive**: Extraction of a single disk image out of the archive into a temp file
//! - **mount**: Disk-image mounting with guaranteed best-effort unmount
//! - **macho**: Entitlement blob extraction from Mach-O code signatures
//! - **scan**: Per-volume walk and classification, deduplicated by a scan session
//! - **cache**: Build-or-load policy and the gzip + bincode database file
//! - **entitlements**: Property-list decoding into tagged entitlement values
//! - **query**: File-path and entitlement-key searches and their output

pub mod archive;
pub mod cache;
pub mod cli;
pub mod config;
pub mod entitlements;
pub mod error;
pub mod macho;
pub mod manifest;
pub mod mount;
pub mod query;
pub mod scan;

pub use error::{Error, Result};

use serde::Serialize;
use std::io::Write;
use tracing::warn;

use crate::cache::EntitlementDatabase;
use crate::entitlements::{EntitlementValue, decode_entitlements};
use crate::error::{Error, Result};

pub const NO_ENTITLEMENTS: &str = "\t- no entitlements";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryMode {
    /// Case-insensitive path substring.
    File(String),
    /// Case-sensitive entitlement key substring, boolean `true` values only.
    Entitlement(String),
}

impl QueryMode {
    /// Exactly one filter must be set; empty strings count as unset.
    pub fn from_filters(ent: Option<String>, file: Option<String>) -> Result<Self> {
        let ent = ent.filter(|s| !s.is_empty());
        let file = file.filter(|s| !s.is_empty());
        match (ent, file) {
            (Some(ent), None) => Ok(QueryMode::Entitlement(ent)),
            (None, Some(file)) => Ok(QueryMode::File(file)),
            (None, None) => Err(Error::Argument("you must supply a --ent OR --file")),
            (Some(_), Some(_)) => Err(Error::Argument(
                "you can only use --ent OR --file (not both)",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMatch<'a> {
    pub path: &'a str,
    pub entitlements: Option<&'a str>,
}

pub fn search_file<'a>(db: &'a EntitlementDatabase, term: &str) -> Vec<FileMatch<'a>> {
    let needle = term.to_lowercase();
    db.iter()
        .filter(|(path, _)| path.to_lowercase().contains(&needle))
        .map(|(path, ents)| FileMatch {
            path,
            entitlements: (!ents.is_empty()).then_some(ents.as_str()),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitlementHit {
    pub key: String,
    pub path: String,
}

/// A matching key whose value is not a boolean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnhandledValue {
    pub key: String,
    pub path: String,
    pub kind: &'static str,
}

#[derive(Debug, Default, Serialize)]
pub struct EntitlementSearch {
    pub hits: Vec<EntitlementHit>,
    pub unhandled: Vec<UnhandledValue>,
}

/// Finds every binary granting an entitlement whose key contains `term` with
/// value `true`. A single undecodable entry aborts the whole search.
pub fn search_entitlement(db: &EntitlementDatabase, term: &str) -> Result<EntitlementSearch> {
    let mut out = EntitlementSearch::default();

    // Cheap substring check before the plist decode.
    for (path, text) in db.iter().filter(|(_, text)| text.contains(term)) {
        let ents = decode_entitlements(text).map_err(|source| Error::PlistDecode {
            path: path.clone(),
            source,
        })?;

        for (key, value) in ents {
            if !key.contains(term) {
                continue;
            }
            match value {
                EntitlementValue::Bool(true) => out.hits.push(EntitlementHit {
                    key,
                    path: path.clone(),
                }),
                EntitlementValue::Bool(false) => {}
                other => {
                    warn!(kind = other.kind(), %key, %path, "unhandled entitlement kind");
                    out.unhandled.push(UnhandledValue {
                        key,
                        path: path.clone(),
                        kind: other.kind(),
                    });
                }
            }
        }
    }

    Ok(out)
}

pub fn render_file_matches(out: &mut impl Write, matches: &[FileMatch<'_>]) -> std::io::Result<()> {
    for m in matches {
        writeln!(out, "{}", m.path)?;
        match m.entitlements {
            Some(ents) => writeln!(out, "\n{ents}\n")?,
            None => writeln!(out, "\n{NO_ENTITLEMENTS}\n")?,
        }
    }
    Ok(())
}

/// Two aligned columns: entitlement key, then path.
pub fn render_entitlement_hits(out: &mut impl Write, hits: &[EntitlementHit]) -> std::io::Result<()> {
    let width = hits.iter().map(|h| h.key.chars().count()).max().unwrap_or(0);
    for hit in hits {
        writeln!(out, "{:<width$} {}", hit.key, hit.path)?;
    }
    Ok(())
}

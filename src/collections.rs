//! User-defined library collections, read from the Steam client's cloud
//! storage namespace file.
//!
//! The file is a JSON array of `[key, entry]` pairs. Entries whose key starts
//! with `user-collections.` carry a JSON-encoded `value` naming the collection
//! and the apps added to (and removed from) it. This file mirrors the
//! `user-collections` namespace of the client's LevelDB store.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

const NAMESPACE_FILE: &str = "cloud-storage-namespace-1.json";
const COLLECTION_PREFIX: &str = "user-collections.";

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    is_deleted: bool,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Collection {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    added: Vec<u32>,
    #[serde(default)]
    removed: Vec<u32>,
}

/// App id → names of the collections containing it, sorted and deduplicated.
pub type Memberships = BTreeMap<u32, Vec<String>>;

/// Namespace files of every account under `<steam_dir>/userdata`, ordered by account.
pub fn namespace_files(steam_dir: &Path) -> Result<Vec<PathBuf>> {
    let userdata = steam_dir.join("userdata");
    let entries = match fs::read_dir(&userdata) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io_at(&userdata, e)),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?
            .path()
            .join("config")
            .join("cloudstorage")
            .join(NAMESPACE_FILE);
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Collections of every local account, merged.
pub fn load(steam_dir: &Path) -> Result<Memberships> {
    let mut memberships = Memberships::new();
    for path in namespace_files(steam_dir)? {
        let bytes = fs::read(&path).map_err(|e| Error::io_at(&path, e))?;
        merge(&mut memberships, parse(&bytes)?);
    }
    Ok(memberships)
}

/// Memberships described by one namespace file.
pub fn parse(bytes: &[u8]) -> Result<Memberships> {
    let pairs: Vec<(String, serde_json::Value)> = serde_json::from_slice(bytes)?;
    let mut sets: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();

    for (key, entry) in pairs {
        if !key.starts_with(COLLECTION_PREFIX) {
            continue;
        }
        let entry: Entry = serde_json::from_value(entry)?;
        if entry.is_deleted {
            continue;
        }
        let Some(value) = entry.value else {
            continue;
        };
        let collection: Collection = match serde_json::from_str(&value) {
            Ok(collection) => collection,
            Err(e) => {
                tracing::warn!(key = %key, "unreadable collection: {e}");
                continue;
            }
        };

        let Some(name) = collection
            .name
            .or(collection.id)
            .or_else(|| key.strip_prefix(COLLECTION_PREFIX).map(str::to_owned))
        else {
            continue;
        };
        let removed: BTreeSet<u32> = collection.removed.into_iter().collect();
        for app in collection.added.into_iter().filter(|id| !removed.contains(id)) {
            sets.entry(app).or_default().insert(name.clone());
        }
    }

    Ok(sets
        .into_iter()
        .map(|(app, names)| (app, names.into_iter().collect()))
        .collect())
}

fn merge(into: &mut Memberships, from: Memberships) {
    for (app, names) in from {
        let existing = into.entry(app).or_default();
        existing.extend(names);
        existing.sort();
        existing.dedup();
    }
}

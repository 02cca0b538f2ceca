//! [`MetadataCache`]: persisted package and application records.
//!
//! Layout under the cache root:
//!
//! | File | Contents |
//! |------|----------|
//! | `licenses.json` | package ids owned by the account |
//! | `pkgs.json` | package id → decoded package record |
//! | `apps.json` | application id → decoded application record |
//! | `pkg-<id>.vdf`, `app-<id>.vdf` | raw block as printed by steamcmd |
//!
//! The per-id `.vdf` side files let an interrupted batch fetch resume without
//! asking steamcmd again for ids it already answered.

use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::record::{AppKind, AppRecord, PackageRecord};
use crate::vdf;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

const LICENSES_FILE: &str = "licenses.json";

/// Which of the two record collections an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Package,
    Application,
}

impl RecordKind {
    fn collection_file(self) -> &'static str {
        match self {
            RecordKind::Package => "pkgs.json",
            RecordKind::Application => "apps.json",
        }
    }

    fn side_file_prefix(self) -> &'static str {
        match self {
            RecordKind::Package => "pkg",
            RecordKind::Application => "app",
        }
    }

    /// steamcmd command printing one record of this kind.
    pub fn info_command(self) -> &'static str {
        match self {
            RecordKind::Package => "package_info_print",
            RecordKind::Application => "app_info_print",
        }
    }

    pub fn progress_label(self) -> &'static str {
        match self {
            RecordKind::Package => "Loading packages",
            RecordKind::Application => "Loading apps",
        }
    }
}

/// Result of a [`MetadataCache::fetch_missing`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Distinct ids asked for.
    pub requested: usize,
    /// Ids resident after the call.
    pub resolved: usize,
    pub from_side_files: usize,
    pub fetched: usize,
}

impl FetchReport {
    pub fn is_complete(&self) -> bool {
        self.resolved == self.requested
    }

    /// [`Error::PartialFetch`] when some requested ids stayed unresolved.
    pub fn check(&self) -> Result<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(Error::PartialFetch {
                requested: self.requested,
                resolved: self.resolved,
            })
        }
    }
}

/// Sink handed to the fetcher: called once per raw record steamcmd printed.
pub type RecordSink<'s> = dyn FnMut(u32, &[u8]) -> Result<()> + 's;

pub struct MetadataCache {
    root: PathBuf,
    licenses: Option<Vec<u32>>,
    packages: BTreeMap<u32, PackageRecord>,
    apps: BTreeMap<u32, AppRecord>,
}

impl MetadataCache {
    /// An empty cache rooted at `root`. Nothing is read or created yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            licenses: None,
            packages: BTreeMap::new(),
            apps: BTreeMap::new(),
        }
    }

    /// Create the cache root if needed and load whatever is persisted there.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let mut cache = Self::new(root);
        fs::create_dir_all(&cache.root).map_err(|e| Error::io_at(&cache.root, e))?;
        cache.load_from_disk()?;
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Replace the in-memory maps with the persisted files.
    ///
    /// A missing file leaves the corresponding collection empty.
    pub fn load_from_disk(&mut self) -> Result<()> {
        self.licenses = read_json(&self.root.join(LICENSES_FILE))?;
        self.packages =
            read_json(&self.root.join(RecordKind::Package.collection_file()))?.unwrap_or_default();
        self.apps = read_json(&self.root.join(RecordKind::Application.collection_file()))?
            .unwrap_or_default();
        tracing::info!(
            packages = self.packages.len(),
            apps = self.apps.len(),
            root = %self.root.display(),
            "loaded metadata cache"
        );
        Ok(())
    }

    /// Delete every persisted metadata file, side files included, and empty
    /// the in-memory maps. Other content of the root (covers) is kept.
    pub fn invalidate_all(&mut self) -> Result<()> {
        self.licenses = None;
        self.packages.clear();
        self.apps.clear();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io_at(&self.root, e)),
        };
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_metadata_file(&path) {
                fs::remove_file(&path).map_err(|e| Error::io_at(&path, e))?;
            }
        }
        tracing::info!(root = %self.root.display(), "invalidated metadata cache");
        Ok(())
    }

    /// Persist licenses, packages and applications.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::io_at(&self.root, e))?;
        if let Some(licenses) = &self.licenses {
            write_json(&self.root.join(LICENSES_FILE), licenses)?;
        }
        write_json(
            &self.root.join(RecordKind::Package.collection_file()),
            &self.packages,
        )?;
        write_json(
            &self.root.join(RecordKind::Application.collection_file()),
            &self.apps,
        )?;
        Ok(())
    }

    pub fn licenses(&self) -> Option<&[u32]> {
        self.licenses.as_deref()
    }

    /// Store the license set, deduplicated and sorted.
    pub fn set_licenses(&mut self, ids: impl IntoIterator<Item = u32>) {
        let ids: BTreeSet<u32> = ids.into_iter().collect();
        self.licenses = Some(ids.into_iter().collect());
    }

    pub fn packages(&self) -> &BTreeMap<u32, PackageRecord> {
        &self.packages
    }

    pub fn apps(&self) -> &BTreeMap<u32, AppRecord> {
        &self.apps
    }

    pub fn app(&self, id: u32) -> Option<&AppRecord> {
        self.apps.get(&id)
    }

    /// Drop application records failing `keep`. Returns how many were removed.
    pub fn retain_apps(&mut self, mut keep: impl FnMut(&AppRecord) -> bool) -> usize {
        let before = self.apps.len();
        self.apps.retain(|_, record| keep(record));
        before - self.apps.len()
    }

    /// Application ids referenced by cached packages, deduplicated and sorted.
    pub fn app_ids_from_packages(&self) -> Vec<u32> {
        let ids: BTreeSet<u32> = self
            .packages
            .values()
            .flat_map(PackageRecord::app_ids)
            .collect();
        ids.into_iter().collect()
    }

    /// Listable applications whose `common/type` is `kind`, ordered by id.
    pub fn apps_of_kind(&self, kind: AppKind) -> impl Iterator<Item = (u32, &AppRecord)> {
        self.apps
            .iter()
            .filter(move |(_, record)| record.is_listable() && record.kind() == Some(kind))
            .map(|(id, record)| (*id, record))
    }

    pub fn games(&self) -> BTreeMap<u32, &AppRecord> {
        self.apps_of_kind(AppKind::Game).collect()
    }

    pub fn tools(&self) -> BTreeMap<u32, &AppRecord> {
        self.apps_of_kind(AppKind::Tool).collect()
    }

    pub fn dlcs(&self) -> BTreeMap<u32, &AppRecord> {
        self.apps_of_kind(AppKind::Dlc).collect()
    }

    pub fn side_file(&self, kind: RecordKind, id: u32) -> PathBuf {
        self.root
            .join(format!("{}-{}.vdf", kind.side_file_prefix(), id))
    }

    /// Ids neither resident in memory nor recoverable from a side file.
    pub fn unresolved(&self, kind: RecordKind, ids: &[u32]) -> Vec<u32> {
        let ids: BTreeSet<u32> = ids.iter().copied().collect();
        ids.into_iter()
            .filter(|&id| !self.contains(kind, id) && !self.side_file(kind, id).is_file())
            .collect()
    }

    fn contains(&self, kind: RecordKind, id: u32) -> bool {
        match kind {
            RecordKind::Package => self.packages.contains_key(&id),
            RecordKind::Application => self.apps.contains_key(&id),
        }
    }

    fn insert_decoded(&mut self, kind: RecordKind, id: u32, raw: &[u8]) -> Result<()> {
        let record = vdf::decode(raw)?;
        match kind {
            RecordKind::Package => {
                self.packages.insert(id, PackageRecord(record));
            }
            RecordKind::Application => {
                self.apps.insert(id, AppRecord(record));
            }
        }
        Ok(())
    }

    /// Decode a record freshly printed by steamcmd, keep it, and write its
    /// side file. A block that fails to decode leaves the cache untouched.
    pub fn store_fetched(&mut self, kind: RecordKind, id: u32, raw: &[u8]) -> Result<()> {
        self.insert_decoded(kind, id, raw)?;
        let path = self.side_file(kind, id);
        fs::write(&path, raw).map_err(|e| Error::io_at(&path, e))?;
        Ok(())
    }

    /// Make every id in `ids` resident.
    ///
    /// Ids already in memory are skipped. The rest are read from their side
    /// files when present; whatever remains is handed to `fetch` in a single
    /// call, which must feed each raw record it obtains into the sink. Progress
    /// is reported as the fraction of requested ids resolved so far.
    ///
    /// When nothing is missing `fetch` is not called at all.
    pub fn fetch_missing<F>(
        &mut self,
        kind: RecordKind,
        ids: &[u32],
        progress: &mut dyn Progress,
        fetch: F,
    ) -> Result<FetchReport>
    where
        F: FnOnce(&[u32], &mut RecordSink<'_>) -> Result<()>,
    {
        let wanted: BTreeSet<u32> = ids.iter().copied().collect();
        let requested = wanted.len();
        let mut report = FetchReport {
            requested,
            ..FetchReport::default()
        };
        let percent = move |resolved: usize| 100.0 * resolved as f64 / requested.max(1) as f64;

        let mut missing = Vec::new();
        for &id in &wanted {
            if self.contains(kind, id) {
                report.resolved += 1;
                continue;
            }
            let side_file = self.side_file(kind, id);
            if side_file.is_file() {
                let raw = fs::read(&side_file).map_err(|e| Error::io_at(&side_file, e))?;
                self.insert_decoded(kind, id, &raw)?;
                report.resolved += 1;
                report.from_side_files += 1;
                progress.report(Some(percent(report.resolved)), None);
            } else {
                missing.push(id);
            }
        }

        if missing.is_empty() {
            return Ok(report);
        }

        tracing::debug!(?kind, count = missing.len(), "fetching records from steamcmd");
        let mut pending: HashSet<u32> = missing.iter().copied().collect();
        let mut resolved = report.resolved;
        let mut fetched = 0;
        {
            let mut sink = |id: u32, raw: &[u8]| -> Result<()> {
                self.store_fetched(kind, id, raw)?;
                if pending.remove(&id) {
                    resolved += 1;
                    fetched += 1;
                    progress.report(Some(percent(resolved)), None);
                }
                Ok(())
            };
            fetch(&missing, &mut sink)?;
        }
        report.resolved = resolved;
        report.fetched = fetched;
        Ok(report)
    }
}

fn is_metadata_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name == LICENSES_FILE
        || name == RecordKind::Package.collection_file()
        || name == RecordKind::Application.collection_file()
        || ((name.starts_with("pkg-") || name.starts_with("app-")) && name.ends_with(".vdf"))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io_at(path, e)),
    }
}

/// Write through a temporary sibling so a crash never leaves half a file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(value)?).map_err(|e| Error::io_at(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io_at(path, e))?;
    Ok(())
}

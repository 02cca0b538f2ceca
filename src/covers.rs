//! Library artwork download.
//!
//! Each game maps to a handful of [`CoverJob`]s. A job is skipped when its
//! target exists, or when its `~` miss-marker records an earlier non-2xx
//! answer. Games are downloaded concurrently with at most [`MAX_IN_FLIGHT`]
//! requests open at once; a failing job is logged and never stops the others.

use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::record::AppRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const MAX_IN_FLIGHT: usize = 16;

const CDN: &str = "https://steamcdn-a.akamaihd.net";

/// One image to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverJob {
    pub url: String,
    pub target: PathBuf,
}

impl CoverJob {
    fn new(url: String, target: PathBuf) -> Self {
        Self { url, target }
    }

    /// Empty file recording that the server had nothing for this job.
    pub fn miss_marker(&self) -> PathBuf {
        let mut name = self.target.clone().into_os_string();
        name.push("~");
        PathBuf::from(name)
    }

    fn is_settled(&self) -> bool {
        self.target.exists() || self.miss_marker().exists()
    }
}

/// Every image of app `id`, laid out under `root`.
pub fn jobs_for(root: &Path, id: u32, record: &AppRecord) -> Vec<CoverJob> {
    let store = format!("{CDN}/steam/apps/{id}");
    let mut jobs = vec![
        CoverJob::new(
            format!("{store}/library_600x900_2x.jpg"),
            root.join("covers/600x900").join(format!("{id}.jpg")),
        ),
        CoverJob::new(
            format!("{store}/library_600x900.jpg"),
            root.join("covers/300x450").join(format!("{id}.jpg")),
        ),
        CoverJob::new(
            format!("{store}/header.jpg"),
            root.join("headers").join(format!("{id}.jpg")),
        ),
        CoverJob::new(
            format!("{store}/logo.png"),
            root.join("logos/640x360").join(format!("{id}.png")),
        ),
    ];

    let community = format!("{CDN}/steamcommunity/public/images/apps/{id}");
    for (key, dir, ext) in [
        ("logo", "logos/184x69", "jpg"),
        ("logo_small", "logos/120x45", "jpg"),
        ("clienticon", "icons", "ico"),
    ] {
        if let Some(hash) = record.common_str(key).filter(|h| !h.is_empty()) {
            jobs.push(CoverJob::new(
                format!("{community}/{hash}.{ext}"),
                root.join(dir).join(format!("{id}.{ext}")),
            ));
        }
    }
    jobs
}

/// Where image bytes come from.
#[async_trait]
pub trait CoverSource: Send + Sync {
    /// `Ok(None)` when the server answers with a non-success status.
    async fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>>;
}

pub struct HttpCoverSource {
    client: reqwest::Client,
}

impl HttpCoverSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("steam-cli/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CoverSource for HttpCoverSource {
    async fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            tracing::debug!(url, status = %response.status(), "no image");
            return Ok(None);
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }
}

/// Totals over one [`download`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub missing: usize,
    pub failed: usize,
}

impl CoverReport {
    fn absorb(&mut self, other: CoverReport) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.missing += other.missing;
        self.failed += other.failed;
    }
}

enum Fetched {
    Downloaded,
    Missing,
}

async fn fetch_one(source: &dyn CoverSource, job: &CoverJob) -> Result<Fetched> {
    if let Some(dir) = job.target.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::io_at(dir, e))?;
    }
    match source.fetch(&job.url).await? {
        Some(bytes) => {
            tokio::fs::write(&job.target, bytes)
                .await
                .map_err(|e| Error::io_at(&job.target, e))?;
            Ok(Fetched::Downloaded)
        }
        None => {
            let marker = job.miss_marker();
            tokio::fs::write(&marker, b"")
                .await
                .map_err(|e| Error::io_at(&marker, e))?;
            Ok(Fetched::Missing)
        }
    }
}

/// Fetch every game's jobs; progress advances as each game completes.
pub async fn download(
    source: Arc<dyn CoverSource>,
    games: Vec<(u32, Vec<CoverJob>)>,
    progress: &mut dyn Progress,
) -> CoverReport {
    let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
    let total = games.len();
    let mut tasks = JoinSet::new();

    for (id, jobs) in games {
        let source = Arc::clone(&source);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let mut report = CoverReport::default();
            for job in jobs {
                if job.is_settled() {
                    report.skipped += 1;
                    continue;
                }
                let Ok(_permit) = semaphore.acquire().await else {
                    break;
                };
                match fetch_one(source.as_ref(), &job).await {
                    Ok(Fetched::Downloaded) => report.downloaded += 1,
                    Ok(Fetched::Missing) => report.missing += 1,
                    Err(e) => {
                        tracing::warn!(app_id = id, url = %job.url, "cover download failed: {e}");
                        report.failed += 1;
                    }
                }
            }
            report
        });
    }

    progress.report(Some(0.0), Some("Downloading covers"));
    let mut summary = CoverReport::default();
    let mut done = 0;
    while let Some(joined) = tasks.join_next().await {
        done += 1;
        match joined {
            Ok(report) => summary.absorb(report),
            Err(e) => {
                tracing::warn!("cover task aborted: {e}");
                summary.failed += 1;
            }
        }
        progress.report(Some(100.0 * done as f64 / total.max(1) as f64), None);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdf;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeSource {
        images: HashMap<String, Vec<u8>>,
        broken: Option<String>,
        requested: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CoverSource for FakeSource {
        async fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.requested.lock().unwrap().push(url.to_owned());
            if self.broken.as_deref() == Some(url) {
                return Err(Error::Io(std::io::Error::other("connection reset")));
            }
            Ok(self.images.get(url).cloned())
        }
    }

    fn record(text: &str) -> AppRecord {
        AppRecord(vdf::parse_str(text).unwrap())
    }

    #[test]
    fn test_jobs_for_community_images() {
        let root = Path::new("/cache");
        let app = record(r#""common" { "name" "Foo" "logo" "abc" "clienticon" "def" }"#);
        let jobs = jobs_for(root, 42, &app);
        assert_eq!(jobs.len(), 6);
        assert_eq!(
            jobs[0].url,
            "https://steamcdn-a.akamaihd.net/steam/apps/42/library_600x900_2x.jpg"
        );
        assert_eq!(jobs[0].target, PathBuf::from("/cache/covers/600x900/42.jpg"));
        assert_eq!(
            jobs[5],
            CoverJob::new(
                "https://steamcdn-a.akamaihd.net/steamcommunity/public/images/apps/42/def.ico".into(),
                PathBuf::from("/cache/icons/42.ico"),
            )
        );
        assert_eq!(jobs[5].miss_marker(), PathBuf::from("/cache/icons/42.ico~"));
    }

    #[tokio::test]
    async fn test_download_writes_targets_and_markers() {
        let dir = tempdir().unwrap();
        let found = CoverJob::new("https://img/found".into(), dir.path().join("a/1.jpg"));
        let absent = CoverJob::new("https://img/absent".into(), dir.path().join("b/1.jpg"));
        let source = FakeSource {
            images: HashMap::from([("https://img/found".to_owned(), b"jpeg".to_vec())]),
            ..FakeSource::default()
        };

        let mut progress = |_: Option<f64>, _: Option<&str>| {};
        let report = download(
            Arc::new(source),
            vec![(1, vec![found.clone(), absent.clone()])],
            &mut progress,
        )
        .await;

        assert_eq!(report.downloaded, 1);
        assert_eq!(report.missing, 1);
        assert_eq!(std::fs::read(&found.target).unwrap(), b"jpeg");
        assert!(absent.miss_marker().is_file());
        assert!(!absent.target.exists());
    }

    #[tokio::test]
    async fn test_settled_jobs_are_skipped() {
        let dir = tempdir().unwrap();
        let done = CoverJob::new("https://img/done".into(), dir.path().join("1.jpg"));
        let marked = CoverJob::new("https://img/marked".into(), dir.path().join("2.jpg"));
        std::fs::write(&done.target, b"old").unwrap();
        std::fs::write(marked.miss_marker(), b"").unwrap();

        let source = Arc::new(FakeSource::default());
        let mut progress = |_: Option<f64>, _: Option<&str>| {};
        let report = download(source.clone(), vec![(1, vec![done, marked])], &mut progress).await;

        assert_eq!(report.skipped, 2);
        assert!(source.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_others() {
        let dir = tempdir().unwrap();
        let mut images = HashMap::new();
        let mut games = Vec::new();
        for id in 0..40u32 {
            let url = format!("https://img/{id}");
            images.insert(url.clone(), vec![id as u8]);
            games.push((id, vec![CoverJob::new(url, dir.path().join(format!("{id}.jpg")))]));
        }
        let source = Arc::new(FakeSource {
            images,
            broken: Some("https://img/7".into()),
            ..FakeSource::default()
        });

        let mut percents = Vec::new();
        let mut progress = |p: Option<f64>, _: Option<&str>| percents.push(p);
        let report = download(source.clone(), games, &mut progress).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.downloaded, 39);
        assert!(!dir.path().join("7.jpg").exists());
        assert!(source.peak.load(Ordering::SeqCst) <= MAX_IN_FLIGHT);
        assert_eq!(percents.last(), Some(&Some(100.0)));
        assert_eq!(percents.len(), 41);
    }
}

//! Dated CSV snapshot storage + HTTP fetch utilities for the YH monitor.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;
use yhmon_core::{Category, ListingRecord, Snapshot, SnapshotDate, SNAPSHOT_COLUMNS};

pub const CRATE_NAME: &str = "yhmon-storage";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot {} already exists with different content; refusing to overwrite", path.display())]
    Conflict { path: PathBuf },
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("malformed snapshot {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub path: PathBuf,
    pub content_hash: String,
    pub record_count: usize,
    /// The file already held identical content; nothing was written.
    pub unchanged: bool,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Serialize records as CSV with the header row first, even when `records` is empty.
pub fn encode_records(path: &Path, records: &[ListingRecord]) -> Result<Vec<u8>, PersistenceError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    wtr.write_record(SNAPSHOT_COLUMNS)
        .map_err(|e| PersistenceError::csv(path, e))?;
    for record in records {
        wtr.serialize(record)
            .map_err(|e| PersistenceError::csv(path, e))?;
    }
    wtr.into_inner()
        .map_err(|e| PersistenceError::io(path, e.into_error()))
}

pub fn decode_records(path: &Path, bytes: &[u8]) -> Result<Vec<ListingRecord>, PersistenceError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let headers = rdr.headers().map_err(|e| PersistenceError::csv(path, e))?;
    if !headers.iter().eq(SNAPSHOT_COLUMNS.iter().copied()) {
        return Err(PersistenceError::Malformed {
            path: path.to_path_buf(),
            reason: format!(
                "expected header `{}`, found `{}`",
                SNAPSHOT_COLUMNS.join(","),
                headers.iter().collect::<Vec<_>>().join(",")
            ),
        });
    }
    rdr.deserialize::<ListingRecord>()
        .map(|row| row.map_err(|e| PersistenceError::csv(path, e)))
        .collect()
}

/// Snapshot files laid out as `<root>/<category>/<YYYYMMDD>.csv`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.root.join(category.slug())
    }

    pub fn snapshot_path(&self, category: Category, date: SnapshotDate) -> PathBuf {
        self.category_dir(category)
            .join(format!("{}.csv", date.file_stem()))
    }

    /// Create the data root if missing.
    pub async fn ensure_root(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating data directory {}", self.root.display()))
    }

    /// Persist a snapshot once. Re-saving identical content is a no-op; differing
    /// content for an existing `(category, date)` is rejected.
    pub async fn save(
        &self,
        category: Category,
        date: SnapshotDate,
        records: &[ListingRecord],
    ) -> Result<SavedSnapshot, PersistenceError> {
        let dir = self.category_dir(category);
        let path = self.snapshot_path(category, date);
        let bytes = encode_records(&path, records)?;
        let content_hash = sha256_hex(&bytes);

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| PersistenceError::io(&dir, e))?;

        if fs::try_exists(&path)
            .await
            .map_err(|e| PersistenceError::io(&path, e))?
        {
            let existing = fs::read(&path)
                .await
                .map_err(|e| PersistenceError::io(&path, e))?;
            if sha256_hex(&existing) != content_hash {
                return Err(PersistenceError::Conflict { path });
            }
            debug!(path = %path.display(), "snapshot already stored with identical content");
            return Ok(SavedSnapshot {
                path,
                content_hash,
                record_count: records.len(),
                unchanged: true,
            });
        }

        let temp_path = dir.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        file.flush()
            .await
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(PersistenceError::io(&path, err));
        }

        info!(path = %path.display(), records = records.len(), "snapshot written");
        Ok(SavedSnapshot {
            path,
            content_hash,
            record_count: records.len(),
            unchanged: false,
        })
    }

    /// Read a stored snapshot back; `Ok(None)` when no file exists for the date.
    pub async fn load(
        &self,
        category: Category,
        date: SnapshotDate,
    ) -> Result<Option<Snapshot>, PersistenceError> {
        let path = self.snapshot_path(category, date);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PersistenceError::io(&path, err)),
        };
        let records = decode_records(&path, &bytes)?;
        Ok(Some(Snapshot::new(category, date, records)))
    }

    /// Dates of every stored snapshot for a category, ascending. Files whose
    /// names are not `YYYYMMDD.csv` are ignored.
    pub async fn list_dates(&self, category: Category) -> Result<Vec<SnapshotDate>, PersistenceError> {
        let dir = self.category_dir(category);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(PersistenceError::io(&dir, err)),
        };

        let mut dates = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(&dir, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|ft| ft.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".csv")) else {
                continue;
            };
            if let Ok(date) = stem.parse::<SnapshotDate>() {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }

    /// Most recent snapshot dated strictly before `date`, by filename date.
    pub async fn latest_before(
        &self,
        category: Category,
        date: SnapshotDate,
    ) -> Result<Option<Snapshot>, PersistenceError> {
        let previous = self
            .list_dates(category)
            .await?
            .into_iter()
            .filter(|d| *d < date)
            .max();
        match previous {
            Some(previous) => self.load(category, previous).await,
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Single-shot GET client. No retries: each source is requested at most once per run.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// GET `url` and decode the body using the charset named by `Content-Type`
    /// (UTF-8 when absent).
    pub async fn fetch_text(&self, source_label: &str, url: &str) -> Result<String, HttpError> {
        let span = info_span!("http_fetch", source = source_label, url);
        self.get_once(url).instrument(span).await
    }

    async fn get_once(&self, url: &str) -> Result<String, HttpError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() {
            return Err(HttpError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp.text().await?;
        debug!(chars = body.len(), %status, %final_url, "fetched");
        Ok(body)
    }
}

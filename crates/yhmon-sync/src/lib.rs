//! Run orchestration: configuration, per-category pipeline, diff and report.

pub mod diff;
pub mod report;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;
use yhmon_adapters::{
    DocumentSource, ExtractionError, Extractor, FetchError, FixtureSource, HttpSource, ListingTarget,
    DEFAULT_BASE_URL,
};
use yhmon_core::{Category, Snapshot, SnapshotDate};
use yhmon_storage::{HttpClientConfig, HttpFetcher, PersistenceError, SnapshotStore};

pub use diff::{diff, diff_records, ChangeSet, FieldChange, ModifiedListing};
pub use report::format_report;

pub const CRATE_NAME: &str = "yhmon-sync";

const USER_AGENT_BASE: &str = "yh-monitor (+https://github.com/your-username/your-repo)";
const REGISTRY_FILE: &str = "sources.yaml";

// Data/IT late-application searches: Gothenburg on-site, and remote.
const ON_SITE_URL: &str = "https://www.yrkeshogskolan.se/hitta-utbildning/sok/?area=data&latest-filter=clearing&place=12&start=638869248000000000&clearing=1&query=&sort=name";
const REMOTE_URL: &str = "https://www.yrkeshogskolan.se/hitta-utbildning/sok/?area=data&latest-filter=form&start=638869248000000000&clearing=1&form=2&query=&sort=name";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {name}: {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("reading {}: {source}", path.display())]
    RegistryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    RegistryParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("category {0} is configured more than once")]
    DuplicateCategory(Category),
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub data_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub contact: Option<String>,
    pub http_timeout_secs: u64,
    pub base_url: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            workspace_root: PathBuf::from("."),
            contact: None,
            http_timeout_secs: 30,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let http_timeout_secs = match lookup("YH_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    name: "YH_HTTP_TIMEOUT_SECS",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => defaults.http_timeout_secs,
        };
        Ok(Self {
            data_dir: lookup("YH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            workspace_root: lookup("YH_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            contact: lookup("YH_CONTACT")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            http_timeout_secs,
            base_url: lookup("YH_BASE_URL").unwrap_or(defaults.base_url),
        })
    }

    /// Neutral agent string, with the operator's contact appended when configured.
    pub fn user_agent(&self) -> String {
        match &self.contact {
            Some(contact) => format!("{USER_AGENT_BASE}; contact: {contact}"),
            None => USER_AGENT_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    pub category: Category,
    pub url: String,
    #[serde(default)]
    pub fixture: Option<PathBuf>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn builtin() -> Self {
        Self {
            sources: vec![
                SourceConfig {
                    category: Category::OnSite,
                    url: ON_SITE_URL.to_string(),
                    fixture: None,
                    enabled: true,
                },
                SourceConfig {
                    category: Category::Remote,
                    url: REMOTE_URL.to_string(),
                    fixture: None,
                    enabled: true,
                },
            ],
        }
    }

    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let registry: Self = serde_yaml::from_str(text).map_err(|source| ConfigError::RegistryParse {
            path: origin.to_path_buf(),
            source,
        })?;
        registry.validate()?;
        Ok(registry)
    }

    /// `<workspace_root>/sources.yaml` when present, otherwise the built-in sources.
    pub fn load(workspace_root: &Path) -> Result<Self, ConfigError> {
        let path = workspace_root.join(REGISTRY_FILE);
        if !path.exists() {
            return Ok(Self::builtin());
        }
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::RegistryRead {
            path: path.clone(),
            source,
        })?;
        Self::parse(&text, &path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.category) {
                return Err(ConfigError::DuplicateCategory(source.category));
            }
        }
        Ok(())
    }

    /// Enabled sources in registry order, fixture paths resolved against the workspace root.
    pub fn targets(&self, workspace_root: &Path) -> Vec<ListingTarget> {
        self.sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| ListingTarget {
                category: s.category,
                url: s.url.clone(),
                fixture_path: workspace_root.join(
                    s.fixture
                        .clone()
                        .unwrap_or_else(|| PathBuf::from("fixtures").join(format!("{}.html", s.category))),
                ),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    Live,
    Offline,
}

#[derive(Debug, Error)]
pub enum CategoryError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone)]
pub struct CategoryReport {
    pub category: Category,
    pub date: SnapshotDate,
    pub snapshot_path: PathBuf,
    pub record_count: usize,
    /// Today's file already existed with identical content.
    pub snapshot_unchanged: bool,
    pub previous_date: Option<SnapshotDate>,
    pub changes: ChangeSet,
    pub rendered: String,
}

#[derive(Debug)]
pub struct CategoryOutcome {
    pub category: Category,
    pub result: Result<CategoryReport, CategoryError>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub date: SnapshotDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<CategoryOutcome>,
}

impl RunSummary {
    pub fn failed(&self) -> impl Iterator<Item = (Category, &CategoryError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.category, e)))
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Re-diff of an already stored snapshot. `Ok(None)` means nothing was stored
/// for the requested date.
#[derive(Debug)]
pub struct StoredComparison {
    pub category: Category,
    pub result: Result<Option<CategoryReport>, PersistenceError>,
}

pub struct Monitor {
    targets: Vec<ListingTarget>,
    store: SnapshotStore,
    extractor: Extractor,
    source: Box<dyn DocumentSource>,
}

impl Monitor {
    pub fn new(config: &MonitorConfig, registry: &SourceRegistry, mode: AcquisitionMode) -> Result<Self> {
        let source: Box<dyn DocumentSource> = match mode {
            AcquisitionMode::Offline => Box::new(FixtureSource),
            AcquisitionMode::Live => {
                let http = HttpFetcher::new(HttpClientConfig {
                    timeout: Duration::from_secs(config.http_timeout_secs),
                    user_agent: Some(config.user_agent()),
                })?;
                Box::new(HttpSource::new(http))
            }
        };
        let extractor = Extractor::new(&config.base_url).context("building listing extractor")?;
        Ok(Self {
            targets: registry.targets(&config.workspace_root),
            store: SnapshotStore::new(config.data_dir.clone()),
            extractor,
            source,
        })
    }

    pub fn with_source(mut self, source: Box<dyn DocumentSource>) -> Self {
        self.source = source;
        self
    }

    /// Process every category once, in order. Category failures are recorded in
    /// the summary; only an unusable data directory aborts the run.
    pub async fn run_once(&self, today: SnapshotDate) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        self.store.ensure_root().await?;
        info!(%run_id, date = %today, source = ?self.source.kind(), categories = self.targets.len(), "run started");

        let mut outcomes = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let span = info_span!("category", %run_id, category = %target.category, date = %today);
            let result = self.process_category(target, today).instrument(span).await;
            if let Err(err) = &result {
                warn!(%run_id, category = %target.category, date = %today, error = %err, "category failed");
            }
            outcomes.push(CategoryOutcome {
                category: target.category,
                result,
            });
        }

        let summary = RunSummary {
            run_id,
            date: today,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(%run_id, failed = summary.failed().count(), "run finished");
        Ok(summary)
    }

    async fn process_category(
        &self,
        target: &ListingTarget,
        today: SnapshotDate,
    ) -> Result<CategoryReport, CategoryError> {
        let document = self.source.fetch(target).await?;
        let records = self.extractor.extract(&document)?;
        info!(records = records.len(), "listings extracted");

        let saved = self.store.save(target.category, today, &records).await?;
        let previous = self.store.latest_before(target.category, today).await?;

        let current = Snapshot::new(target.category, today, records);
        let changes = diff(previous.as_ref(), &current);
        let rendered = format_report(target.category, &changes);

        Ok(CategoryReport {
            category: target.category,
            date: today,
            snapshot_path: saved.path,
            record_count: saved.record_count,
            snapshot_unchanged: saved.unchanged,
            previous_date: previous.map(|p| p.date),
            changes,
            rendered,
        })
    }

    /// Re-render the diff between the stored snapshot for `date` and its predecessor.
    pub async fn compare_stored(&self, date: SnapshotDate) -> Vec<StoredComparison> {
        let mut out = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            out.push(StoredComparison {
                category: target.category,
                result: self.compare_stored_category(target.category, date).await,
            });
        }
        out
    }

    async fn compare_stored_category(
        &self,
        category: Category,
        date: SnapshotDate,
    ) -> Result<Option<CategoryReport>, PersistenceError> {
        let Some(current) = self.store.load(category, date).await? else {
            return Ok(None);
        };
        let previous = self.store.latest_before(category, date).await?;
        let changes = diff(previous.as_ref(), &current);
        Ok(Some(CategoryReport {
            category,
            date,
            snapshot_path: self.store.snapshot_path(category, date),
            record_count: current.len(),
            snapshot_unchanged: true,
            previous_date: previous.map(|p| p.date),
            rendered: format_report(category, &changes),
            changes,
        }))
    }

    pub async fn stored_dates(&self) -> Result<Vec<(Category, Vec<SnapshotDate>)>, PersistenceError> {
        let mut out = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            out.push((target.category, self.store.list_dates(target.category).await?));
        }
        Ok(out)
    }
}

pub fn monitor_from_env(mode: AcquisitionMode) -> Result<Monitor> {
    let config = MonitorConfig::from_env().context("loading configuration")?;
    let registry = SourceRegistry::load(&config.workspace_root).context("loading source registry")?;
    Monitor::new(&config, &registry, mode)
}

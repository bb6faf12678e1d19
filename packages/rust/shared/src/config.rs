//! Application configuration for Harvester.
//!
//! User config lives at `~/.harvester/harvester.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarvesterError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "harvester.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".harvester";

// ---------------------------------------------------------------------------
// Config structs (matching harvester.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Plan defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Retry/backoff policy applied to every source.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Cross-source deduplication.
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Web page adapter.
    #[serde(default)]
    pub web: WebConfig,

    /// arXiv adapter.
    #[serde(default)]
    pub academic: AcademicConfig,

    /// PubMed adapter.
    #[serde(default)]
    pub biomedical: BiomedicalConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Maximum simultaneous in-flight adapter calls.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Items scoring below this are dropped.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,

    /// Per-source item cap when no explicit limit is given.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Time budget for a single fetch attempt.
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,

    /// Optional wall-clock budget for a whole plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            quality_threshold: default_quality_threshold(),
            max_results: default_max_results(),
            source_timeout_secs: default_source_timeout_secs(),
            deadline_secs: None,
        }
    }
}

fn default_max_concurrency() -> usize {
    3
}
fn default_quality_threshold() -> f64 {
    0.3
}
fn default_max_results() -> usize {
    10
}
fn default_source_timeout_secs() -> u64 {
    30
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles each time.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Extra linear delay per retry index.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_jitter_ms() -> u64 {
    100
}

/// `[dedup]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Token-set similarity above which two items are duplicates.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.85
}

/// `[web]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Headless-rendering service accepting `POST {url, waitFor}`.
    /// Pages are fetched directly when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_endpoint: Option<String>,

    /// How long the renderer may wait for dynamic content.
    #[serde(default = "default_render_delay_ms")]
    pub render_delay_ms: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            render_endpoint: None,
            render_delay_ms: default_render_delay_ms(),
        }
    }
}

fn default_user_agent() -> String {
    format!("Harvester/{}", env!("CARGO_PKG_VERSION"))
}
fn default_render_delay_ms() -> u64 {
    2000
}

/// `[academic]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcademicConfig {
    #[serde(default = "default_arxiv_url")]
    pub base_url: String,

    /// Results requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Pause between consecutive page requests.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// Categories used when a plan names none (e.g. `q-bio.NC`).
    #[serde(default)]
    pub default_categories: Vec<String>,
}

impl Default for AcademicConfig {
    fn default() -> Self {
        Self {
            base_url: default_arxiv_url(),
            page_size: default_page_size(),
            page_delay_ms: default_page_delay_ms(),
            default_categories: Vec::new(),
        }
    }
}

fn default_arxiv_url() -> String {
    "http://export.arxiv.org/api/query".into()
}
fn default_page_size() -> usize {
    50
}
fn default_page_delay_ms() -> u64 {
    3000
}

/// `[biomedical]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiomedicalConfig {
    #[serde(default = "default_eutils_url")]
    pub base_url: String,

    /// Identifying `tool` parameter sent with every E-utilities request.
    #[serde(default = "default_tool")]
    pub tool: String,

    /// Contact `email` parameter sent with every E-utilities request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Name of the env var holding the NCBI API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// PMIDs per efetch request (at most 200).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between consecutive E-utilities requests.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

impl Default for BiomedicalConfig {
    fn default() -> Self {
        Self {
            base_url: default_eutils_url(),
            tool: default_tool(),
            email: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

/// Upper bound NCBI accepts for a single efetch batch.
pub const MAX_PUBMED_BATCH: usize = 200;

fn default_eutils_url() -> String {
    "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".into()
}
fn default_tool() -> String {
    "harvester".into()
}
fn default_api_key_env() -> String {
    "NCBI_API_KEY".into()
}
fn default_batch_size() -> usize {
    MAX_PUBMED_BATCH
}
fn default_request_delay_ms() -> u64 {
    340
}

impl AppConfig {
    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        let d = &self.defaults;
        if d.max_concurrency == 0 {
            return Err(HarvesterError::config(
                "defaults.max_concurrency must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&d.quality_threshold) {
            return Err(HarvesterError::config(format!(
                "defaults.quality_threshold must be within [0, 1], got {}",
                d.quality_threshold
            )));
        }
        if d.max_results == 0 {
            return Err(HarvesterError::config(
                "defaults.max_results must be at least 1",
            ));
        }
        if d.source_timeout_secs == 0 {
            return Err(HarvesterError::config(
                "defaults.source_timeout_secs must be at least 1",
            ));
        }
        if d.deadline_secs == Some(0) {
            return Err(HarvesterError::config(
                "defaults.deadline_secs must be at least 1 when set",
            ));
        }
        if !(0.0..=1.0).contains(&self.dedup.similarity_threshold) {
            return Err(HarvesterError::config(format!(
                "dedup.similarity_threshold must be within [0, 1], got {}",
                self.dedup.similarity_threshold
            )));
        }
        if self.academic.page_size == 0 {
            return Err(HarvesterError::config(
                "academic.page_size must be at least 1",
            ));
        }
        let batch = self.biomedical.batch_size;
        if batch == 0 || batch > MAX_PUBMED_BATCH {
            return Err(HarvesterError::config(format!(
                "biomedical.batch_size must be within 1..={MAX_PUBMED_BATCH}, got {batch}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.harvester/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvesterError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.harvester/harvester.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvesterError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        HarvesterError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvesterError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvesterError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvesterError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the NCBI API key from the configured env var, if set and non-empty.
pub fn resolve_api_key(config: &BiomedicalConfig) -> Option<String> {
    std::env::var(&config.api_key_env)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

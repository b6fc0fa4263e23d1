//! Configuration, read once at startup from the environment.
//!
//! Algorithmic code never touches the environment: [`TriageConfig`] is built
//! here and handed to constructors.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::classify::ClassifierConfig;
use crate::classify::taxonomy::{DEFAULT_CATEGORY_LABELS, DEFAULT_URGENCY_LABELS, Taxonomy};
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::pipeline::PipelineConfig;
use crate::source::ImapConfig;
use crate::store::StoreConfig;
use crate::store::sheets::{DEFAULT_BASE_URL as SHEETS_BASE_URL, SheetsConfig};

const DEFAULT_DB_PATH: &str = "./data/mail-triage.db";

/// Logging outputs.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for the daily rolling log file; stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

/// Everything a run needs.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// `None` runs the keyword rules only.
    pub llm: Option<LlmConfig>,
    pub classifier: ClassifierConfig,
    pub taxonomy: Taxonomy,
    pub imap: ImapConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    /// Repeat runs on this interval instead of running once.
    pub poll_interval: Option<Duration>,
    pub logging: LoggingConfig,
}

impl TriageConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup };

        let http_timeout = Duration::from_secs(vars.parse("TRIAGE_HTTP_TIMEOUT_SECS", 30_u64)?);
        let llm = llm_config(&vars, http_timeout)?;
        let classifier = classifier_config(&vars)?;
        let taxonomy = taxonomy(&vars)?;
        let imap = imap_config(&vars)?;
        let store = store_config(&vars, http_timeout)?;
        let pipeline = pipeline_config(&vars)?;

        let poll_interval = match vars.get("TRIAGE_POLL_INTERVAL_SECS") {
            None => None,
            Some(_) => {
                let secs: u64 = vars.parse("TRIAGE_POLL_INTERVAL_SECS", 0)?;
                if secs == 0 {
                    return Err(invalid("TRIAGE_POLL_INTERVAL_SECS", "must be at least 1"));
                }
                Some(Duration::from_secs(secs))
            }
        };

        let logging = LoggingConfig {
            log_dir: vars.get("TRIAGE_LOG_DIR").map(PathBuf::from),
        };

        Ok(Self {
            llm,
            classifier,
            taxonomy,
            imap,
            store,
            pipeline,
            poll_interval,
            logging,
        })
    }
}

fn llm_config(vars: &Vars<impl Fn(&str) -> Option<String>>, timeout: Duration) -> Result<Option<LlmConfig>, ConfigError> {
    if !vars.flag("TRIAGE_LLM_ENABLED", true)? {
        return Ok(None);
    }

    let backend: LlmBackend = match vars.get("TRIAGE_LLM_BACKEND") {
        Some(name) => name.parse()?,
        None => LlmBackend::Groq,
    };
    let key_var = backend.api_key_var();
    let api_key = vars.required(
        key_var,
        &format!("export {key_var}=... or set TRIAGE_LLM_ENABLED=false for keyword rules only"),
    )?;

    Ok(Some(LlmConfig {
        backend,
        api_key: SecretString::from(api_key),
        model: vars
            .get("TRIAGE_MODEL")
            .unwrap_or_else(|| backend.default_model().to_string()),
        base_url: vars
            .get("TRIAGE_LLM_BASE_URL")
            .unwrap_or_else(|| backend.default_base_url().to_string()),
        timeout,
    }))
}

fn classifier_config(vars: &Vars<impl Fn(&str) -> Option<String>>) -> Result<ClassifierConfig, ConfigError> {
    let defaults = ClassifierConfig::default();

    let temperature: f32 = vars.parse("TRIAGE_TEMPERATURE", defaults.temperature)?;
    if !(0.0..=2.0).contains(&temperature) {
        return Err(invalid("TRIAGE_TEMPERATURE", "must be between 0 and 2"));
    }
    let body_prefix_chars = vars.parse("TRIAGE_BODY_PREFIX_CHARS", defaults.body_prefix_chars)?;
    if body_prefix_chars == 0 {
        return Err(invalid("TRIAGE_BODY_PREFIX_CHARS", "must be at least 1"));
    }
    let concurrency = vars.parse("TRIAGE_CONCURRENCY", defaults.concurrency)?;
    if concurrency == 0 {
        return Err(invalid("TRIAGE_CONCURRENCY", "must be at least 1"));
    }
    let call_delay_ms: u64 = vars.parse("TRIAGE_CALL_DELAY_MS", defaults.call_delay.as_millis() as u64)?;

    Ok(ClassifierConfig {
        body_prefix_chars,
        temperature,
        concurrency,
        call_delay: Duration::from_millis(call_delay_ms),
        ..defaults
    })
}

fn taxonomy(vars: &Vars<impl Fn(&str) -> Option<String>>) -> Result<Taxonomy, ConfigError> {
    let categories = vars.list("TRIAGE_CATEGORY_LABELS");
    let urgencies = vars.list("TRIAGE_URGENCY_LABELS");
    if categories.is_none() && urgencies.is_none() {
        return Ok(Taxonomy::default());
    }
    Taxonomy::with_labels(
        categories.unwrap_or_else(|| DEFAULT_CATEGORY_LABELS.map(String::from).to_vec()),
        urgencies.unwrap_or_else(|| DEFAULT_URGENCY_LABELS.map(String::from).to_vec()),
    )
}

fn imap_config(vars: &Vars<impl Fn(&str) -> Option<String>>) -> Result<ImapConfig, ConfigError> {
    Ok(ImapConfig {
        host: vars.required("EMAIL_IMAP_HOST", "export EMAIL_IMAP_HOST=imap.example.com")?,
        port: vars.parse("EMAIL_IMAP_PORT", 993_u16)?,
        username: vars.required("EMAIL_USERNAME", "export EMAIL_USERNAME=support@example.com")?,
        password: SecretString::from(
            vars.required("EMAIL_PASSWORD", "export EMAIL_PASSWORD=... (app password)")?,
        ),
        folder: vars.get("EMAIL_FOLDER").unwrap_or_else(|| "INBOX".to_string()),
        timeout: Duration::from_secs(30),
    })
}

fn store_config(vars: &Vars<impl Fn(&str) -> Option<String>>, timeout: Duration) -> Result<StoreConfig, ConfigError> {
    let kind = vars
        .get("TRIAGE_STORE")
        .unwrap_or_else(|| "sheets".to_string())
        .to_lowercase();

    match kind.as_str() {
        "sheets" => Ok(StoreConfig::Sheets(SheetsConfig {
            spreadsheet_id: vars.required(
                "SPREADSHEET_ID",
                "export SPREADSHEET_ID=... or set TRIAGE_STORE=libsql",
            )?,
            access_token: SecretString::from(vars.required(
                "SHEETS_ACCESS_TOKEN",
                "export SHEETS_ACCESS_TOKEN=... (OAuth access token with spreadsheets scope)",
            )?),
            base_url: SHEETS_BASE_URL.to_string(),
            timeout,
        })),
        "libsql" => Ok(StoreConfig::LibSql {
            path: PathBuf::from(
                vars.get("TRIAGE_DB_PATH")
                    .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            ),
        }),
        other => Err(invalid(
            "TRIAGE_STORE",
            &format!("unknown store '{other}' (expected sheets or libsql)"),
        )),
    }
}

fn pipeline_config(vars: &Vars<impl Fn(&str) -> Option<String>>) -> Result<PipelineConfig, ConfigError> {
    let defaults = PipelineConfig::default();

    let chunk_size = vars.parse("TRIAGE_CHUNK_SIZE", defaults.chunk_size)?;
    if chunk_size == 0 {
        return Err(invalid("TRIAGE_CHUNK_SIZE", "must be at least 1"));
    }
    let max_results = vars.parse("TRIAGE_MAX_RESULTS", defaults.max_results)?;
    if max_results == 0 {
        return Err(invalid("TRIAGE_MAX_RESULTS", "must be at least 1"));
    }
    let chunk_delay_ms: u64 =
        vars.parse("TRIAGE_CHUNK_DELAY_MS", defaults.chunk_delay.as_millis() as u64)?;

    Ok(PipelineConfig {
        destination: vars.get("TRIAGE_DESTINATION").unwrap_or(defaults.destination),
        max_results,
        chunk_size,
        chunk_delay: Duration::from_millis(chunk_delay_ms),
        dry_run: vars.flag("TRIAGE_DRY_RUN", false)?,
    })
}

// ── Lookup helpers ──────────────────────────────────────────────────

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Trimmed, non-empty value.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str, hint: &str) -> Result<String, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        })
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e| invalid(key, &format!("'{raw}': {e}"))),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(invalid(key, &format!("'{other}' is not a boolean"))),
        }
    }

    /// Comma-separated list; `None` when unset.
    fn list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key).map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .collect()
        })
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

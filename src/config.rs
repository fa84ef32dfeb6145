use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded from environment variables.
///
/// Credentials and the sheet handle come from the environment; everything
/// else has defaults tuned for polite scraping.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the target site, e.g. `https://damadam.pk`.
    pub base_url: String,
    pub username: String,
    pub password: String,

    /// JSON file the session cookies are persisted to between runs.
    pub cookies_file: PathBuf,
    /// Append-only CSV history file.
    pub csv_output: PathBuf,
    /// Optional worklist file (one nickname per line, or a CSV with a
    /// NICKNAME column). When unset, the worklist is discovered live from
    /// the online-users page.
    pub worklist_file: Option<PathBuf>,

    /// Base endpoint of the remote spreadsheet values API.
    pub sheet_url: String,
    /// Bearer token for the remote store, supplied by an external
    /// credential collaborator.
    pub sheet_token: Option<String>,
    pub export_to_sheets: bool,
    /// Worksheet tab that profile rows live in.
    pub sheet_tab: String,
    /// Worksheet tab holding the nickname -> tags mapping.
    pub tags_tab: String,

    pub user_agent: String,
    pub page_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub batch_size: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub loop_wait_minutes: u64,
    pub continuous: bool,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            base_url: env::var("BASE_URL").unwrap_or_else(|_| "https://damadam.pk".to_string()),
            username: required_env("DD_USERNAME"),
            password: required_env("DD_PASSWORD"),
            cookies_file: env::var("COOKIES_FILE")
                .unwrap_or_else(|_| "dd-cookies.json".to_string())
                .into(),
            csv_output: env::var("CSV_OUTPUT")
                .unwrap_or_else(|_| "dd-profiles.csv".to_string())
                .into(),
            worklist_file: env::var("WORKLIST_FILE").ok().map(PathBuf::from),
            sheet_url: env::var("GOOGLE_SHEET_URL").unwrap_or_default(),
            sheet_token: env::var("SHEET_TOKEN").ok(),
            export_to_sheets: env_flag("ENABLE_SHEETS", true),
            sheet_tab: env::var("SHEET_TAB").unwrap_or_else(|_| "Sheet1".to_string()),
            tags_tab: env::var("TAGS_TAB").unwrap_or_else(|_| "Tags".to_string()),
            user_agent: env::var("USER_AGENT").unwrap_or_else(|_| {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .to_string()
            }),
            page_timeout: Duration::from_secs(env_parse("PAGE_LOAD_TIMEOUT", 8u64)),
            max_retries: env_parse("MAX_RETRIES", 3u32),
            retry_delay: Duration::from_secs(env_parse("RETRY_DELAY", 5u64)),
            batch_size: env_parse("BATCH_SIZE", 5usize),
            min_delay: Duration::from_secs_f64(env_parse("MIN_DELAY", 0.5f64)),
            max_delay: Duration::from_secs_f64(env_parse("MAX_DELAY", 1.5f64)),
            loop_wait_minutes: env_parse("LOOP_WAIT_MINUTES", 15u64),
            continuous: env_flag("CONTINUOUS", false),
        }
    }

    pub fn login_url(&self) -> String {
        format!("{}/login/", self.base_url.trim_end_matches('/'))
    }

    pub fn online_users_url(&self) -> String {
        format!("{}/online_kon/", self.base_url.trim_end_matches('/'))
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number, got '{raw}'")),
        Err(_) => default,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

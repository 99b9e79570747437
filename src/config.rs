use std::env;

use crate::models::TierReport;
use crate::services::dedup::ConflictStrategy;
use crate::services::merger::TierPolicy;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,

    // Paths
    pub input_path: String,
    pub sources_manifest: Option<String>,
    pub work_dir: String,
    pub publish_dir: String,
    pub blacklist_file: Option<String>,

    // Validation
    pub probe_concurrency: usize,
    pub probe_timeout_ms: u64,
    pub run_deadline_ms: u64,
    pub segments_to_check: usize,
    pub max_playlist_depth: usize,
    pub fatal_failure_threshold: usize,

    // Fetching
    pub fetch_timeout_ms: u64,
    pub max_retries: u32,
    pub max_m3u_size_mb: usize,

    // Schedule
    pub schedule_interval_secs: u64,

    // Merge
    pub tiers: Vec<String>,
    pub conflict_strategy: String,
    pub fingerprint_with_name: bool,

    // Misc
    pub user_agent: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            // Server
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .unwrap_or(3001),

            // Paths
            input_path: env::var("INPUT_PATH").unwrap_or_else(|_| "playlists".to_string()),
            sources_manifest: env::var("SOURCES_MANIFEST").ok().filter(|v| !v.is_empty()),
            work_dir: env::var("WORK_DIR").unwrap_or_else(|_| ".work".to_string()),
            publish_dir: env::var("PUBLISH_DIR").unwrap_or_else(|_| "public".to_string()),
            blacklist_file: env::var("BLACKLIST_FILE").ok().filter(|v| !v.is_empty()),

            // Validation
            probe_concurrency: env::var("PROBE_CONCURRENCY")
                .unwrap_or_else(|_| "200".to_string())
                .parse()
                .unwrap_or(200),

            probe_timeout_ms: env::var("PROBE_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .unwrap_or(10_000), // 10 seconds

            run_deadline_ms: env::var("RUN_DEADLINE_MS")
                .unwrap_or_else(|_| "1800000".to_string())
                .parse()
                .unwrap_or(1_800_000), // 30 minutes, 0 disables

            segments_to_check: env::var("SEGMENTS_TO_CHECK")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),

            max_playlist_depth: env::var("MAX_PLAYLIST_DEPTH")
                .unwrap_or_else(|_| "6".to_string())
                .parse()
                .unwrap_or(6),

            fatal_failure_threshold: env::var("FATAL_FAILURE_THRESHOLD")
                .unwrap_or_else(|_| "64".to_string())
                .parse()
                .unwrap_or(64),

            // Fetching
            fetch_timeout_ms: env::var("FETCH_TIMEOUT_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .unwrap_or(60_000), // 1 minute

            max_retries: env::var("MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),

            max_m3u_size_mb: env::var("MAX_M3U_SIZE_MB")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(100),

            // Schedule
            schedule_interval_secs: env::var("SCHEDULE_INTERVAL_SECS")
                .unwrap_or_else(|_| "21600".to_string())
                .parse()
                .unwrap_or(21_600), // 6 hours

            // Merge
            tiers: env::var("TIERS")
                .unwrap_or_else(|_| "stable,beta,ultra".to_string())
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            conflict_strategy: env::var("CONFLICT_STRATEGY").unwrap_or_else(|_| "first".to_string()),
            fingerprint_with_name: env::var("FINGERPRINT_WITH_NAME")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),

            // Misc - Use VLC user agent to avoid IPTV server blocks
            user_agent: env::var("USER_AGENT")
                .unwrap_or_else(|_| "VLC/3.0.20 LibVLC/3.0.20".to_string()),
        }
    }

    /// Enabled tiers in configured order; unknown names are skipped
    pub fn tier_policies(&self) -> Vec<TierPolicy> {
        let policies: Vec<TierPolicy> = self
            .tiers
            .iter()
            .filter_map(|name| {
                let policy = TierPolicy::by_name(name);
                if policy.is_none() {
                    tracing::warn!("Unknown tier '{}' ignored", name);
                }
                policy
            })
            .collect();

        if policies.is_empty() {
            TierPolicy::defaults()
        } else {
            policies
        }
    }

    pub fn conflict_strategy(&self) -> ConflictStrategy {
        self.conflict_strategy.parse().unwrap_or_else(|e| {
            tracing::warn!("{}; using 'first'", e);
            ConflictStrategy::First
        })
    }

    /// Published file for every enabled tier, before any run has happened
    pub fn expected_outputs(&self) -> Vec<TierReport> {
        self.tier_policies()
            .into_iter()
            .map(|policy| TierReport {
                tier: policy.name,
                file: policy.file,
                entries: 0,
            })
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

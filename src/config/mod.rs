//! Engine configuration, environment-driven per the external-interfaces contract.
//!
//! Every key is read from the process environment with no prefix
//! transformation beyond the literal key name, mirroring the common
//! `${VAR}`-expansion convention used elsewhere in this lineage.

use std::borrow::Cow;
use std::env;
use std::path::PathBuf;

/// Default TTL (seconds) for an unused project context before it becomes
/// eligible for LRU eviction hinting. Purely informational; actual eviction
/// is driven by `max_project_contexts`.
pub const DEFAULT_CONTEXT_TTL_SECONDS: u64 = 3600;
/// Default cap on simultaneously open project contexts.
pub const DEFAULT_MAX_PROJECT_CONTEXTS: usize = 10;
/// Default age (hours) after which a pending decision is considered blocking.
pub const DEFAULT_PENDING_DECISION_THRESHOLD_HOURS: u64 = 24;
/// Default vector weight `w` in the hybrid linear combination.
pub const DEFAULT_HYBRID_VECTOR_WEIGHT: f32 = 0.3;
/// Default per-file diversity cap in recall (0 = unlimited).
pub const DEFAULT_SEARCH_DIVERSITY_MAX_PER_FILE: usize = 3;
/// Default dense-embedding model identifier.
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
/// Default global-store location relative to the user's home directory,
/// used when `GLOBAL_ENABLED` is set without an explicit `GLOBAL_PATH`.
const DEFAULT_GLOBAL_STORE_DIR: &str = ".codemem/global";

/// Resolves `~/.codemem/global`, or `None` if the home directory cannot be
/// determined (e.g. no `$HOME` in a minimal container).
fn default_global_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(DEFAULT_GLOBAL_STORE_DIR))
}

/// Global-store behavior knobs.
#[derive(Debug, Clone)]
pub struct GlobalStoreConfig {
    /// Whether a global (cross-project) store is consulted at all.
    pub enabled: bool,
    /// Filesystem location of the global store, if enabled.
    pub path: Option<PathBuf>,
    /// Whether writes are permitted into the global store.
    pub write_enabled: bool,
}

impl Default for GlobalStoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            write_enabled: false,
        }
    }
}

/// Engine-wide configuration, resolved once at startup from the environment
/// and overridable per-call by explicit caller arguments.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default project path used when a caller omits one.
    pub project_root: Option<PathBuf>,
    /// Absolute override for the per-project store directory.
    pub storage_path: Option<PathBuf>,
    /// Logging verbosity, passed straight to the tracing env-filter.
    pub log_level: String,
    /// LRU cap on the project-context registry.
    pub max_project_contexts: usize,
    /// Unused-project eviction hint, in seconds.
    pub context_ttl_seconds: u64,
    /// Age, in hours, after which a pending decision blocks commits.
    pub pending_decision_threshold_hours: u64,
    /// `w` in the hybrid linear combination.
    pub hybrid_vector_weight: f32,
    /// Per-file diversity cap in recall results.
    pub search_diversity_max_per_file: usize,
    /// Dense-vector embedding model identifier.
    pub embedding_model: String,
    /// Global-store behavior.
    pub global: GlobalStoreConfig,
    /// HMAC key material for preflight tokens. Generated at startup if absent.
    pub token_secret: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project_root: None,
            storage_path: None,
            log_level: "info".to_string(),
            max_project_contexts: DEFAULT_MAX_PROJECT_CONTEXTS,
            context_ttl_seconds: DEFAULT_CONTEXT_TTL_SECONDS,
            pending_decision_threshold_hours: DEFAULT_PENDING_DECISION_THRESHOLD_HOURS,
            hybrid_vector_weight: DEFAULT_HYBRID_VECTOR_WEIGHT,
            search_diversity_max_per_file: DEFAULT_SEARCH_DIVERSITY_MAX_PER_FILE,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            global: GlobalStoreConfig::default(),
            token_secret: None,
        }
    }
}

impl EngineConfig {
    /// Build configuration from the process environment, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            project_root: env::var("PROJECT_ROOT").ok().map(PathBuf::from),
            storage_path: env::var("STORAGE_PATH").ok().map(PathBuf::from),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            max_project_contexts: env_parsed("MAX_PROJECT_CONTEXTS", defaults.max_project_contexts),
            context_ttl_seconds: env_parsed("CONTEXT_TTL_SECONDS", defaults.context_ttl_seconds),
            pending_decision_threshold_hours: env_parsed(
                "PENDING_DECISION_THRESHOLD_HOURS",
                defaults.pending_decision_threshold_hours,
            ),
            hybrid_vector_weight: env_parsed(
                "HYBRID_VECTOR_WEIGHT",
                defaults.hybrid_vector_weight,
            ),
            search_diversity_max_per_file: env_parsed(
                "SEARCH_DIVERSITY_MAX_PER_FILE",
                defaults.search_diversity_max_per_file,
            ),
            embedding_model: env::var("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            global: GlobalStoreConfig {
                enabled: env_bool("GLOBAL_ENABLED", false),
                path: env::var("GLOBAL_PATH").ok().map(PathBuf::from).or_else(default_global_path),
                write_enabled: env_bool("GLOBAL_WRITE_ENABLED", false),
            },
            token_secret: env::var("TOKEN_SECRET").ok(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Expand `${VAR}` references in `input` using the process environment.
/// Unknown variables are left untouched. Returns a borrowed `Cow` when no
/// expansion is needed.
#[must_use]
pub fn expand_env_vars(input: &str) -> Cow<'_, str> {
    if !input.contains("${") {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        if let Some(end) = after.find('}') {
            let var_name = &after[..end];
            if let Ok(value) = env::var(var_name) {
                out.push_str(&value);
            } else {
                out.push_str("${");
                out.push_str(var_name);
                out.push('}');
            }
            rest = &after[end + 1..];
        } else {
            out.push_str("${");
            rest = after;
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

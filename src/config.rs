use once_cell::sync::Lazy;

fn var(name: &str) -> Option<String> {
    std::env::var(format!("CONDUCTOR_{name}")).ok()
}

fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

fn var_u64(name: &str, default: u64) -> u64 {
    var(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Port the control-plane API listens on.
pub static API_PORT: Lazy<u16> = Lazy::new(|| var_u64("API_PORT", 3000) as u16);

/// Port the health endpoints listen on.
pub static HEALTH_PORT: Lazy<u16> = Lazy::new(|| var_u64("HEALTH_PORT", 3001) as u16);

/// Seconds to wait for in-flight requests on shutdown before aborting them.
pub static SHUTDOWN_TIMEOUT_SECONDS: Lazy<u64> =
    Lazy::new(|| var_u64("SHUTDOWN_TIMEOUT_SECONDS", 30));

/// Core database DSN. Must be set via `CONDUCTOR_DATABASE_URL`.
pub static DATABASE_URL: Lazy<String> =
    Lazy::new(|| var("DATABASE_URL").expect("CONDUCTOR_DATABASE_URL must be set"));

/// Metric sink DSN. Falls back to the core database.
pub static METRICS_DATABASE_URL: Lazy<String> =
    Lazy::new(|| var("METRICS_DATABASE_URL").unwrap_or_else(|| DATABASE_URL.clone()));

/// Scheduler lock DSN. Falls back to the core database.
pub static LOCK_DATABASE_URL: Lazy<String> =
    Lazy::new(|| var("LOCK_DATABASE_URL").unwrap_or_else(|| DATABASE_URL.clone()));

/// Advisory-lock name shared by all instances running the schedulers.
pub static SCHEDULER_LOCK_NAME: Lazy<String> =
    Lazy::new(|| var_or("SCHEDULER_LOCK_NAME", "conductor-scheduler"));

/// A connected agent silent for longer than this is marked disconnected.
pub static AGENT_HEALTH_TIMEOUT_SECONDS: Lazy<u64> =
    Lazy::new(|| var_u64("AGENT_HEALTH_TIMEOUT_SECONDS", 120));

/// Cadence of the job timeout / GC sweep and the lease reaper.
pub static JOB_MAINTENANCE_INTERVAL_SECONDS: Lazy<u64> =
    Lazy::new(|| var_u64("JOB_MAINTENANCE_INTERVAL_SECONDS", 60));

/// Jobs stuck in pending/processing longer than this are failed.
pub static JOB_TIMEOUT_SECONDS: Lazy<u64> = Lazy::new(|| var_u64("JOB_TIMEOUT_SECONDS", 600));

/// Completed and failed jobs older than this are deleted.
pub static JOB_RETENTION_SECONDS: Lazy<u64> =
    Lazy::new(|| var_u64("JOB_RETENTION_SECONDS", 86_400));

/// Comma-separated authenticator list, tried in order. `token` and `oauth`.
pub static AUTHENTICATORS: Lazy<Vec<String>> = Lazy::new(|| {
    var_or("AUTHENTICATORS", "token")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
});

/// OIDC issuer URL. Required when `oauth` is configured.
pub static OAUTH_ISSUER: Lazy<Option<String>> = Lazy::new(|| var("OAUTH_ISSUER"));

/// OIDC audience (client id). Required when `oauth` is configured.
pub static OAUTH_CLIENT_ID: Lazy<Option<String>> = Lazy::new(|| var("OAUTH_CLIENT_ID"));

/// Vault master key, 64 hex chars (32 bytes, AES-256-GCM).
pub static VAULT_KEY: Lazy<String> =
    Lazy::new(|| var("VAULT_KEY").expect("CONDUCTOR_VAULT_KEY must be set"));

/// Default log level when `RUST_LOG` is unset.
pub static LOG_LEVEL: Lazy<String> = Lazy::new(|| var_or("LOG_LEVEL", "info"));

/// Log output format: `json` or `pretty`.
pub static LOG_FORMAT: Lazy<String> = Lazy::new(|| var_or("LOG_FORMAT", "json"));

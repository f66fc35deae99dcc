// default app settings
pub const MESHGUARD_VERSION: &str = "v1";
pub const DEFAULT_APP_NAME: &str = "unknown_service";
pub const APP_NAME_ENV_KEY: &str = "MESHGUARD_APP_NAME";
pub const CONF_FILE_PATH_ENV_KEY: &str = "MESHGUARD_CONFIG_FILE_PATH";
pub const CONFIG_FILENAME: &str = "USE_DEFAULT_CONFIGURATION";

// default circuit breaker settings
pub const DEFAULT_SLEEP_WINDOW_MS: u64 = 30_000;
pub const DEFAULT_ERROR_THRESHOLD: u32 = 10;
pub const DEFAULT_SUCCESS_THRESHOLD_HALF_OPEN: u32 = 3;
pub const DEFAULT_CHECK_PERIOD_SEC: u64 = 60;
pub const DEFAULT_STOP_GRACE_MS: u64 = 5_000;

// default fault detect settings
pub const DEFAULT_DETECT_INTERVAL_SEC: u32 = 10;
pub const DEFAULT_INSTANCE_EXPIRE_INTERVAL_MS: u64 = 600_000;

// default log settings
pub const DEFAULT_LOG_LEVEL: &str = "warn";

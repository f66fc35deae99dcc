use serde::{Deserialize, Serialize};
use std::fmt;

use super::constant::*;
use crate::{logging::Logger, Error, Result};

#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct AppConfig {
    // app_name represents the name of current running service.
    pub(crate) app_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            app_name: DEFAULT_APP_NAME.into(),
        }
    }
}

// LogConfig represents the logging configuration.
#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct LogConfig {
    // logger indicates that using logger to replace default logging.
    pub(crate) logger: Logger,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            logger: Logger::EnvLogger(DEFAULT_LOG_LEVEL.into()),
        }
    }
}

// BreakerConfig represents the circuit breaker policy knobs.
#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct BreakerConfig {
    // sleep_window_ms is how long an Open breaker stays closed to traffic
    // before admitting recovery probes.
    pub(crate) sleep_window_ms: u64,
    // error_threshold is the consecutive-failure count that trips a Closed
    // breaker.
    pub(crate) error_threshold: u32,
    // success_threshold_half_open is the consecutive-success count that
    // closes a HalfOpen breaker.
    pub(crate) success_threshold_half_open: u32,
    // check_period_sec is the expiry-worker tick for non-instance
    // resources. Must be at least one second.
    pub(crate) check_period_sec: u64,
    // stop_grace_ms bounds the wait for worker acknowledgement on shutdown.
    pub(crate) stop_grace_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            sleep_window_ms: DEFAULT_SLEEP_WINDOW_MS,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            success_threshold_half_open: DEFAULT_SUCCESS_THRESHOLD_HALF_OPEN,
            check_period_sec: DEFAULT_CHECK_PERIOD_SEC,
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
        }
    }
}

// DetectorConfig represents the fault-detect scheduling knobs.
#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct DetectorConfig {
    // instance_expire_interval_ms is the TTL for instances that are both
    // failing their probes and no longer reported by the caller.
    pub(crate) instance_expire_interval_ms: u64,
    // use_cache_time indicates whether to cache time(ms) with a ticker
    // thread.
    pub(crate) use_cache_time: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            instance_expire_interval_ms: DEFAULT_INSTANCE_EXPIRE_INTERVAL_MS,
            use_cache_time: true,
        }
    }
}

// MeshguardConfig represents the general configuration of the core.
#[derive(Serialize, Deserialize, Debug, Default)]
pub(crate) struct MeshguardConfig {
    pub(crate) app: AppConfig,
    pub(crate) log: LogConfig,
    pub(crate) breaker: BreakerConfig,
    pub(crate) detector: DetectorConfig,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ConfigEntity {
    pub(crate) version: String,
    pub(crate) config: MeshguardConfig,
}

impl Default for ConfigEntity {
    fn default() -> Self {
        ConfigEntity {
            version: MESHGUARD_VERSION.into(),
            config: MeshguardConfig::default(),
        }
    }
}

impl ConfigEntity {
    pub fn new() -> Self {
        ConfigEntity::default()
    }

    pub fn check(&self) -> Result<()> {
        if self.version.is_empty() {
            return Err(Error::msg("empty version"));
        }
        if self.config.app.app_name.is_empty() {
            return Err(Error::msg("empty app name"));
        }
        if self.config.breaker.check_period_sec < 1 {
            return Err(Error::msg(
                "illegal breaker configuration: check_period_sec < 1",
            ));
        }
        if self.config.breaker.error_threshold == 0 {
            return Err(Error::msg(
                "illegal breaker configuration: error_threshold == 0",
            ));
        }
        if self.config.breaker.success_threshold_half_open == 0 {
            return Err(Error::msg(
                "illegal breaker configuration: success_threshold_half_open == 0",
            ));
        }
        if self.config.breaker.sleep_window_ms == 0 {
            return Err(Error::msg(
                "illegal breaker configuration: sleep_window_ms == 0",
            ));
        }
        if self.config.detector.instance_expire_interval_ms == 0 {
            return Err(Error::msg(
                "illegal detector configuration: instance_expire_interval_ms == 0",
            ));
        }
        Ok(())
    }

    pub fn app_name(&self) -> &String {
        &self.config.app.app_name
    }

    pub fn logger(&self) -> &Logger {
        &self.config.log.logger
    }
}

impl fmt::Display for ConfigEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmtted = serde_json::to_string_pretty(self).unwrap();
        write!(f, "{}", fmtted)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_entity_is_valid() {
        let entity = ConfigEntity::new();
        entity.check().unwrap();
    }

    #[test]
    fn zero_check_period_rejected() {
        let mut entity = ConfigEntity::new();
        entity.config.breaker.check_period_sec = 0;
        assert!(entity.check().is_err());
    }

    #[test]
    fn zero_error_threshold_rejected() {
        let mut entity = ConfigEntity::new();
        entity.config.breaker.error_threshold = 0;
        assert!(entity.check().is_err());
    }

    #[test]
    fn yaml_round_trip_keeps_overrides() {
        let yaml = r#"
version: "v1"
config:
  app:
    app_name: "payments-gateway"
  log:
    logger:
      EnvLogger: "info"
  breaker:
    sleep_window_ms: 1000
    error_threshold: 3
    success_threshold_half_open: 2
    check_period_sec: 1
    stop_grace_ms: 500
  detector:
    instance_expire_interval_ms: 500
    use_cache_time: false
"#;
        let entity: ConfigEntity = serde_yaml::from_str(yaml).unwrap();
        entity.check().unwrap();
        assert_eq!(entity.app_name(), "payments-gateway");
        assert_eq!(entity.config.breaker.error_threshold, 3);
        assert_eq!(entity.config.detector.instance_expire_interval_ms, 500);
    }
}

use std::{fs::File, io::Read, path::Path, str::FromStr};

use log::LevelFilter;
use serde::Deserialize;

// Defaults mirror the embedded source's CONFIG_MQTT_BROKER_* constants.
const DEFAULT_PORT: u16 = 1883;
const DEFAULT_MAX_SESSIONS: usize = 32;
const DEFAULT_MAX_STORED_SESSIONS: usize = 16;
const DEFAULT_MAX_SUBSCRIPTIONS: usize = 16;
const DEFAULT_MAX_INFLIGHT: usize = 16;
const DEFAULT_MAX_QUEUED: usize = 64;
const DEFAULT_MAX_RETAINED: usize = 32;
const DEFAULT_INACTIVE_TIMEOUT_SECS: u64 = 10;

#[derive(Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    connection: Connection,
    #[serde(default)]
    limits: Limits,
    #[serde(default)]
    quirks: Quirks,
    #[serde(default)]
    logger: Logger,
}

impl BrokerConfig {
    pub fn port(&self) -> u16 {
        return self.connection.port;
    }

    pub fn enabled(&self) -> bool {
        return self.connection.enabled;
    }

    pub fn max_sessions(&self) -> usize {
        return self.limits.max_sessions;
    }

    pub fn max_stored_sessions(&self) -> usize {
        return self.limits.max_stored_sessions;
    }

    pub fn max_subscriptions(&self) -> usize {
        return self.limits.max_subscriptions;
    }

    pub fn max_inflight(&self) -> usize {
        return self.limits.max_inflight;
    }

    pub fn max_queued(&self) -> usize {
        return self.limits.max_queued;
    }

    pub fn max_retained(&self) -> usize {
        return self.limits.max_retained;
    }

    pub fn inactive_timeout_secs(&self) -> u64 {
        return self.limits.inactive_timeout_secs;
    }

    pub fn tolerant_pubrec(&self) -> bool {
        return self.quirks.tolerant_pubrec;
    }

    pub fn should_log_file(&self) -> bool {
        return self.logger.file;
    }

    pub fn should_log_console(&self) -> bool {
        return self.logger.console;
    }

    pub fn log_level(&self) -> LevelFilter {
        return LevelFilter::from_str(&self.logger.level).expect(&format!(
            "Invalid log level provided: {}. Accepted levels are: Off, Error, Warn, Info, Debug",
            self.logger.level
        ));
    }
}

impl TryFrom<&Path> for BrokerConfig {
    type Error = toml::de::Error;
    fn try_from(value: &Path) -> Result<Self, toml::de::Error> {
        let mut file = match File::open(value) {
            Ok(file) => file,
            Err(err) => {
                log::warn!(
                    "Could not load file: {} to initialize the configuration.",
                    value.to_str().unwrap_or("")
                );
                log::error!("{err}");
                panic!();
            }
        };

        let mut buf = String::new();
        if let Err(err) = file.read_to_string(&mut buf) {
            log::warn!("Could not read file {}", value.to_str().unwrap_or(""));
            log::error!("{err}");
        }

        let config: BrokerConfig = toml::from_str(&buf)?;

        if config.limits.max_inflight > 256 {
            log::warn!(
                "max_inflight of {} is far above the range a 3.1.1 client typically negotiates.",
                config.limits.max_inflight
            );
        }

        if config.limits.inactive_timeout_secs == 0 && config.limits.max_sessions >= 256 {
            log::warn!(
                "inactive_timeout_secs = 0 combined with a large max_sessions means half-open connections never reap."
            );
        }

        return Ok(config);
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct Connection {
    port: u16,
    enabled: bool,
}

impl Default for Connection {
    fn default() -> Self {
        return Self {
            port: DEFAULT_PORT,
            enabled: true,
        };
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct Limits {
    max_sessions: usize,
    max_stored_sessions: usize,
    max_subscriptions: usize,
    max_inflight: usize,
    max_queued: usize,
    max_retained: usize,
    inactive_timeout_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        return Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_stored_sessions: DEFAULT_MAX_STORED_SESSIONS,
            max_subscriptions: DEFAULT_MAX_SUBSCRIPTIONS,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            max_queued: DEFAULT_MAX_QUEUED,
            max_retained: DEFAULT_MAX_RETAINED,
            inactive_timeout_secs: DEFAULT_INACTIVE_TIMEOUT_SECS,
        };
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct Quirks {
    tolerant_pubrec: bool,
}

impl Default for Quirks {
    fn default() -> Self {
        return Self {
            tolerant_pubrec: true,
        };
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct Logger {
    console: bool,
    file: bool,
    level: String,
}

impl Default for Logger {
    fn default() -> Self {
        return Self {
            console: true,
            file: true,
            level: String::from("Info"),
        };
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        return Self {
            connection: Connection::default(),
            limits: Limits::default(),
            quirks: Quirks::default(),
            logger: Logger::default(),
        };
    }
}

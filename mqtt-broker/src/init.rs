use std::{
    fs::{self, File},
    path::Path,
};

use crate::{config::BrokerConfig, logger::BrokerLogger};

pub struct BrokerEnv {
    config: BrokerConfig,
}

impl BrokerEnv {
    pub fn new(config_path: &Path) -> Self {
        match fs::exists(config_path) {
            Ok(true) => {}
            Ok(false) => init_config(config_path),
            Err(err) => {
                panic!("Could not check for config file's existence, {}", err);
            }
        }

        let config = BrokerConfig::try_from(config_path).unwrap();

        return Self { config };
    }

    pub fn init_env(self) -> Self {
        if self.config.should_log_file() || self.config.should_log_console() {
            BrokerLogger::new(&self.config).init().unwrap();

            if self.config.should_log_file() {
                init_log_fs();
            }
        }

        return self;
    }

    pub fn config(self) -> BrokerConfig {
        return self.config;
    }
}

const FILE_CREATE_ERR: &'static str = "Could not create file: ";

pub fn init_log_fs() {
    let path = Path::new("logs");

    if !fs::exists(path).expect("Could not initialize log files") {
        fs::create_dir(path).expect("Could not create logs directory");

        let debug = path.join("debug.log");
        if let Err(err) = File::create(&debug) {
            log::error!("{FILE_CREATE_ERR}{}\n\t{err}", debug.display());
        }

        let error = path.join("error.log");
        if let Err(err) = File::create(&error) {
            log::error!("{FILE_CREATE_ERR}{}\n\t{err}", error.display());
        }

        let main = path.join("main.log");
        if let Err(err) = File::create(&main) {
            log::error!("{FILE_CREATE_ERR}{}\n\t{err}", main.display());
        }

        log::info!("Initialized log directory.")
    }
}

pub fn init_config(config_path: &Path) {
    let contents = r#"
[connection]
port = 1883
enabled = true

[limits]
max_sessions = 32
max_stored_sessions = 16
max_subscriptions = 16
max_inflight = 16
max_queued = 64
max_retained = 32
inactive_timeout_secs = 10

[quirks]
tolerant_pubrec = true

[logger]
console = true
file = true
level = "Info"
"#;

    fs::write(config_path, contents).expect("Could not create config file");
    log::info!("Initialized new config file at {}", config_path.display());
}

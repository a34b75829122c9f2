//! log4rs setup driven by [`LogConfig`].
//!
//! Files under the log directory:
//! - `app.log`: everything at the configured level
//! - `query.log`: compiled queries and cursor lifecycle (`nexusodm::query`)
//! - `dev6.log`: bench lines from `dev6!`, only when enabled

use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

use crate::config::{LogConfig, OdmConfig};
use crate::errors::OdmError;

pub const QUERY_TARGET: &str = "nexusodm::query";
pub const DEV6_TARGET: &str = "nexusodm::dev6";

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;

#[must_use]
pub fn level_filter(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn rolling(base: &Path, stem: &str, keep: u32) -> Result<RollingFileAppender, OdmError> {
    let pattern = base.join(format!("{stem}.{{}}.log"));
    let roller = FixedWindowRoller::builder()
        .build(&pattern.display().to_string(), keep)
        .map_err(|e| OdmError::Config(format!("log roller {stem}: {e}")))?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
    Ok(RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(base.join(format!("{stem}.log")), Box::new(policy))?)
}

/// Build the log4rs configuration for `cfg` without installing it.
///
/// # Errors
/// `Io` when the directory or files cannot be created, `Config` when log4rs rejects the setup.
pub fn build_config(cfg: &LogConfig) -> Result<Config, OdmError> {
    let base = match &cfg.dir {
        Some(d) => d.clone(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    std::fs::create_dir_all(&base)?;
    let keep = u32::try_from(cfg.retention).unwrap_or(u32::MAX);
    let lvl = level_filter(&cfg.level);

    let mut builder = Config::builder()
        .appender(Appender::builder().build("app", Box::new(rolling(&base, "app", keep)?)))
        .appender(Appender::builder().build("query", Box::new(rolling(&base, "query", keep)?)))
        .logger(Logger::builder().appender("query").build(QUERY_TARGET, lvl));

    builder = if cfg.dev6 {
        builder
            .appender(Appender::builder().build("dev6", Box::new(rolling(&base, "dev6", keep)?)))
            .logger(
                Logger::builder()
                    .appender("dev6")
                    .additive(false)
                    .build(DEV6_TARGET, LevelFilter::Trace),
            )
    } else {
        builder.logger(Logger::builder().additive(false).build(DEV6_TARGET, LevelFilter::Off))
    };

    builder
        .build(Root::builder().appender("app").build(lvl))
        .map_err(|e| OdmError::Config(e.to_string()))
}

/// Install logging for the process. A second call is logged and ignored.
///
/// # Errors
/// See [`build_config`].
pub fn configure_logging(cfg: &LogConfig) -> Result<(), OdmError> {
    let config = build_config(cfg)?;
    if let Err(e) = log4rs::init_config(config) {
        log::warn!("logging already configured: {e}");
    }
    Ok(())
}

/// [`configure_logging`] from defaults plus `NEXUSODM_*` environment overrides.
///
/// # Errors
/// `Config` for malformed variables, otherwise see [`build_config`].
pub fn configure_from_env() -> Result<(), OdmError> {
    let cfg = OdmConfig::default().with_env_overrides()?;
    configure_logging(&cfg.log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_map_case_insensitively() {
        assert_eq!(level_filter("DEBUG"), LevelFilter::Debug);
        assert_eq!(level_filter("warn"), LevelFilter::Warn);
        assert_eq!(level_filter("bogus"), LevelFilter::Info);
    }

    #[test]
    fn build_config_creates_files_and_dev6_logger() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LogConfig { dir: Some(dir.path().join("logs")), dev6: true, ..LogConfig::default() };
        let config = build_config(&cfg).unwrap();
        let names: Vec<&str> = config.loggers().iter().map(|l| l.name()).collect();
        assert!(names.contains(&QUERY_TARGET));
        assert!(names.contains(&DEV6_TARGET));
        assert!(dir.path().join("logs").join("app.log").exists());
        assert!(dir.path().join("logs").join("dev6.log").exists());
    }
}

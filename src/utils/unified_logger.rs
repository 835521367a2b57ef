/// 统一日志管理模块
/// 基于 log4rs 为引擎和驱动程序提供标准化的日志输出
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::error::EngineError;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub root_dir: String,
    pub file_name: String,
    pub default_level: String,
    pub max_file_size_mb: u64,
    /// 保留的归档文件数
    pub retention_files: u32,
    pub console_output: bool,
    pub file_output: bool,
    pub pattern: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            root_dir: "logs".to_string(),
            file_name: "shortseller.log".to_string(),
            default_level: "INFO".to_string(),
            max_file_size_mb: 10,
            retention_files: 5,
            console_output: true,
            file_output: true,
            pattern: "[{d(%Y-%m-%d %H:%M:%S%.3f)(utc)}] [{l}] [{M}] {m}{n}".to_string(),
        }
    }
}

impl LogConfig {
    /// 获取日志级别
    pub fn level_filter(&self) -> LevelFilter {
        match self.default_level.to_uppercase().as_str() {
            "TRACE" => LevelFilter::Trace,
            "DEBUG" => LevelFilter::Debug,
            "INFO" => LevelFilter::Info,
            "WARN" => LevelFilter::Warn,
            "ERROR" => LevelFilter::Error,
            "OFF" => LevelFilter::Off,
            _ => LevelFilter::Info,
        }
    }

    pub fn log_path(&self) -> PathBuf {
        PathBuf::from(&self.root_dir).join(&self.file_name)
    }

    /// 归档文件名模板，例如 logs/shortseller.log.{}
    fn archive_pattern(&self) -> String {
        format!("{}.{{}}", self.log_path().display())
    }
}

/// 根据配置构建 log4rs 配置，不安装全局日志器
pub fn build_log4rs_config(config: &LogConfig) -> Result<Config, EngineError> {
    let mut builder = Config::builder();
    let mut root = Root::builder();

    if config.console_output {
        let console = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(&config.pattern)))
            .build();
        builder = builder.appender(Appender::builder().build("console", Box::new(console)));
        root = root.appender("console");
    }

    if config.file_output {
        let roller = FixedWindowRoller::builder()
            .build(&config.archive_pattern(), config.retention_files.max(1))
            .map_err(|e| EngineError::ConfigError(format!("日志归档配置无效: {}", e)))?;
        let trigger = SizeTrigger::new(config.max_file_size_mb.max(1) * 1024 * 1024);
        let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

        let file = RollingFileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(&config.pattern)))
            .build(config.log_path(), Box::new(policy))?;
        builder = builder.appender(Appender::builder().build("file", Box::new(file)));
        root = root.appender("file");
    }

    builder
        .build(root.build(config.level_filter()))
        .map_err(|e| EngineError::ConfigError(format!("日志配置无效: {}", e)))
}

/// 初始化全局日志系统，只能调用一次
pub fn init_logger(config: &LogConfig) -> Result<(), EngineError> {
    let log4rs_config = build_log4rs_config(config)?;
    log4rs::init_config(log4rs_config)
        .map_err(|e| EngineError::Other(format!("日志器已初始化: {}", e)))?;

    log::info!(
        "📝 日志系统初始化完成 级别={} 文件={}",
        config.level_filter(),
        if config.file_output {
            config.log_path().display().to_string()
        } else {
            "-".to_string()
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        let mut config = LogConfig::default();
        config.default_level = "debug".to_string();
        assert_eq!(config.level_filter(), LevelFilter::Debug);
        config.default_level = "verbose".to_string();
        assert_eq!(config.level_filter(), LevelFilter::Info);
    }

    #[test]
    fn builds_console_and_rolling_file_appenders() {
        let dir = std::env::temp_dir().join("shortseller_log_test");
        let config = LogConfig {
            root_dir: dir.display().to_string(),
            ..LogConfig::default()
        };
        let built = build_log4rs_config(&config).unwrap();
        assert_eq!(built.appenders().len(), 2);
        assert_eq!(built.root().level(), LevelFilter::Info);
        assert!(config.archive_pattern().ends_with("shortseller.log.{}"));
    }

    #[test]
    fn console_only_config_skips_file() {
        let config = LogConfig {
            file_output: false,
            ..LogConfig::default()
        };
        let built = build_log4rs_config(&config).unwrap();
        assert_eq!(built.appenders().len(), 1);
    }
}

use thiserror::Error;

use crate::core::types::Asset;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("输入错误: {asset:?} - {reason}")]
    InputError { asset: Option<Asset>, reason: String },

    #[error("不变量被破坏: {0}")]
    InvariantViolation(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("参数验证错误: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("配置加载错误: {0}")]
    ConfigLoadError(#[from] config::ConfigError),

    #[error("YAML配置错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("其他错误: {0}")]
    Other(String),
}

impl EngineError {
    /// 构造针对某个资产的输入错误
    pub fn input(asset: Asset, reason: impl Into<String>) -> Self {
        EngineError::InputError {
            asset: Some(asset),
            reason: reason.into(),
        }
    }

    /// 构造不变量错误
    pub fn invariant(message: impl Into<String>) -> Self {
        EngineError::InvariantViolation(message.into())
    }

    /// 错误分类
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::InputError { .. } => ErrorCategory::Input,
            EngineError::InvariantViolation(_) => ErrorCategory::InvariantViolation,
            EngineError::ConfigError(_)
            | EngineError::ValidationError { .. }
            | EngineError::ConfigLoadError(_)
            | EngineError::YamlError(_) => ErrorCategory::Config,
            _ => ErrorCategory::Internal,
        }
    }

    /// 是否必须终止当前周期
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::InvariantViolation | ErrorCategory::Config
        )
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Input => ErrorSeverity::Warning,
            ErrorCategory::InvariantViolation => ErrorSeverity::Critical,
            ErrorCategory::Config => ErrorSeverity::Critical,
            ErrorCategory::Internal => ErrorSeverity::Error,
        }
    }
}

/// 错误类别
///
/// 校验拒绝和紧急状态不是错误值，它们以带原因码的信号出现
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 畸形或时间戳不单调的输入，丢弃并降级为 NO_ACTION
    Input,
    /// 内部契约被破坏，当前周期立即终止，需要人工介入
    InvariantViolation,
    /// 启动阶段的配置问题
    Config,
    Internal,
}

/// 错误严重程度
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorSeverity {
    Warning,  // 警告性错误，输入被丢弃
    Error,    // 一般错误
    Critical, // 严重错误，需要立即处理
}

pub type Result<T> = std::result::Result<T, EngineError>;

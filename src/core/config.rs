//! 引擎配置模块

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::core::error::EngineError;
use crate::core::types::{Asset, AssetTable};
use crate::utils::unified_logger::LogConfig;

/// 环境变量覆盖前缀，例如 SHORTSELLER__RISK__MAX_TOTAL_EXPOSURE=1.4
pub const ENV_PREFIX: &str = "SHORTSELLER";

/// 引擎主配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 策略名称
    pub name: String,

    /// 收到第一份账户快照之前使用的余额
    pub initial_balance: f64,

    /// 交易资产列表
    pub assets: Vec<AssetConfig>,

    /// 指标配置
    pub indicator: IndicatorConfig,

    /// 市场状态配置
    pub regime: RegimeConfig,

    /// 冷却配置
    pub cooldown: CooldownConfig,

    /// 风控配置
    pub risk: RiskConfig,

    /// 平仓规则配置
    pub exit: ExitConfig,

    /// 周期调度配置
    pub cycle: CycleConfig,

    /// 日志配置
    pub log: LogConfig,
}

/// 单个资产配置
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AssetConfig {
    pub asset: Asset,

    /// 每笔占用余额比例
    pub allocation_pct: f64,

    /// 杠杆倍数
    pub leverage: f64,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 止损止盈价格保留的小数位
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,

    /// 覆盖全局止损比例
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,

    /// 覆盖全局止盈比例
    #[serde(default)]
    pub take_profit_pct: Option<f64>,
}

impl AssetConfig {
    pub fn new(asset: Asset, allocation_pct: f64, leverage: f64) -> Self {
        Self {
            asset,
            allocation_pct,
            leverage,
            enabled: true,
            price_precision: default_price_precision(),
            stop_loss_pct: None,
            take_profit_pct: None,
        }
    }

    /// 杠杆后占用余额的比例
    pub fn exposure_fraction(&self) -> f64 {
        self.allocation_pct * self.leverage
    }
}

/// 指标配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// 快速EMA周期
    pub fast_ema: usize,

    /// 慢速EMA周期
    pub slow_ema: usize,

    /// 每个资产保留的穿越事件数
    pub cross_log_capacity: usize,

    /// 实现波动率窗口（K线数）
    pub volatility_window: usize,
}

/// 市场状态配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// 每日穿越次数上限，达到后进入 INACTIVE
    pub max_daily_crosses: usize,

    /// 入场所需穿越的有效时间（分钟）
    pub cross_recency_minutes: i64,
}

/// 冷却配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// 持仓短于该时长视为快速离场（分钟）
    pub quick_exit_hold_minutes: i64,
    pub quick_exit_cooldown_minutes: i64,

    /// 连续亏损次数限制
    pub loss_streak_threshold: usize,
    pub loss_streak_cooldown_minutes: i64,

    /// 高频交易窗口
    pub high_frequency_window_minutes: i64,
    /// 窗口内超过该笔数触发
    pub high_frequency_max_trades: usize,
    pub high_frequency_cooldown_minutes: i64,

    /// 单日交易笔数上限
    pub daily_trade_limit: usize,
    pub daily_limit_cooldown_minutes: i64,

    /// 组合保护全局冷却
    pub global_cooldown_minutes: i64,
}

/// 风控配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskConfig {
    /// 总敞口上限（余额倍数）
    pub max_total_exposure: f64,

    /// 日最大亏损（权益比例）
    pub max_daily_loss: f64,

    /// 最大回撤（权益比例）
    pub max_drawdown: f64,

    /// 止损比例，空头在入场价上方
    pub stop_loss_pct: f64,

    /// 止盈比例，空头在入场价下方
    pub take_profit_pct: f64,
}

/// 平仓规则配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExitConfig {
    /// 最大持仓时间（小时）
    pub max_holding_hours: i64,
}

/// 周期配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CycleConfig {
    /// K线周期（秒）
    pub interval_secs: u64,

    /// 单个资产任务的超时（毫秒）
    pub task_timeout_ms: u64,

    /// 入场/平仓信号等待结果的时长（秒），至少两个周期
    pub pending_entry_timeout_secs: i64,

    /// 每个资产保留的已平仓交易数
    pub trade_history_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_price_precision() -> u32 {
    2
}

impl EngineConfig {
    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.assets.is_empty() || !self.assets.iter().any(|a| a.enabled) {
            return Err(invalid("assets", "至少需要一个启用的资产"));
        }

        for (i, asset) in self.assets.iter().enumerate() {
            if self.assets[..i].iter().any(|a| a.asset == asset.asset) {
                return Err(invalid("assets", format!("资产 {} 重复配置", asset.asset)));
            }
            if !(asset.allocation_pct > 0.0 && asset.allocation_pct <= 1.0) {
                return Err(invalid(
                    "assets.allocation_pct",
                    format!("{} 分配比例必须在 (0, 1] 之间", asset.asset),
                ));
            }
            if !(asset.leverage >= 1.0) {
                return Err(invalid(
                    "assets.leverage",
                    format!("{} 杠杆不能小于1", asset.asset),
                ));
            }
            for (field, pct) in [
                ("assets.stop_loss_pct", asset.stop_loss_pct),
                ("assets.take_profit_pct", asset.take_profit_pct),
            ] {
                if let Some(p) = pct {
                    check_fraction(field, p)?;
                }
            }
        }

        if self.indicator.fast_ema == 0 || self.indicator.fast_ema >= self.indicator.slow_ema {
            return Err(invalid("indicator", "快速EMA周期必须大于0且小于慢速EMA周期"));
        }
        if self.indicator.cross_log_capacity == 0 || self.indicator.volatility_window < 2 {
            return Err(invalid("indicator", "穿越日志容量和波动率窗口过小"));
        }

        if self.regime.max_daily_crosses == 0 {
            return Err(invalid("regime.max_daily_crosses", "穿越阈值必须为正"));
        }
        check_minutes("regime.cross_recency_minutes", self.regime.cross_recency_minutes)?;

        let cooldown = &self.cooldown;
        for (field, minutes) in [
            ("cooldown.quick_exit_hold_minutes", cooldown.quick_exit_hold_minutes),
            ("cooldown.quick_exit_cooldown_minutes", cooldown.quick_exit_cooldown_minutes),
            ("cooldown.loss_streak_cooldown_minutes", cooldown.loss_streak_cooldown_minutes),
            ("cooldown.high_frequency_window_minutes", cooldown.high_frequency_window_minutes),
            ("cooldown.high_frequency_cooldown_minutes", cooldown.high_frequency_cooldown_minutes),
            ("cooldown.daily_limit_cooldown_minutes", cooldown.daily_limit_cooldown_minutes),
            ("cooldown.global_cooldown_minutes", cooldown.global_cooldown_minutes),
        ] {
            check_minutes(field, minutes)?;
        }
        if cooldown.loss_streak_threshold == 0
            || cooldown.high_frequency_max_trades == 0
            || cooldown.daily_trade_limit == 0
        {
            return Err(invalid("cooldown", "交易笔数阈值必须为正"));
        }

        if !(self.risk.max_total_exposure > 0.0) {
            return Err(invalid("risk.max_total_exposure", "总敞口上限必须为正"));
        }
        check_fraction("risk.max_daily_loss", self.risk.max_daily_loss)?;
        check_fraction("risk.max_drawdown", self.risk.max_drawdown)?;
        check_fraction("risk.stop_loss_pct", self.risk.stop_loss_pct)?;
        check_fraction("risk.take_profit_pct", self.risk.take_profit_pct)?;

        check_minutes(
            "exit.max_holding_hours",
            self.exit.max_holding_hours.saturating_mul(60),
        )?;

        let cycle = &self.cycle;
        if cycle.interval_secs == 0 || cycle.interval_secs > MAX_INTERVAL_SECS {
            return Err(invalid(
                "cycle.interval_secs",
                format!("周期必须在 (0, {}] 秒之间", MAX_INTERVAL_SECS),
            ));
        }
        if cycle.task_timeout_ms == 0 || cycle.task_timeout_ms > cycle.interval_secs * 1_000 {
            return Err(invalid("cycle.task_timeout_ms", "任务超时必须为正且不超过一个周期"));
        }
        // 待成交入场至少保留两个周期
        let min_pending = 2 * cycle.interval_secs as i64;
        if cycle.pending_entry_timeout_secs < min_pending
            || cycle.pending_entry_timeout_secs > MAX_WINDOW_MINUTES * 60
        {
            return Err(invalid(
                "cycle.pending_entry_timeout_secs",
                format!("待成交超时必须在 [{}, {}] 秒之间", min_pending, MAX_WINDOW_MINUTES * 60),
            ));
        }

        Ok(())
    }

    /// 从YAML文件加载配置，并应用环境变量覆盖
    pub fn from_file(path: &str) -> Result<Self, EngineError> {
        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// 从YAML字符串加载配置（不读取环境变量）
    pub fn from_yaml_str(content: &str) -> Result<Self, EngineError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn asset_config(&self, asset: Asset) -> Option<&AssetConfig> {
        self.assets.iter().find(|a| a.asset == asset)
    }

    /// 启用资产的配置表，未配置或禁用的资产为 None
    pub fn asset_table(&self) -> AssetTable<Option<AssetConfig>> {
        AssetTable::from_fn(|asset| self.asset_config(asset).filter(|a| a.enabled).cloned())
    }

    pub fn enabled_assets(&self) -> Vec<Asset> {
        let mut assets: Vec<Asset> = self
            .assets
            .iter()
            .filter(|a| a.enabled)
            .map(|a| a.asset)
            .collect();
        assets.sort();
        assets
    }

    pub fn stop_loss_pct(&self, asset: &AssetConfig) -> f64 {
        asset.stop_loss_pct.unwrap_or(self.risk.stop_loss_pct)
    }

    pub fn take_profit_pct(&self, asset: &AssetConfig) -> f64 {
        asset.take_profit_pct.unwrap_or(self.risk.take_profit_pct)
    }
}

impl RegimeConfig {
    pub fn cross_recency(&self) -> Duration {
        Duration::minutes(self.cross_recency_minutes)
    }
}

impl ExitConfig {
    pub fn max_holding(&self) -> Duration {
        Duration::hours(self.max_holding_hours)
    }
}

impl CycleConfig {
    pub fn pending_entry_timeout(&self) -> Duration {
        Duration::seconds(self.pending_entry_timeout_secs)
    }

    pub fn task_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.task_timeout_ms)
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> EngineError {
    EngineError::ValidationError {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// 时长类配置的上限：30 天
const MAX_WINDOW_MINUTES: i64 = 30 * 24 * 60;
const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

fn check_minutes(field: &str, minutes: i64) -> Result<(), EngineError> {
    if minutes > 0 && minutes <= MAX_WINDOW_MINUTES {
        Ok(())
    } else {
        Err(invalid(
            field,
            format!("{} 分钟超出范围 (0, {}]", minutes, MAX_WINDOW_MINUTES),
        ))
    }
}

fn check_fraction(field: &str, value: f64) -> Result<(), EngineError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("{} 必须在 (0, 1) 之间", value)))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "ShortSeller".to_string(),
            initial_balance: 10_000.0,
            assets: Asset::ALL
                .iter()
                .map(|&asset| AssetConfig::new(asset, 0.07, 10.0))
                .collect(),
            indicator: IndicatorConfig::default(),
            regime: RegimeConfig::default(),
            cooldown: CooldownConfig::default(),
            risk: RiskConfig::default(),
            exit: ExitConfig::default(),
            cycle: CycleConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            fast_ema: 240,
            slow_ema: 600,
            cross_log_capacity: 64,
            volatility_window: 12, // 1小时的5分钟K线
        }
    }
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            max_daily_crosses: 12,
            cross_recency_minutes: 15,
        }
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            quick_exit_hold_minutes: 60,
            quick_exit_cooldown_minutes: 60,
            loss_streak_threshold: 3,
            loss_streak_cooldown_minutes: 120,
            high_frequency_window_minutes: 60,
            high_frequency_max_trades: 5,
            high_frequency_cooldown_minutes: 30,
            daily_trade_limit: 10,
            daily_limit_cooldown_minutes: 240,
            global_cooldown_minutes: 240,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_total_exposure: 2.1,
            max_daily_loss: 0.05, // 5%
            max_drawdown: 0.15,   // 15%
            stop_loss_pct: 0.015, // 1.5%
            take_profit_pct: 0.06, // 6%
        }
    }
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            max_holding_hours: 24,
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            task_timeout_ms: 2_000,
            pending_entry_timeout_secs: 3_600,
            trade_history_capacity: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.enabled_assets(), vec![Asset::BTC, Asset::ETH, Asset::SOL]);
        let total: f64 = config.assets.iter().map(|a| a.exposure_fraction()).sum();
        assert!(total <= config.risk.max_total_exposure + 1e-9);
    }

    #[test]
    fn yaml_sections_fall_back_to_defaults() {
        let yaml = r#"
name: test
assets:
  - asset: BTC
    allocation_pct: 0.05
    leverage: 5
  - asset: SOL
    allocation_pct: 0.07
    leverage: 10
    enabled: false
    stop_loss_pct: 0.02
risk:
  max_total_exposure: 1.5
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.enabled_assets(), vec![Asset::BTC]);
        assert_eq!(config.risk.max_total_exposure, 1.5);
        assert_eq!(config.risk.stop_loss_pct, 0.015);
        assert_eq!(config.indicator.fast_ema, 240);

        let table = config.asset_table();
        assert!(table[Asset::SOL].is_none());
        assert!(table[Asset::ETH].is_none());
        assert_eq!(table[Asset::BTC].as_ref().unwrap().price_precision, 2);
    }

    #[test]
    fn rejects_duplicate_assets_and_bad_periods() {
        let mut config = EngineConfig::default();
        config.assets.push(AssetConfig::new(Asset::BTC, 0.05, 5.0));
        assert!(matches!(
            config.validate(),
            Err(EngineError::ValidationError { .. })
        ));

        let mut config = EngineConfig::default();
        config.indicator.fast_ema = 600;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_durations() {
        let mut config = EngineConfig::default();
        config.cooldown.quick_exit_cooldown_minutes = -60;
        assert!(matches!(
            config.validate(),
            Err(EngineError::ValidationError { ref field, .. })
                if field == "cooldown.quick_exit_cooldown_minutes"
        ));

        let mut config = EngineConfig::default();
        config.cooldown.global_cooldown_minutes = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.exit.max_holding_hours = i64::MAX / 2;
        assert!(config.validate().is_err());
        config.exit.max_holding_hours = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.cooldown.loss_streak_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn pending_timeout_spans_several_cycles() {
        let config = EngineConfig::default();
        assert!(config.cycle.pending_entry_timeout_secs >= 2 * config.cycle.interval_secs as i64);

        let mut config = EngineConfig::default();
        config.cycle.pending_entry_timeout_secs = config.cycle.interval_secs as i64;
        assert!(matches!(
            config.validate(),
            Err(EngineError::ValidationError { ref field, .. })
                if field == "cycle.pending_entry_timeout_secs"
        ));

        config.cycle.pending_entry_timeout_secs = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn per_asset_overrides_take_precedence() {
        let mut config = EngineConfig::default();
        config.assets[0].take_profit_pct = Some(0.03);
        let btc = config.assets[0].clone();
        assert_eq!(config.take_profit_pct(&btc), 0.03);
        assert_eq!(config.stop_loss_pct(&btc), 0.015);
    }

    #[test]
    fn loads_yaml_file_through_config_builder() {
        let path = std::env::temp_dir().join("shortseller_config_test.yml");
        std::fs::write(
            &path,
            "name: file-test\nregime:\n  max_daily_crosses: 8\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.name, "file-test");
        assert_eq!(config.regime.max_daily_crosses, 8);
        assert_eq!(config.assets.len(), 3);

        let _ = std::fs::remove_file(path);
    }
}

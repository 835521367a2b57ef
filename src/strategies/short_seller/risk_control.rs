//! 组合风控校验
//!
//! 按优先级顺序贪心接受入场候选，保证总杠杆敞口不超过上限

use log::info;

use crate::core::config::RiskConfig;
use crate::core::types::Asset;
use crate::strategies::short_seller::coordinator::EntryCandidate;
use crate::strategies::short_seller::portfolio::PortfolioSnapshot;
use crate::strategies::short_seller::signal::ReasonCode;

/// 敞口比较容差
pub const EXPOSURE_TOLERANCE: f64 = 1e-9;

/// 校验结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskVerdict {
    pub accepted: Vec<Asset>,
    pub rejected: Vec<(Asset, ReasonCode)>,
    /// 接受全部候选后的预计敞口（余额倍数）
    pub projected_exposure: f64,
}

impl RiskVerdict {
    pub fn is_accepted(&self, asset: Asset) -> bool {
        self.accepted.contains(&asset)
    }

    pub fn rejection(&self, asset: Asset) -> Option<&ReasonCode> {
        self.rejected
            .iter()
            .find(|(a, _)| *a == asset)
            .map(|(_, reason)| reason)
    }
}

/// 风控校验器
pub struct RiskValidator {
    config: RiskConfig,
}

impl RiskValidator {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// 组合层面的拒绝原因，命中时所有新入场都被拒绝
    fn portfolio_block(&self, snapshot: &PortfolioSnapshot) -> Option<ReasonCode> {
        if snapshot.balance <= 0.0 {
            return Some(ReasonCode::InsufficientBalance);
        }
        if snapshot.daily_loss_fraction > self.config.max_daily_loss {
            return Some(ReasonCode::DailyLossLimit);
        }
        if snapshot.drawdown_fraction > self.config.max_drawdown {
            return Some(ReasonCode::DrawdownLimit);
        }
        None
    }

    /// 校验已排序的入场候选
    ///
    /// `open_exposure` 为持仓和待成交单的敞口合计（余额倍数）
    pub fn validate(
        &self,
        ordered: &[EntryCandidate],
        snapshot: &PortfolioSnapshot,
        open_exposure: f64,
    ) -> RiskVerdict {
        let mut verdict = RiskVerdict {
            projected_exposure: open_exposure,
            ..RiskVerdict::default()
        };

        if let Some(reason) = self.portfolio_block(snapshot) {
            if !ordered.is_empty() {
                info!("🛑 组合风控拒绝全部 {} 个入场候选: {}", ordered.len(), reason);
            }
            verdict.rejected = ordered
                .iter()
                .map(|c| (c.asset, reason.clone()))
                .collect();
            return verdict;
        }

        let balance = snapshot.balance;
        let cap_value = self.config.max_total_exposure * balance;
        let mut running_value = open_exposure * balance;

        for candidate in ordered {
            let entry_value = balance * candidate.exposure_fraction;
            let projected = running_value + entry_value;

            if projected / balance > self.config.max_total_exposure + EXPOSURE_TOLERANCE {
                info!(
                    "{} 🚫 敞口超限: 预计 {:.2} > 上限 {:.2}",
                    candidate.asset, projected, cap_value
                );
                verdict
                    .rejected
                    .push((candidate.asset, ReasonCode::ExposureLimit));
                continue;
            }

            running_value = projected;
            verdict.accepted.push(candidate.asset);
        }

        verdict.projected_exposure = running_value / balance;
        verdict
    }
}

//! 平仓规则

use chrono::{DateTime, Duration, Utc};

use crate::strategies::short_seller::position_manager::Position;
use crate::strategies::short_seller::signal::ReasonCode;

/// 平仓判断所需的当前状态
#[derive(Debug, Clone, Copy)]
pub struct ExitContext {
    pub now: DateTime<Utc>,
    /// 当前K线收盘价，缺少K线时为 None
    pub close: Option<f64>,
    pub global_cooldown: bool,
    /// 本周期发生了 ACTIVE → INACTIVE
    pub regime_deactivated: bool,
}

/// 按优先级检查持仓的平仓条件，命中第一个即返回
///
/// 紧急保护 > 敞口超限 > 状态反转 > 止损 > 止盈 > 最大持仓时间。
/// 没有K线时只检查前两项
pub fn evaluate_exit(position: &Position, ctx: &ExitContext, max_holding: Duration) -> Option<ReasonCode> {
    if ctx.global_cooldown {
        return Some(ReasonCode::PortfolioProtection);
    }
    if position.over_cap {
        return Some(ReasonCode::ExposureLimit);
    }

    let close = ctx.close?;

    if ctx.regime_deactivated {
        return Some(ReasonCode::RegimeExit);
    }
    if position.is_stop_hit(close) {
        return Some(ReasonCode::StopLoss);
    }
    if position.is_take_profit_hit(close) {
        return Some(ReasonCode::TakeProfit);
    }
    if position.age(ctx.now) >= max_holding {
        return Some(ReasonCode::MaxHoldTime);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Asset, OrderSide};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 5, 12, 0, 0).unwrap()
    }

    fn sample_position() -> Position {
        Position {
            asset: Asset::BTC,
            side: OrderSide::Sell,
            entry_price: 98.0,
            quantity: 1.0,
            opened_at: t0(),
            stop_loss: 99.47,
            take_profit: 92.12,
            exposure_fraction: 0.7,
            over_cap: false,
            exit_requested_at: None,
        }
    }

    fn ctx(close: Option<f64>, hours: i64) -> ExitContext {
        ExitContext {
            now: t0() + Duration::hours(hours),
            close,
            global_cooldown: false,
            regime_deactivated: false,
        }
    }

    #[test]
    fn price_levels_trigger_exits() {
        let position = sample_position();
        let max = Duration::hours(24);
        assert_eq!(evaluate_exit(&position, &ctx(Some(97.0), 1), max), None);
        assert_eq!(
            evaluate_exit(&position, &ctx(Some(99.47), 1), max),
            Some(ReasonCode::StopLoss)
        );
        assert_eq!(
            evaluate_exit(&position, &ctx(Some(92.0), 1), max),
            Some(ReasonCode::TakeProfit)
        );
    }

    #[test]
    fn position_older_than_max_hold_exits() {
        let position = sample_position();
        assert_eq!(
            evaluate_exit(&position, &ctx(Some(97.0), 24), Duration::hours(24)),
            Some(ReasonCode::MaxHoldTime)
        );
    }

    #[test]
    fn emergency_outranks_everything_even_without_bar() {
        let position = sample_position();
        let mut context = ctx(None, 30);
        assert_eq!(evaluate_exit(&position, &context, Duration::hours(24)), None);

        context.global_cooldown = true;
        assert_eq!(
            evaluate_exit(&position, &context, Duration::hours(24)),
            Some(ReasonCode::PortfolioProtection)
        );

        let mut context = ctx(Some(100.0), 30);
        context.regime_deactivated = true;
        assert_eq!(
            evaluate_exit(&position, &context, Duration::hours(24)),
            Some(ReasonCode::RegimeExit)
        );
    }

    #[test]
    fn over_cap_position_exits_without_bar() {
        let mut position = sample_position();
        position.over_cap = true;
        assert_eq!(
            evaluate_exit(&position, &ctx(None, 1), Duration::hours(24)),
            Some(ReasonCode::ExposureLimit)
        );

        let mut context = ctx(Some(97.0), 1);
        context.global_cooldown = true;
        assert_eq!(
            evaluate_exit(&position, &context, Duration::hours(24)),
            Some(ReasonCode::PortfolioProtection)
        );
    }
}

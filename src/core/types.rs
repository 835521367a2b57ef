use chrono::{DateTime, NaiveTime, Utc};
/// 统一的类型定义模块
/// 资产枚举、按资产索引的固定表以及行情数据结构
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

// ============= 资产 =============

/// 支持的交易资产
///
/// 闭合枚举，每个资产的状态都存放在 [`AssetTable`] 中对应的槽位
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
    BTC,
    ETH,
    SOL,
}

impl Asset {
    pub const COUNT: usize = 3;
    pub const ALL: [Asset; Asset::COUNT] = [Asset::BTC, Asset::ETH, Asset::SOL];

    /// 在资产表中的下标
    pub fn index(self) -> usize {
        match self {
            Asset::BTC => 0,
            Asset::ETH => 1,
            Asset::SOL => 2,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Asset::BTC => "BTC",
            Asset::ETH => "ETH",
            Asset::SOL => "SOL",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Asset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let base = upper.strip_suffix("USDT").unwrap_or(&upper);
        match base {
            "BTC" => Ok(Asset::BTC),
            "ETH" => Ok(Asset::ETH),
            "SOL" => Ok(Asset::SOL),
            _ => Err(format!("不支持的资产: {}", s)),
        }
    }
}

// ============= 资产表 =============

/// 按资产索引的定长表，保证每个资产恰好一个槽位
#[derive(Debug, Clone, PartialEq)]
pub struct AssetTable<T> {
    slots: [T; Asset::COUNT],
}

impl<T> AssetTable<T> {
    pub fn from_fn(mut f: impl FnMut(Asset) -> T) -> Self {
        Self {
            slots: Asset::ALL.map(|asset| f(asset)),
        }
    }

    pub fn get(&self, asset: Asset) -> &T {
        &self.slots[asset.index()]
    }

    pub fn get_mut(&mut self, asset: Asset) -> &mut T {
        &mut self.slots[asset.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Asset, &T)> {
        Asset::ALL.into_iter().zip(self.slots.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Asset, &mut T)> {
        Asset::ALL.into_iter().zip(self.slots.iter_mut())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}

impl<T: Default> Default for AssetTable<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T> Index<Asset> for AssetTable<T> {
    type Output = T;

    fn index(&self, asset: Asset) -> &T {
        self.get(asset)
    }
}

impl<T> IndexMut<Asset> for AssetTable<T> {
    fn index_mut(&mut self, asset: Asset) -> &mut T {
        self.get_mut(asset)
    }
}

// ============= 行情数据 =============

/// 已收盘K线
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub asset: Asset,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// 检查K线字段是否合法，返回不合法的原因
    pub fn validate(&self) -> Result<(), String> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err("价格必须为正的有限值".to_string());
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err("成交量非法".to_string());
        }
        if self.high < self.low {
            return Err(format!("最高价 {} 低于最低价 {}", self.high, self.low));
        }
        if self.close > self.high || self.close < self.low {
            return Err(format!("收盘价 {} 超出 [{}, {}]", self.close, self.low, self.high));
        }
        Ok(())
    }
}

/// 订单方向
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

// ============= 时间工具 =============

/// 所在UTC自然日的零点
pub fn utc_day_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn asset_table_has_one_slot_per_asset() {
        let mut table: AssetTable<u32> = AssetTable::default();
        table[Asset::ETH] += 2;
        assert_eq!(table.iter().count(), Asset::COUNT);
        assert_eq!(*table.get(Asset::ETH), 2);
        assert_eq!(table[Asset::BTC], 0);
    }

    #[test]
    fn asset_parses_exchange_symbols() {
        assert_eq!("solusdt".parse::<Asset>().unwrap(), Asset::SOL);
        assert_eq!("BTC".parse::<Asset>().unwrap(), Asset::BTC);
        assert!("DOGE".parse::<Asset>().is_err());
    }

    #[test]
    fn bar_validation_rejects_inconsistent_prices() {
        let ts = Utc.with_ymd_and_hms(2025, 8, 5, 12, 0, 0).unwrap();
        let mut bar = Bar {
            asset: Asset::BTC,
            timestamp: ts,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
        };
        assert!(bar.validate().is_ok());

        bar.close = 102.0;
        assert!(bar.validate().is_err());

        bar.close = f64::NAN;
        assert!(bar.validate().is_err());
    }

    #[test]
    fn day_start_truncates_to_midnight() {
        let ts = Utc.with_ymd_and_hms(2025, 8, 5, 23, 59, 59).unwrap();
        assert_eq!(
            utc_day_start(ts),
            Utc.with_ymd_and_hms(2025, 8, 5, 0, 0, 0).unwrap()
        );
    }
}

// 1.0: all the primitives live here. nothing in the engine works without these types.
// IDs, assets, prices, leverage, timestamps. each is a newtype so the compiler catches type mixups.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acct-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

// p2p order ids double as escrow hold ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OfferId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StakeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlanId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CopyId(pub u64);

// 1.1: a non-spendable sub-balance key. escrow orders use their order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HoldId(pub u64);

impl From<OrderId> for HoldId {
    fn from(id: OrderId) -> Self {
        Self(id.0)
    }
}

// 1.2: closed set of assets. precision is fixed per asset and every stored amount respects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Usd,
    Usdt,
    Usdc,
    Btc,
    Eth,
    Sol,
}

impl Asset {
    pub const ALL: [Asset; 6] = [
        Asset::Usd,
        Asset::Usdt,
        Asset::Usdc,
        Asset::Btc,
        Asset::Eth,
        Asset::Sol,
    ];

    pub fn decimals(&self) -> u32 {
        match self {
            Asset::Usd => 2,
            Asset::Usdt => 6,
            Asset::Usdc => 6,
            Asset::Btc => 8,
            Asset::Eth => 18,
            Asset::Sol => 9,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Asset::Usd => "USD",
            Asset::Usdt => "USDT",
            Asset::Usdc => "USDC",
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
            Asset::Sol => "SOL",
        }
    }

    // payouts and conversions truncate toward zero
    pub fn truncate(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.decimals(), RoundingStrategy::ToZero)
    }

    // fees and penalties round away from the user
    pub fn round_up(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.decimals(), RoundingStrategy::AwayFromZero)
    }

    /// Smallest representable amount.
    pub fn unit(&self) -> Decimal {
        Decimal::new(1, self.decimals())
    }

    pub fn fits_precision(&self, amount: Decimal) -> bool {
        amount.normalize().scale() <= self.decimals()
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown asset: {0}")]
pub struct UnknownAsset(pub String);

impl FromStr for Asset {
    type Err = UnknownAsset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Asset::ALL
            .iter()
            .copied()
            .find(|a| a.symbol().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownAsset(s.to_string()))
    }
}

// 1.3: trading pair. price is quoted as units of `quote` per one unit of `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub base: Asset,
    pub quote: Asset,
}

impl Symbol {
    pub fn new(base: Asset, quote: Asset) -> Self {
        Self { base, quote }
    }

    pub fn btc_usdt() -> Self {
        Self::new(Asset::Btc, Asset::Usdt)
    }

    pub fn eth_usdt() -> Self {
        Self::new(Asset::Eth, Asset::Usdt)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Symbol {
    type Err = UnknownAsset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once(|c: char| c == '/' || c == '-')
            .ok_or_else(|| UnknownAsset(s.to_string()))?;
        Ok(Self::new(base.parse()?, quote.parse()?))
    }
}

// Long = profit when price goes up. Short = profit when price goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => dec!(1),
            Side::Short => dec!(-1),
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

// 1.4: price in quote currency per unit of base. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.5: leverage multiplier. must be >= 1x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leverage(Decimal);

impl Leverage {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value >= Decimal::ONE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    // 10x leverage → 10% margin fraction (1/10)
    pub fn initial_margin_fraction(&self) -> Decimal {
        Decimal::ONE / self.0
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

// 1.6: basis points. 100 bps = 1%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bps(i32);

impl Bps {
    pub fn new(bps: i32) -> Self {
        Self(bps)
    }

    pub fn value(&self) -> i32 {
        self.0
    }

    pub fn as_fraction(&self) -> Decimal {
        Decimal::new(self.0 as i64, 4)
    }

    // discounts never push a fee below zero
    pub fn saturating_sub(&self, other: Bps) -> Bps {
        Bps((self.0 - other.0).max(0))
    }
}

pub const MILLIS_PER_DAY: i64 = 86_400_000;

// 1.7: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn plus_millis(&self, ms: i64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    pub fn plus_days(&self, days: i64) -> Self {
        self.plus_millis(days.saturating_mul(MILLIS_PER_DAY))
    }

    // zero when `later` is not after self
    pub fn millis_until(&self, later: &Timestamp) -> i64 {
        (later.0 - self.0).max(0)
    }

    pub fn elapsed_days(&self, later: &Timestamp) -> Decimal {
        Decimal::new(self.millis_until(later), 0) / Decimal::new(MILLIS_PER_DAY, 0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t+{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn leverage_margin_fraction() {
        let lev_10x = Leverage::new(dec!(10)).unwrap();
        assert_eq!(lev_10x.initial_margin_fraction(), dec!(0.1));
        assert!(Leverage::new(dec!(0.5)).is_none());
    }

    #[test]
    fn bps_conversion() {
        assert_eq!(Bps::new(100).as_fraction(), dec!(0.01));
        assert_eq!(Bps::new(50).as_fraction(), dec!(0.005));
        assert_eq!(Bps::new(10).saturating_sub(Bps::new(25)), Bps::new(0));
    }

    #[test]
    fn asset_rounding_never_favors_user() {
        let raw = dec!(0.123456789);
        assert_eq!(Asset::Btc.truncate(raw), dec!(0.12345678));
        assert_eq!(Asset::Btc.round_up(raw), dec!(0.12345679));
        assert_eq!(Asset::Usd.truncate(dec!(-1.239)), dec!(-1.23));
    }

    #[test]
    fn precision_check() {
        assert!(Asset::Usd.fits_precision(dec!(10.50)));
        assert!(Asset::Usd.fits_precision(dec!(10.500000)));
        assert!(!Asset::Usd.fits_precision(dec!(10.001)));
    }

    #[test]
    fn parse_assets_and_symbols() {
        assert_eq!("btc".parse::<Asset>().unwrap(), Asset::Btc);
        assert!("DOGE".parse::<Asset>().is_err());
        assert_eq!("BTC/USDT".parse::<Symbol>().unwrap(), Symbol::btc_usdt());
        assert_eq!("ETH-USDT".parse::<Symbol>().unwrap(), Symbol::eth_usdt());
        assert_eq!(Symbol::btc_usdt().to_string(), "BTC/USDT");
    }

    #[test]
    fn elapsed_days_is_fractional() {
        let start = Timestamp::from_millis(0);
        assert_eq!(start.elapsed_days(&start.plus_days(3)), dec!(3));
        assert_eq!(start.elapsed_days(&Timestamp::from_millis(MILLIS_PER_DAY / 2)), dec!(0.5));
        assert_eq!(start.plus_days(1).elapsed_days(&start), Decimal::ZERO);
    }
}

// 7.0 config.rs: all settings in one place. fees, windows, limits, plans, sweep intervals.
// 7.1 every percentage fee is in bps and gets the account tier's discount subtracted.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::derivatives::TiePolicy;
use crate::scheduler::SweepJob;
use crate::staking::{EarlyExit, PlanKind, StakingPlan};
use crate::types::{Asset, Bps, PlanId, MILLIS_PER_DAY};

const MINUTE_MS: i64 = 60_000;

/** 7.2: swap settings. fee is charged on the output asset */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapConfig {
    pub fee: Bps,
    // Spread applied against the user when quoting from the oracle
    pub spread: Bps,
    // A quote older than this is rejected
    pub quote_ttl_ms: i64,
    // Minimum input amount per conversion
    pub min_amount_in: Decimal,
    // Oracle price older than this cannot be quoted
    pub max_price_age_ms: i64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            fee: Bps::new(10), // 0.1%
            spread: Bps::new(0),
            quote_ttl_ms: 10_000,
            min_amount_in: dec!(0.000001),
            max_price_age_ms: MINUTE_MS,
        }
    }
}

// P2P escrow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    // CREATED orders not paid within this window are cancelled by the sweep
    pub payment_window_ms: i64,
    // Fee deducted from the escrowed asset on release
    pub fee: Bps,
    pub max_message_len: usize,
    pub max_messages_per_order: usize,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            payment_window_ms: 15 * MINUTE_MS,
            fee: Bps::new(0),
            max_message_len: 1_000,
            max_messages_per_order: 200,
        }
    }
}

// Futures settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturesConfig {
    pub max_leverage: Decimal,
    // Charged on entry notional at open
    pub open_fee: Bps,
    // Charged on exit notional at close
    pub close_fee: Bps,
    // Liquidation buffer, also the fee taken at liquidation (on entry notional)
    pub liquidation_fee: Bps,
    pub min_margin: Decimal,
    pub max_price_age_ms: i64,
}

impl Default for FuturesConfig {
    fn default() -> Self {
        Self {
            max_leverage: dec!(100),
            open_fee: Bps::new(5),
            close_fee: Bps::new(5),
            liquidation_fee: Bps::new(50), // 0.5%
            min_margin: dec!(1),
            max_price_age_ms: MINUTE_MS,
        }
    }
}

// Binary option settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryConfig {
    // A winning stake is paid stake × (1 + payout_percent)
    pub payout_percent: Decimal,
    pub min_duration_ms: i64,
    pub max_duration_ms: i64,
    pub min_stake: Decimal,
    pub max_stake: Decimal,
    pub tie_policy: TiePolicy,
    pub max_price_age_ms: i64,
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self {
            payout_percent: dec!(0.85),
            min_duration_ms: MINUTE_MS,
            max_duration_ms: 30 * MILLIS_PER_DAY,
            min_stake: dec!(1),
            max_stake: dec!(100000),
            tie_policy: TiePolicy::Lose,
            max_price_age_ms: MINUTE_MS,
        }
    }
}

// Staking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingConfig {
    pub plans: Vec<StakingPlan>,
    // Matured fixed positions are redeemed by the sweep
    pub auto_redeem: bool,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            plans: vec![
                StakingPlan {
                    id: PlanId(1),
                    asset: Asset::Usdt,
                    apy: dec!(0.05),
                    kind: PlanKind::Flexible,
                    min_amount: dec!(10),
                },
                StakingPlan {
                    id: PlanId(2),
                    asset: Asset::Usdt,
                    apy: dec!(0.12),
                    kind: PlanKind::Fixed {
                        duration_days: 30,
                        early_exit: EarlyExit::Penalty(dec!(0.02)),
                    },
                    min_amount: dec!(100),
                },
                StakingPlan {
                    id: PlanId(3),
                    asset: Asset::Btc,
                    apy: dec!(0.04),
                    kind: PlanKind::Fixed {
                        duration_days: 90,
                        early_exit: EarlyExit::Reject,
                    },
                    min_amount: dec!(0.001),
                },
                StakingPlan {
                    id: PlanId(4),
                    asset: Asset::Eth,
                    apy: dec!(0.045),
                    kind: PlanKind::Flexible,
                    min_amount: dec!(0.01),
                },
            ],
            auto_redeem: true,
        }
    }
}

// Copy trading settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    // Asset allocations are made and mirrored in
    pub settlement_asset: Asset,
    pub min_allocation: Decimal,
    // Share of realized profit paid to the trader when a copy stops
    pub profit_share: Decimal,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            settlement_asset: Asset::Usdt,
            min_allocation: dec!(10),
            profit_share: dec!(0.10),
        }
    }
}

// Sweep intervals per job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub liquidation_interval_ms: i64,
    pub binary_interval_ms: i64,
    pub escrow_interval_ms: i64,
    pub staking_interval_ms: i64,
    pub copy_interval_ms: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            liquidation_interval_ms: 1_000,
            binary_interval_ms: 1_000,
            escrow_interval_ms: MINUTE_MS,
            staking_interval_ms: 60 * MINUTE_MS,
            copy_interval_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self, job: SweepJob) -> i64 {
        match job {
            SweepJob::Liquidations => self.liquidation_interval_ms,
            SweepJob::BinarySettlement => self.binary_interval_ms,
            SweepJob::EscrowTimeouts => self.escrow_interval_ms,
            SweepJob::StakingRewards => self.staking_interval_ms,
            SweepJob::CopyTrading => self.copy_interval_ms,
        }
    }
}

// The complete platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    // Assets the ledger accepts
    pub assets: Vec<Asset>,
    pub swap: SwapConfig,
    pub p2p: P2pConfig,
    pub futures: FuturesConfig,
    pub binary: BinaryConfig,
    pub staking: StakingConfig,
    pub copy: CopyConfig,
    pub scheduler: SchedulerConfig,
    // Event log capacity
    pub max_events: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            assets: Asset::ALL.to_vec(),
            swap: SwapConfig::default(),
            p2p: P2pConfig::default(),
            futures: FuturesConfig::default(),
            binary: BinaryConfig::default(),
            staking: StakingConfig::default(),
            copy: CopyConfig::default(),
            scheduler: SchedulerConfig::default(),
            max_events: 10_000,
        }
    }
}

impl PlatformConfig {
    // Testnet: free swaps and escrow, short payment window so timeouts are easy to exercise
    pub fn testnet() -> Self {
        let mut config = Self::default();
        config.swap.fee = Bps::new(0);
        config.futures.open_fee = Bps::new(0);
        config.futures.close_fee = Bps::new(0);
        config.p2p.payment_window_ms = 5 * MINUTE_MS;
        config
    }

    // Production: conservative leverage, fresh prices, escrow fee
    pub fn production() -> Self {
        let mut config = Self::default();
        config.futures.max_leverage = dec!(20);
        config.futures.max_price_age_ms = 10_000;
        config.binary.max_price_age_ms = 10_000;
        config.swap.max_price_age_ms = 10_000;
        config.swap.spread = Bps::new(5);
        config.p2p.fee = Bps::new(10);
        config.p2p.payment_window_ms = 30 * MINUTE_MS;
        config
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.assets.is_empty() {
            return Err(ConfigError::InvalidAssets {
                reason: "At least one asset must be enabled".to_string(),
            });
        }
        if !self.assets.contains(&self.copy.settlement_asset) {
            return Err(ConfigError::InvalidAssets {
                reason: format!("Copy settlement asset {} is not enabled", self.copy.settlement_asset),
            });
        }

        // swap checks
        if !fee_in_range(self.swap.fee) || !fee_in_range(self.swap.spread) {
            return Err(ConfigError::InvalidSwap {
                reason: "Swap fee and spread must be between 0 and 10000 bps".to_string(),
            });
        }
        if self.swap.quote_ttl_ms <= 0 || self.swap.max_price_age_ms <= 0 {
            return Err(ConfigError::InvalidSwap {
                reason: "Quote TTL and price age must be positive".to_string(),
            });
        }
        if self.swap.min_amount_in < Decimal::ZERO {
            return Err(ConfigError::InvalidSwap {
                reason: "Minimum input cannot be negative".to_string(),
            });
        }

        // p2p checks
        if self.p2p.payment_window_ms <= 0 {
            return Err(ConfigError::InvalidP2p {
                reason: "Payment window must be positive".to_string(),
            });
        }
        if !fee_in_range(self.p2p.fee) {
            return Err(ConfigError::InvalidP2p {
                reason: "Escrow fee must be between 0 and 10000 bps".to_string(),
            });
        }

        // futures checks
        // the liquidation buffer has to sit inside the initial margin at max leverage,
        // otherwise a max-leverage position would open already past its liquidation price
        if self.futures.max_leverage < Decimal::ONE {
            return Err(ConfigError::InvalidFutures {
                reason: "Max leverage must be at least 1x".to_string(),
            });
        }
        if self.futures.liquidation_fee.as_fraction() >= Decimal::ONE / self.futures.max_leverage {
            return Err(ConfigError::InvalidFutures {
                reason: "Liquidation fee must be below the initial margin at max leverage".to_string(),
            });
        }
        if !fee_in_range(self.futures.open_fee)
            || !fee_in_range(self.futures.close_fee)
            || self.futures.liquidation_fee.value() < 0
        {
            return Err(ConfigError::InvalidFutures {
                reason: "Fees must be between 0 and 10000 bps".to_string(),
            });
        }
        if self.futures.min_margin <= Decimal::ZERO || self.futures.max_price_age_ms <= 0 {
            return Err(ConfigError::InvalidFutures {
                reason: "Minimum margin and price age must be positive".to_string(),
            });
        }

        // binary checks
        if self.binary.payout_percent <= Decimal::ZERO {
            return Err(ConfigError::InvalidBinary {
                reason: "Payout percent must be positive".to_string(),
            });
        }
        if self.binary.min_duration_ms <= 0 || self.binary.min_duration_ms > self.binary.max_duration_ms {
            return Err(ConfigError::InvalidBinary {
                reason: "Duration bounds are inconsistent".to_string(),
            });
        }
        if self.binary.min_stake <= Decimal::ZERO || self.binary.min_stake > self.binary.max_stake {
            return Err(ConfigError::InvalidBinary {
                reason: "Stake bounds are inconsistent".to_string(),
            });
        }

        // staking checks
        for (i, plan) in self.staking.plans.iter().enumerate() {
            if self.staking.plans[..i].iter().any(|p| p.id == plan.id) {
                return Err(ConfigError::InvalidStaking {
                    reason: format!("Duplicate plan id {}", plan.id.0),
                });
            }
            plan.validate().map_err(|reason| ConfigError::InvalidStaking { reason })?;
        }

        // copy checks
        if self.copy.profit_share < Decimal::ZERO || self.copy.profit_share >= Decimal::ONE {
            return Err(ConfigError::InvalidCopy {
                reason: "Profit share must be in [0, 1)".to_string(),
            });
        }
        if self.copy.min_allocation <= Decimal::ZERO {
            return Err(ConfigError::InvalidCopy {
                reason: "Minimum allocation must be positive".to_string(),
            });
        }

        // scheduler checks
        if SweepJob::ALL.iter().any(|job| self.scheduler.interval(*job) <= 0) {
            return Err(ConfigError::InvalidScheduler {
                reason: "Sweep intervals must be positive".to_string(),
            });
        }

        Ok(())
    }

    pub fn plan(&self, id: PlanId) -> Option<&StakingPlan> {
        self.staking.plans.iter().find(|p| p.id == id)
    }
}

fn fee_in_range(bps: Bps) -> bool {
    (0..=10_000).contains(&bps.value())
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid assets: {reason}")]
    InvalidAssets { reason: String },

    #[error("Invalid swap config: {reason}")]
    InvalidSwap { reason: String },

    #[error("Invalid p2p config: {reason}")]
    InvalidP2p { reason: String },

    #[error("Invalid futures config: {reason}")]
    InvalidFutures { reason: String },

    #[error("Invalid binary config: {reason}")]
    InvalidBinary { reason: String },

    #[error("Invalid staking config: {reason}")]
    InvalidStaking { reason: String },

    #[error("Invalid copy config: {reason}")]
    InvalidCopy { reason: String },

    #[error("Invalid scheduler config: {reason}")]
    InvalidScheduler { reason: String },

    #[error("Config parse error: {0}")]
    Parse(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

impl Environment {
    pub fn config(&self) -> PlatformConfig {
        match self {
            Environment::Development => PlatformConfig::default(),
            Environment::Testnet => PlatformConfig::testnet(),
            Environment::Production => PlatformConfig::production(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = PlatformConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.swap.fee, Bps::new(10));
    }

    #[test]
    fn test_environment_presets() {
        assert!(Environment::Development.config().validate().is_ok());
        assert!(Environment::Testnet.config().validate().is_ok());
        assert!(Environment::Production.config().validate().is_ok());
        assert_eq!(Environment::Production.config().futures.max_leverage, dec!(20));
    }

    #[test]
    fn test_liquidation_buffer_must_fit_margin() {
        let mut config = PlatformConfig::default();
        // 1% buffer at 100x leverage leaves no margin before liquidation
        config.futures.liquidation_fee = Bps::new(100);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFutures { .. })));
    }

    #[test]
    fn test_duplicate_plan_rejected() {
        let mut config = PlatformConfig::default();
        let first = config.staking.plans[0].clone();
        config.staking.plans.push(first);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidStaking { .. })));
    }

    #[test]
    fn test_invalid_payment_window() {
        let mut config = PlatformConfig::default();
        config.p2p.payment_window_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidP2p { .. })));
    }

    #[test]
    fn test_settlement_asset_must_be_enabled() {
        let mut config = PlatformConfig::default();
        config.assets = vec![Asset::Btc];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAssets { .. })));
    }

    #[test]
    fn test_plan_lookup() {
        let config = PlatformConfig::default();
        assert_eq!(config.plan(PlanId(3)).map(|p| p.asset), Some(Asset::Btc));
        assert!(config.plan(PlanId(99)).is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = PlatformConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back = PlatformConfig::from_json(&json).unwrap();
        assert_eq!(back.staking.plans.len(), config.staking.plans.len());
        assert_eq!(back.binary.tie_policy, config.binary.tie_policy);
        assert!(matches!(PlatformConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }
}

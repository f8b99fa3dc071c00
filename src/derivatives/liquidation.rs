//! Liquidation logic and conditions.
//!
//! A position is liquidated once the mark price crosses its liquidation price. The
//! liquidation price keeps a buffer of `liquidation_fee` inside the margin, so at that price
//! the remaining equity exactly covers the liquidation fee and the credited-back margin is
//! never negative.

use crate::types::{Asset, Leverage, Price, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub enum LiquidationStatus {
    Safe {
        margin_ratio: Decimal,
        liquidation_price: Price,
    },
    AtRisk {
        margin_ratio: Decimal,
        liquidation_price: Price,
        buffer_percent: Decimal,
    },
    Liquidatable {
        margin_ratio: Decimal,
        liquidation_price: Price,
    },
}

/// `entry × (1 − 1/L + f)` for longs, `entry × (1 + 1/L − f)` for shorts.
pub fn calculate_liquidation_price(
    entry_price: Price,
    leverage: Leverage,
    side: Side,
    liquidation_fee_fraction: Decimal,
) -> Price {
    let imf = leverage.initial_margin_fraction();

    let liq_price = match side {
        Side::Long => entry_price.value() * (Decimal::ONE - imf + liquidation_fee_fraction),
        Side::Short => entry_price.value() * (Decimal::ONE + imf - liquidation_fee_fraction),
    };

    Price::new_unchecked(liq_price.max(dec!(0.00000001)))
}

pub fn is_liquidatable(side: Side, liquidation_price: Price, mark: Price) -> bool {
    match side {
        Side::Long => mark <= liquidation_price,
        Side::Short => mark >= liquidation_price,
    }
}

/// Health of a position at `mark`. At risk means within 20% of the margin from liquidation.
pub fn evaluate_liquidation(
    side: Side,
    entry_price: Price,
    amount: Decimal,
    margin: Decimal,
    liquidation_price: Price,
    mark: Price,
) -> LiquidationStatus {
    let notional = amount * mark.value();
    let equity = margin + side.sign() * (mark.value() - entry_price.value()) * amount;
    let margin_ratio = if notional.is_zero() {
        Decimal::MAX
    } else {
        equity / notional
    };

    if is_liquidatable(side, liquidation_price, mark) {
        return LiquidationStatus::Liquidatable {
            margin_ratio,
            liquidation_price,
        };
    }

    // equity left above the liquidation point, as a share of margin
    let distance = (mark.value() - liquidation_price.value()).abs() * amount;
    let buffer_percent = if margin.is_zero() {
        Decimal::ZERO
    } else {
        distance / margin * dec!(100)
    };

    if buffer_percent < dec!(20) {
        return LiquidationStatus::AtRisk {
            margin_ratio,
            liquidation_price,
            buffer_percent,
        };
    }

    LiquidationStatus::Safe {
        margin_ratio,
        liquidation_price,
    }
}

/// Where the margin of a closed position goes. Every field is at the margin asset's
/// precision and `payout + fee + house == margin`, where a negative `house` is paid by the
/// treasury.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSettlement {
    pub pnl: Decimal,
    pub fee: Decimal,
    pub payout: Decimal,
    pub house: Decimal,
}

/// Splits `margin` after a close with `pnl` and a fee of `fee_base` (unrounded).
/// The fee is rounded up but never exceeds the remaining equity; the payout is truncated
/// and floored at zero.
pub fn settle_close(asset: Asset, margin: Decimal, pnl: Decimal, fee_base: Decimal) -> CloseSettlement {
    let equity = (margin + pnl).max(Decimal::ZERO);
    let fee = asset.round_up(fee_base).min(asset.truncate(equity)).max(Decimal::ZERO);
    let payout = asset.truncate(equity - fee).max(Decimal::ZERO);
    CloseSettlement {
        pnl: asset.truncate(pnl),
        fee,
        payout,
        house: margin - payout - fee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidation_price_long() {
        let entry = Price::new_unchecked(dec!(50000));
        let leverage = Leverage::new(dec!(10)).unwrap();

        // 10x gives 10% margin, minus the 0.5% fee buffer: liquidated after a 9.5% drop
        let liq_price = calculate_liquidation_price(entry, leverage, Side::Long, dec!(0.005));
        assert_eq!(liq_price.value(), dec!(45250));

        // without a buffer the whole margin is lost at exactly 1/L
        let bare = calculate_liquidation_price(entry, leverage, Side::Long, Decimal::ZERO);
        assert_eq!(bare.value(), dec!(45000));
    }

    #[test]
    fn liquidation_price_short() {
        let entry = Price::new_unchecked(dec!(50000));
        let leverage = Leverage::new(dec!(10)).unwrap();

        let liq_price = calculate_liquidation_price(entry, leverage, Side::Short, dec!(0.005));
        assert_eq!(liq_price.value(), dec!(54750));
    }

    #[test]
    fn one_x_long_never_hits_zero_price() {
        let entry = Price::new_unchecked(dec!(100));
        let leverage = Leverage::new(dec!(1)).unwrap();
        let liq = calculate_liquidation_price(entry, leverage, Side::Long, Decimal::ZERO);
        assert!(liq.value() > Decimal::ZERO);
    }

    #[test]
    fn status_bands() {
        let entry = Price::new_unchecked(dec!(50000));
        let liq = Price::new_unchecked(dec!(45250));
        let amount = dec!(0.02);
        let margin = dec!(100);

        let safe = evaluate_liquidation(Side::Long, entry, amount, margin, liq, entry);
        assert!(matches!(safe, LiquidationStatus::Safe { .. }));

        // 45500 is 250 above liq → 5 of 100 margin left above the line
        let close = Price::new_unchecked(dec!(45500));
        let at_risk = evaluate_liquidation(Side::Long, entry, amount, margin, liq, close);
        assert!(matches!(at_risk, LiquidationStatus::AtRisk { .. }));

        let crossed = Price::new_unchecked(dec!(44000));
        let gone = evaluate_liquidation(Side::Long, entry, amount, margin, liq, crossed);
        assert!(matches!(gone, LiquidationStatus::Liquidatable { .. }));
    }

    #[test]
    fn settlement_at_liquidation_price_returns_nothing() {
        // 0.02 BTC long from 50000, liquidated at 45250: pnl -95, fee 5 (0.5% of 1000)
        let settled = settle_close(Asset::Usdt, dec!(100), dec!(-95), dec!(5));
        assert_eq!(settled.payout, Decimal::ZERO);
        assert_eq!(settled.fee, dec!(5));
        assert_eq!(settled.house, dec!(95));
    }

    #[test]
    fn settlement_floors_at_zero() {
        let settled = settle_close(Asset::Usdt, dec!(100), dec!(-130), dec!(5));
        assert_eq!(settled.payout, Decimal::ZERO);
        assert_eq!(settled.fee, Decimal::ZERO);
        assert_eq!(settled.house, dec!(100));
    }

    #[test]
    fn profitable_close_is_paid_by_house() {
        let settled = settle_close(Asset::Usdt, dec!(100), dec!(50), dec!(0.5250001));
        assert_eq!(settled.fee, dec!(0.525001));
        assert_eq!(settled.payout, dec!(149.474999));
        assert_eq!(settled.payout + settled.fee + settled.house, dec!(100));
        assert!(settled.house < Decimal::ZERO);
    }
}

//! Quoting and conversion.

use super::core::Platform;
use super::results::{EngineError, SwapResult};
use crate::events::{EventPayload, SwapExecutedEvent};
use crate::ledger::{Journal, Leg, SystemAccount, TxKind};
use crate::swap::{compute_output, spread_price, SwapQuote};
use crate::types::{AccountId, Asset, Symbol};
use rust_decimal::Decimal;
use tracing::info;

impl Platform {
    /// Quote for selling `asset_in` into `asset_out` at the oracle price plus spread.
    pub fn quote(&self, asset_in: Asset, asset_out: Asset) -> Result<SwapQuote, EngineError> {
        if asset_in == asset_out {
            return Err(EngineError::validation("cannot swap an asset into itself"));
        }
        let max_age = self.config.swap.max_price_age_ms;

        // buying the base is the common case, so try asset_out/asset_in first
        let mut last_err = None;
        for symbol in [Symbol::new(asset_out, asset_in), Symbol::new(asset_in, asset_out)] {
            match self.fresh_price(symbol, max_age) {
                Ok(quote) => {
                    let price = spread_price(symbol, asset_in, quote.price, self.config.swap.spread);
                    return SwapQuote::new(symbol, asset_in, price, self.now());
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::PriceUnavailable(format!("{asset_in}/{asset_out}"))))
    }

    /// Converts `amount_in` of `asset_in` into `asset_out` at `quote`, against the treasury.
    pub fn convert(
        &self,
        account_id: AccountId,
        asset_in: Asset,
        amount_in: Decimal,
        asset_out: Asset,
        quote: &SwapQuote,
    ) -> Result<SwapResult, EngineError> {
        if !quote.matches(asset_in, asset_out) {
            return Err(EngineError::validation(format!(
                "quote is for {} → {}, not {asset_in} → {asset_out}",
                quote.asset_in, quote.asset_out
            )));
        }
        if amount_in <= Decimal::ZERO {
            return Err(EngineError::validation(format!("amount must be positive, got {amount_in}")));
        }
        if amount_in < self.config.swap.min_amount_in {
            return Err(EngineError::validation(format!(
                "amount {amount_in} below minimum {}",
                self.config.swap.min_amount_in
            )));
        }

        let now = self.now();
        if quote.is_expired(now, self.config.swap.quote_ttl_ms) {
            return Err(EngineError::QuoteExpired {
                issued_at: quote.issued_at,
                now,
            });
        }

        let fee_rate = self.fee_rate(account_id, self.config.swap.fee)?;
        let out = compute_output(quote, amount_in, fee_rate)
            .ok_or_else(|| EngineError::validation("conversion overflows"))?;
        if out.net_out <= Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "{amount_in} {asset_in} is too small to buy any {asset_out}"
            )));
        }

        let treasury = SystemAccount::Treasury.id();
        let reference = self.reference("swap");
        let journal = Journal::new(TxKind::Swap, reference.clone())
            .push(Leg::debit(account_id, asset_in, amount_in).with_counter(asset_out, out.net_out).with_fee(out.fee))
            .credit(treasury, asset_in, amount_in)
            .debit(treasury, asset_out, out.net_out)
            .push(Leg::credit(account_id, asset_out, out.net_out).with_counter(asset_in, amount_in).with_fee(out.fee))
            .transfer_as(TxKind::Fee, treasury, SystemAccount::FeeSink.id(), asset_out, out.fee);
        let receipt = self.ledger.commit(journal)?;

        info!(
            account = %account_id,
            %asset_in,
            %amount_in,
            %asset_out,
            amount_out = %out.net_out,
            fee = %out.fee,
            "swap executed"
        );
        self.emit(EventPayload::SwapExecuted(SwapExecutedEvent {
            account_id,
            asset_in,
            amount_in,
            asset_out,
            amount_out: out.net_out,
            fee: out.fee,
        }));

        Ok(SwapResult {
            reference,
            asset_in,
            amount_in,
            asset_out,
            gross_out: out.gross_out,
            fee: out.fee,
            amount_out: out.net_out,
            tx_ids: receipt.tx_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::config::PlatformConfig;
    use crate::directory::InMemoryDirectory;
    use crate::engine::{EngineError, Platform};
    use crate::ledger::{SystemAccount, Tier};
    use crate::oracle::InMemoryOracle;
    use crate::swap::SwapQuote;
    use crate::types::{AccountId, Asset, Price, Symbol, Timestamp};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        platform: Platform,
        oracle: Arc<InMemoryOracle>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let directory = InMemoryDirectory::new();
        directory.register(AccountId(1));
        let oracle = Arc::new(InMemoryOracle::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
        let platform = Platform::new(PlatformConfig::default(), oracle.clone(), Arc::new(directory), clock.clone()).unwrap();
        platform.open_account(AccountId(1), Tier::Standard).unwrap();
        platform.deposit(AccountId(1), Asset::Usdt, dec!(1000)).unwrap();
        Fixture { platform, oracle, clock }
    }

    #[test]
    fn convert_at_fixed_quote() {
        let f = fixture();
        let quote = SwapQuote::new(
            Symbol::btc_usdt(),
            Asset::Usdt,
            Price::new_unchecked(dec!(50000)),
            f.platform.now(),
        )
        .unwrap();
        let result = f
            .platform
            .convert(AccountId(1), Asset::Usdt, dec!(1000), Asset::Btc, &quote)
            .unwrap();

        assert_eq!(result.amount_out, dec!(0.01998));
        assert_eq!(f.platform.balance(AccountId(1), Asset::Usdt).unwrap(), Decimal::ZERO);
        assert_eq!(f.platform.balance(AccountId(1), Asset::Btc).unwrap(), dec!(0.01998));
        assert_eq!(
            f.platform.balance(SystemAccount::FeeSink.id(), Asset::Btc).unwrap(),
            dec!(0.00002)
        );
        assert_eq!(f.platform.ledger().total_supply(Asset::Btc).unwrap(), Decimal::ZERO);
        f.platform.ledger().audit().unwrap();
    }

    #[test]
    fn expired_quote_changes_nothing() {
        let f = fixture();
        let quote = SwapQuote::new(
            Symbol::btc_usdt(),
            Asset::Usdt,
            Price::new_unchecked(dec!(50000)),
            f.platform.now(),
        )
        .unwrap();
        f.clock.advance(10_001);
        let before = f.platform.ledger().transaction_count().unwrap();
        let err = f
            .platform
            .convert(AccountId(1), Asset::Usdt, dec!(1000), Asset::Btc, &quote)
            .unwrap_err();
        assert!(matches!(err, EngineError::QuoteExpired { .. }));
        assert_eq!(f.platform.ledger().transaction_count().unwrap(), before);
    }

    #[test]
    fn oracle_quote_and_mismatch() {
        let f = fixture();
        f.oracle
            .set_price(Symbol::btc_usdt(), Price::new_unchecked(dec!(40000)), f.platform.now());
        let quote = f.platform.quote(Asset::Usdt, Asset::Btc).unwrap();
        assert_eq!(quote.symbol, Symbol::btc_usdt());
        assert_eq!(quote.asset_out, Asset::Btc);

        // selling BTC resolves the same pair the other way round
        let sell = f.platform.quote(Asset::Btc, Asset::Usdt).unwrap();
        assert_eq!(sell.asset_out, Asset::Usdt);

        assert!(matches!(
            f.platform.convert(AccountId(1), Asset::Btc, dec!(1), Asset::Usdt, &quote),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            f.platform.quote(Asset::Sol, Asset::Eth),
            Err(EngineError::PriceUnavailable(_))
        ));
    }

    #[test]
    fn insufficient_balance() {
        let f = fixture();
        let quote = SwapQuote::new(
            Symbol::btc_usdt(),
            Asset::Usdt,
            Price::new_unchecked(dec!(50000)),
            f.platform.now(),
        )
        .unwrap();
        assert!(matches!(
            f.platform.convert(AccountId(1), Asset::Usdt, dec!(1001), Asset::Btc, &quote),
            Err(EngineError::InsufficientBalance { .. })
        ));
    }
}

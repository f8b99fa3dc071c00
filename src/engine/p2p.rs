//! P2P offers, escrowed orders and disputes.
//!
//! Lock order: the order row (or offer row when opening) is held while the ledger commits.
//! An order row and an offer row are never held together.

use super::core::Platform;
use super::results::{EngineError, SweepReport};
use crate::events::{EscrowTransitionEvent, EventPayload};
use crate::ledger::{Journal, SystemAccount, TxKind};
use crate::p2p::{ChatAuthor, ChatMessage, DisputeOutcome, EscrowStatus, OfferSide, OrderType, P2pOffer, P2pOrder};
use crate::scheduler::SweepJob;
use crate::types::{AccountId, Asset, HoldId, OfferId, OrderId, Timestamp};
use rust_decimal::Decimal;
use tracing::info;

/// Terms of a new offer.
#[derive(Debug, Clone)]
pub struct OfferTerms {
    pub side: OfferSide,
    pub asset: Asset,
    pub fiat_currency: String,
    pub price: Decimal,
    pub amount: Decimal,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
}

impl Platform {
    pub fn create_offer(&self, maker: AccountId, terms: OfferTerms) -> Result<OfferId, EngineError> {
        self.require_account(maker)?;
        if !self.config.assets.contains(&terms.asset) {
            return Err(EngineError::validation(format!("asset {} not enabled", terms.asset)));
        }
        if terms.price <= Decimal::ZERO || terms.amount <= Decimal::ZERO || terms.min_amount <= Decimal::ZERO {
            return Err(EngineError::validation("price, amount and minimum must be positive"));
        }
        if terms.min_amount > terms.max_amount {
            return Err(EngineError::validation("minimum exceeds maximum"));
        }
        if !terms.asset.fits_precision(terms.amount) {
            return Err(EngineError::validation(format!("{} exceeds {} precision", terms.amount, terms.asset)));
        }
        if terms.fiat_currency.trim().is_empty() {
            return Err(EngineError::validation("fiat currency required"));
        }

        let id = OfferId(self.offers.next_id());
        self.offers.insert(
            id,
            P2pOffer {
                id,
                maker,
                side: terms.side,
                asset: terms.asset,
                fiat_currency: terms.fiat_currency,
                price: terms.price,
                remaining: terms.amount,
                min_amount: terms.min_amount,
                max_amount: terms.max_amount,
                active: true,
                created_at: self.now(),
            },
        );
        info!(offer = id.0, maker = %maker, side = ?terms.side, asset = %terms.asset, "p2p offer created");
        Ok(id)
    }

    pub fn deactivate_offer(&self, offer_id: OfferId, maker: AccountId) -> Result<(), EngineError> {
        self.offers.with(offer_id, |offer| {
            if offer.maker != maker {
                return Err(EngineError::Unauthorized {
                    account: maker,
                    action: "deactivate this offer",
                });
            }
            offer.active = false;
            Ok(())
        })
    }

    /// Opens an order against an offer and escrows the seller's asset.
    pub fn open_order(&self, offer_id: OfferId, taker: AccountId, amount: Decimal) -> Result<OrderId, EngineError> {
        self.require_account(taker)?;
        let now = self.now();

        let order = self.offers.with(offer_id, |offer| {
            if offer.maker == taker {
                return Err(EngineError::validation("cannot take your own offer"));
            }
            offer.check_amount(amount)?;
            if !offer.asset.fits_precision(amount) {
                return Err(EngineError::validation(format!("{amount} exceeds {} precision", offer.asset)));
            }

            let (buyer, seller) = offer.parties(taker);
            let order_type = match offer.side {
                OfferSide::Sell => OrderType::Buy,
                OfferSide::Buy => OrderType::Sell,
            };
            let fee = offer.asset.round_up(amount * self.config.p2p.fee.as_fraction()).min(amount);
            if fee >= amount {
                return Err(EngineError::validation(format!(
                    "{amount} {} does not cover the {fee} fee",
                    offer.asset
                )));
            }
            let id = OrderId(self.orders.next_id());
            let mut order = P2pOrder {
                id,
                offer_id,
                order_type,
                buyer,
                seller,
                asset: offer.asset,
                amount,
                fiat_amount: (amount * offer.price).round_dp(2),
                fiat_currency: offer.fiat_currency.clone(),
                fee,
                status: EscrowStatus::Created,
                messages: Vec::new(),
                created_at: now,
                expires_at: now.plus_millis(self.config.p2p.payment_window_ms),
                paid_at: None,
                closed_at: None,
                dispute_reason: None,
                disputed_by: None,
            };

            self.ledger
                .hold(seller, offer.asset, amount, HoldId::from(id), order.reference())?;

            offer.remaining -= amount;
            order.system_message(
                format!("{amount} {} held in escrow for {} {}", order.asset, order.fiat_amount, order.fiat_currency),
                now,
            );
            Ok(order)
        })?;

        let id = order.id;
        info!(order = id.0, buyer = %order.buyer, seller = %order.seller, amount = %amount, "p2p order created");
        self.emit_escrow(id, None, EscrowStatus::Created, Some(taker));
        self.orders.insert(id, order);
        Ok(id)
    }

    /// Buyer attests the fiat payment was sent.
    pub fn mark_paid(&self, order_id: OrderId, buyer: AccountId) -> Result<(), EngineError> {
        let now = self.now();
        self.orders.with(order_id, |order| {
            if order.buyer != buyer {
                return Err(EngineError::Unauthorized {
                    account: buyer,
                    action: "mark this order paid",
                });
            }
            order.check_transition(EscrowStatus::Paid, "mark paid")?;
            if order.is_expired(now) {
                return Err(EngineError::Timeout(order.label()));
            }
            order.transition(EscrowStatus::Paid, now);
            Ok(())
        })?;
        self.emit_escrow(order_id, Some(EscrowStatus::Created), EscrowStatus::Paid, Some(buyer));
        Ok(())
    }

    /// Seller confirms the fiat arrived; the escrow goes to the buyer less the fee.
    pub fn release(&self, order_id: OrderId, seller: AccountId) -> Result<(), EngineError> {
        let now = self.now();
        self.orders.with(order_id, |order| {
            if order.seller != seller {
                return Err(EngineError::Unauthorized {
                    account: seller,
                    action: "release this order",
                });
            }
            order.check_transition(EscrowStatus::Released, "release")?;
            self.settle_release(order)?;
            order.transition(EscrowStatus::Released, now);
            Ok(())
        })?;
        info!(order = order_id.0, "p2p order released");
        self.emit_escrow(order_id, Some(EscrowStatus::Paid), EscrowStatus::Released, Some(seller));
        Ok(())
    }

    /// Buyer backs out. Sellers cannot cancel; they wait for the timeout or dispute.
    pub fn cancel_order(&self, order_id: OrderId, actor: AccountId) -> Result<(), EngineError> {
        let now = self.now();
        let (previous, offer_id, amount) = self.orders.with(order_id, |order| {
            if order.buyer != actor {
                return Err(EngineError::Unauthorized {
                    account: actor,
                    action: "cancel this order",
                });
            }
            order.check_transition(EscrowStatus::Cancelled, "cancel")?;
            self.settle_refund(order)?;
            let previous = order.transition(EscrowStatus::Cancelled, now);
            Ok((previous, order.offer_id, order.amount))
        })?;
        self.restore_offer(offer_id, amount)?;
        info!(order = order_id.0, "p2p order cancelled by buyer");
        self.emit_escrow(order_id, Some(previous), EscrowStatus::Cancelled, Some(actor));
        Ok(())
    }

    pub fn open_dispute(&self, order_id: OrderId, actor: AccountId, reason: &str) -> Result<(), EngineError> {
        let now = self.now();
        self.orders.with(order_id, |order| {
            if !order.is_party(actor) {
                return Err(EngineError::Unauthorized {
                    account: actor,
                    action: "dispute this order",
                });
            }
            order.check_transition(EscrowStatus::Dispute, "dispute")?;
            order.dispute_reason = Some(reason.to_string());
            order.disputed_by = Some(actor);
            order.transition(EscrowStatus::Dispute, now);
            Ok(())
        })?;
        info!(order = order_id.0, by = %actor, "p2p dispute opened");
        self.emit_escrow(order_id, Some(EscrowStatus::Paid), EscrowStatus::Dispute, Some(actor));
        Ok(())
    }

    /// Admin-only exit from DISPUTE.
    pub fn resolve_dispute(&self, order_id: OrderId, admin: AccountId, outcome: DisputeOutcome) -> Result<(), EngineError> {
        if !self.directory.is_admin(admin) {
            return Err(EngineError::Unauthorized {
                account: admin,
                action: "resolve disputes",
            });
        }
        let now = self.now();
        let (next, offer_id, amount) = self.orders.with(order_id, |order| {
            if order.status != EscrowStatus::Dispute {
                return Err(EngineError::conflict(order.label(), order.status, "resolve dispute"));
            }
            let next = match outcome {
                DisputeOutcome::ReleaseToBuyer => {
                    self.settle_release(order)?;
                    EscrowStatus::Released
                }
                DisputeOutcome::RefundSeller => {
                    self.settle_refund(order)?;
                    EscrowStatus::Cancelled
                }
            };
            order.transition(next, now);
            order.system_message(format!("dispute resolved by admin: {outcome:?}"), now);
            Ok((next, order.offer_id, order.amount))
        })?;
        if next == EscrowStatus::Cancelled {
            self.restore_offer(offer_id, amount)?;
        }
        info!(order = order_id.0, ?outcome, "p2p dispute resolved");
        self.emit_escrow(order_id, Some(EscrowStatus::Dispute), next, Some(admin));
        Ok(())
    }

    pub fn post_message(&self, order_id: OrderId, author: AccountId, body: &str) -> Result<(), EngineError> {
        let now = self.now();
        let limits = &self.config.p2p;
        self.orders.with(order_id, |order| {
            if !order.is_party(author) {
                return Err(EngineError::Unauthorized {
                    account: author,
                    action: "post in this order's chat",
                });
            }
            let body = body.trim();
            if body.is_empty() || body.chars().count() > limits.max_message_len {
                return Err(EngineError::validation(format!(
                    "message must be 1..={} characters",
                    limits.max_message_len
                )));
            }
            if order.messages.len() >= limits.max_messages_per_order {
                return Err(EngineError::validation("chat is full"));
            }
            order.messages.push(ChatMessage {
                author: ChatAuthor::User(author),
                body: body.to_string(),
                at: now,
            });
            Ok(())
        })
    }

    pub fn orders_for(&self, account: AccountId) -> Vec<P2pOrder> {
        self.orders.filter(|o| o.is_party(account))
    }

    pub fn active_offers(&self, asset: Asset) -> Vec<P2pOffer> {
        self.offers.filter(|o| o.active && o.asset == asset && o.remaining > Decimal::ZERO)
    }

    /// Cancels CREATED orders whose payment window has lapsed.
    pub(super) fn sweep_escrow_timeouts(&self) -> SweepReport {
        let now = self.now();
        let mut report = SweepReport::new(SweepJob::EscrowTimeouts, now);

        for order in self.orders.filter(|o| o.status == EscrowStatus::Created) {
            report.examined += 1;
            if !order.is_expired(now) {
                continue;
            }
            match self.expire_order(order.id, now) {
                Ok(true) => report.transitioned += 1,
                Ok(false) => {}
                Err(err) => report.skip(order.label(), err),
            }
        }
        report
    }

    fn expire_order(&self, order_id: OrderId, now: Timestamp) -> Result<bool, EngineError> {
        let expired = self.orders.with(order_id, |order| {
            // paid or cancelled since the scan
            if !order.is_expired(now) {
                return Ok(None);
            }
            self.settle_refund(order)?;
            order.transition(EscrowStatus::Cancelled, now);
            order.system_message("payment window expired", now);
            Ok(Some((order.offer_id, order.amount)))
        })?;

        let Some((offer_id, amount)) = expired else {
            return Ok(false);
        };
        self.restore_offer(offer_id, amount)?;
        info!(order = order_id.0, "p2p order timed out");
        self.emit_escrow(order_id, Some(EscrowStatus::Created), EscrowStatus::Cancelled, None);
        Ok(true)
    }

    // hold → buyer (net) and fee sink (fee), one journal
    fn settle_release(&self, order: &P2pOrder) -> Result<(), EngineError> {
        let hold = HoldId::from(order.id);
        let mut journal = Journal::new(TxKind::EscrowRelease, order.reference());
        if order.net_amount() > Decimal::ZERO {
            journal = journal.release_hold(order.seller, hold, order.buyer, order.asset, order.net_amount());
        }
        if order.fee > Decimal::ZERO {
            journal = journal.release_hold(order.seller, hold, SystemAccount::FeeSink.id(), order.asset, order.fee);
        }
        self.ledger.commit(journal)?;
        Ok(())
    }

    fn settle_refund(&self, order: &P2pOrder) -> Result<(), EngineError> {
        self.ledger.refund_hold(
            order.seller,
            HoldId::from(order.id),
            order.asset,
            order.amount,
            order.reference(),
        )?;
        Ok(())
    }

    fn restore_offer(&self, offer_id: OfferId, amount: Decimal) -> Result<(), EngineError> {
        self.offers.with(offer_id, |offer| {
            offer.remaining += amount;
            Ok(())
        })
    }

    fn emit_escrow(&self, order_id: OrderId, from: Option<EscrowStatus>, to: EscrowStatus, actor: Option<AccountId>) {
        self.emit(EventPayload::EscrowTransition(EscrowTransitionEvent {
            order_id,
            from,
            to,
            actor,
        }));
    }
}

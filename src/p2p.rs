// 4.0 p2p.rs: peer-to-peer trading with an escrow hold.
// the asset sits in a hold on the seller's account (owned, not spendable) while fiat moves
// off-ledger. only a release moves it to the buyer; only a cancel gives it back.
//
//   CREATED --buyer pays--> PAID --seller releases--> RELEASED
//   CREATED | PAID --buyer cancels / payment window lapses--> CANCELLED
//   PAID --either party disputes--> DISPUTE --admin--> RELEASED | CANCELLED

use crate::engine::EngineError;
use crate::types::{AccountId, Asset, OfferId, OrderId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// 4.1: which way the maker trades the asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferSide {
    /// Maker sells the asset for fiat.
    Sell,
    /// Maker buys the asset with fiat.
    Buy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pOffer {
    pub id: OfferId,
    pub maker: AccountId,
    pub side: OfferSide,
    pub asset: Asset,
    pub fiat_currency: String,
    // fiat per unit of asset
    pub price: Decimal,
    pub remaining: Decimal,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub active: bool,
    pub created_at: Timestamp,
}

impl P2pOffer {
    /// Checks an order size against the offer's limits and what is left.
    pub fn check_amount(&self, amount: Decimal) -> Result<(), EngineError> {
        if !self.active {
            return Err(EngineError::conflict_in(format!("offer {}", self.id.0), "inactive", "take"));
        }
        if amount < self.min_amount || amount > self.max_amount {
            return Err(EngineError::validation(format!(
                "amount {amount} outside offer limits {}..{}",
                self.min_amount, self.max_amount
            )));
        }
        if amount > self.remaining {
            return Err(EngineError::validation(format!(
                "amount {amount} exceeds remaining {}",
                self.remaining
            )));
        }
        Ok(())
    }

    /// (buyer, seller) when `taker` takes this offer.
    pub fn parties(&self, taker: AccountId) -> (AccountId, AccountId) {
        match self.side {
            OfferSide::Sell => (taker, self.maker),
            OfferSide::Buy => (self.maker, taker),
        }
    }
}

// 4.2: order type from the taker's view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EscrowStatus {
    Created,
    Paid,
    Released,
    Cancelled,
    Dispute,
}

impl EscrowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: EscrowStatus) -> bool {
        use EscrowStatus::*;
        matches!(
            (self, next),
            (Created, Paid)
                | (Created, Cancelled)
                | (Paid, Released)
                | (Paid, Cancelled)
                | (Paid, Dispute)
                | (Dispute, Released)
                | (Dispute, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatAuthor {
    User(AccountId),
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author: ChatAuthor,
    pub body: String,
    pub at: Timestamp,
}

/// How an admin settles a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeOutcome {
    ReleaseToBuyer,
    RefundSeller,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pOrder {
    pub id: OrderId,
    pub offer_id: OfferId,
    pub order_type: OrderType,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub asset: Asset,
    pub amount: Decimal,
    pub fiat_amount: Decimal,
    pub fiat_currency: String,
    // taken out of the escrowed amount on release
    pub fee: Decimal,
    pub status: EscrowStatus,
    pub messages: Vec<ChatMessage>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub paid_at: Option<Timestamp>,
    pub closed_at: Option<Timestamp>,
    pub dispute_reason: Option<String>,
    pub disputed_by: Option<AccountId>,
}

impl P2pOrder {
    pub fn is_party(&self, account: AccountId) -> bool {
        account == self.buyer || account == self.seller
    }

    pub fn label(&self) -> String {
        format!("p2p order {}", self.id.0)
    }

    pub fn reference(&self) -> String {
        format!("p2p:{}", self.id.0)
    }

    /// Amount the buyer receives on release.
    pub fn net_amount(&self) -> Decimal {
        self.amount - self.fee
    }

    /// Unpaid past the payment window.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.status == EscrowStatus::Created && now > self.expires_at
    }

    /// Fails with `StateConflict` unless `next` is reachable from the current status.
    pub fn check_transition(&self, next: EscrowStatus, action: &'static str) -> Result<(), EngineError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(EngineError::conflict(self.label(), self.status, action))
        }
    }

    /// Applies an already-checked transition and notes it in the chat.
    pub fn transition(&mut self, next: EscrowStatus, now: Timestamp) -> EscrowStatus {
        let previous = self.status;
        self.status = next;
        match next {
            EscrowStatus::Paid => self.paid_at = Some(now),
            EscrowStatus::Released | EscrowStatus::Cancelled => self.closed_at = Some(now),
            EscrowStatus::Created | EscrowStatus::Dispute => {}
        }
        self.system_message(format!("status changed from {previous:?} to {next:?}"), now);
        previous
    }

    pub fn system_message(&mut self, body: impl Into<String>, at: Timestamp) {
        self.messages.push(ChatMessage {
            author: ChatAuthor::System,
            body: body.into(),
            at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(status: EscrowStatus) -> P2pOrder {
        P2pOrder {
            id: OrderId(7),
            offer_id: OfferId(1),
            order_type: OrderType::Buy,
            buyer: AccountId(2),
            seller: AccountId(1),
            asset: Asset::Btc,
            amount: dec!(0.01),
            fiat_amount: dec!(500),
            fiat_currency: "EUR".to_string(),
            fee: dec!(0.00001),
            status,
            messages: Vec::new(),
            created_at: Timestamp::from_millis(0),
            expires_at: Timestamp::from_millis(900_000),
            paid_at: None,
            closed_at: None,
            dispute_reason: None,
            disputed_by: None,
        }
    }

    #[test]
    fn allowed_transitions() {
        use EscrowStatus::*;
        assert!(Created.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Dispute));
        assert!(Dispute.can_transition_to(Cancelled));
        assert!(!Created.can_transition_to(Released));
        assert!(!Created.can_transition_to(Dispute));
        assert!(!Released.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Paid));
    }

    #[test]
    fn transition_records_time_and_chat() {
        let mut order = order(EscrowStatus::Created);
        order.check_transition(EscrowStatus::Paid, "mark paid").unwrap();
        let previous = order.transition(EscrowStatus::Paid, Timestamp::from_millis(10));
        assert_eq!(previous, EscrowStatus::Created);
        assert_eq!(order.paid_at, Some(Timestamp::from_millis(10)));
        assert_eq!(order.messages.len(), 1);
        assert_eq!(order.messages[0].author, ChatAuthor::System);
    }

    #[test]
    fn invalid_transition_is_conflict() {
        let order = order(EscrowStatus::Released);
        assert!(matches!(
            order.check_transition(EscrowStatus::Cancelled, "cancel"),
            Err(EngineError::StateConflict { .. })
        ));
    }

    #[test]
    fn expiry_only_applies_to_unpaid() {
        assert!(order(EscrowStatus::Created).is_expired(Timestamp::from_millis(900_001)));
        assert!(!order(EscrowStatus::Created).is_expired(Timestamp::from_millis(900_000)));
        assert!(!order(EscrowStatus::Paid).is_expired(Timestamp::from_millis(900_001)));
    }

    #[test]
    fn offer_limits_and_parties() {
        let offer = P2pOffer {
            id: OfferId(1),
            maker: AccountId(1),
            side: OfferSide::Sell,
            asset: Asset::Btc,
            fiat_currency: "USD".to_string(),
            price: dec!(50000),
            remaining: dec!(0.05),
            min_amount: dec!(0.001),
            max_amount: dec!(0.02),
            active: true,
            created_at: Timestamp::from_millis(0),
        };
        assert!(offer.check_amount(dec!(0.01)).is_ok());
        assert!(offer.check_amount(dec!(0.0001)).is_err());
        assert!(offer.check_amount(dec!(0.03)).is_err());
        assert_eq!(offer.parties(AccountId(2)), (AccountId(2), AccountId(1)));

        let buy = P2pOffer {
            side: OfferSide::Buy,
            ..offer
        };
        assert_eq!(buy.parties(AccountId(2)), (AccountId(1), AccountId(2)));
    }
}

// 5.0: derivatives. leveraged futures and binary options, both settled against the oracle.

mod binary;
mod futures;
mod liquidation;

pub use binary::{outcome, BinaryPosition, BinaryStatus, OptionDirection, TiePolicy};
pub use futures::{position_amount, position_pnl, FuturePosition, Triggers};
pub use liquidation::{
    calculate_liquidation_price, evaluate_liquidation, is_liquidatable, settle_close, CloseSettlement,
    LiquidationStatus,
};

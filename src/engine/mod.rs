// 8.0: the settlement engines. one Platform owns the ledger and every entity table;
// each file below adds one product's operations to it. time-driven transitions run
// through the scheduler's sweeps, never from a caller.

mod binary;
mod copy_trading;
mod core;
mod futures;
mod p2p;
mod results;
mod staking;
mod swap;

pub use binary::BinaryOrder;
pub use core::Platform;
pub use futures::FutureOrder;
pub use p2p::OfferTerms;
pub use results::{EngineError, StakePayout, SwapResult, SweepReport};

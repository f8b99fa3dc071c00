// settle-core: multi-asset ledger and settlement engine.
// balance-first architecture: every product settles through one double-entry ledger.
// all computation is in-memory; time and prices come in through injected traits.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: AccountId, Asset, Symbol, Price, Leverage, Bps, Timestamp
//   1.x  clock.rs, directory.rs: injected time and account existence
//   2.x  ledger/: accounts, journals, transaction log, audit
//   3.x  swap.rs: quotes and conversion maths
//   4.x  p2p.rs: offers, escrowed orders, disputes, chat
//   5.x  derivatives/: futures, liquidation maths, binary options
//   6.x  copy_trading.rs: follower allocations and mirror sizing
//   7.x  config.rs: fees, limits, plans, intervals, env presets
//   8.x  engine/: the Platform and each product's operations
//   9.x  oracle.rs: price sources
//   10.x staking.rs: plans, positions, reward accrual
//   11.x events.rs: state transition events for audit
//   12.x scheduler.rs, store.rs: periodic sweeps and entity tables

// ledger and primitives
pub mod clock;
pub mod directory;
pub mod ledger;
pub mod oracle;
pub mod store;
pub mod types;

// products
pub mod copy_trading;
pub mod derivatives;
pub mod p2p;
pub mod staking;
pub mod swap;

// engine and plumbing
pub mod config;
pub mod engine;
pub mod events;
pub mod scheduler;

// re exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, Environment, PlatformConfig};
pub use directory::{AccountDirectory, InMemoryDirectory};
pub use engine::*;
pub use events::*;
pub use ledger::{Ledger, LedgerError, SystemAccount, Tier, Transaction, TxKind};
pub use oracle::{InMemoryOracle, MedianOracle, OracleError, PriceOracle, PriceQuote};
pub use types::*;

//! Wave-based signal replay engine for futures backtesting.
//!
//! Replays scored BUY/SELL signals against 5-minute candle histories under an
//! isolated-margin accounting model: signals are grouped into 15-minute
//! waves, admitted in score order against a capital ledger, and each admitted
//! position is simulated through a three-phase timeline (active risk
//! management, breakeven window, smart-loss decay) to a projected close.
//!
//! The crate is pure and deterministic: identical inputs produce a
//! byte-identical trade ledger. External concerns (candles, signals,
//! parameter history, persistence) enter through the traits in [`session`].

pub mod accounting;
pub mod candle;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod outcome;
pub mod params;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod signal;
pub mod simulator;
pub mod sweep;

pub use candle::{Candle, CandleData};
pub use error::{ConfigError, DataSourceError, SessionError};
pub use ledger::CapitalLedger;
pub use outcome::{CloseReason, TradeOutcome};
pub use params::{ParamsCandidate, SessionConfig, StrategyParams};
pub use report::SessionSummary;
pub use session::{run_session, CancelToken, RunRequest};
pub use signal::{Direction, Signal, SignalFilter, SkipCounts, SkipReason};

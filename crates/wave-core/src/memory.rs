//! In-memory collaborators, used by tests, the parameter sweep, and the CLI
//! (which loads SQLite data up front and replays from memory).

use std::collections::BTreeMap;

use crate::candle::{Candle, CandleData};
use crate::error::DataSourceError;
use crate::outcome::TradeOutcome;
use crate::params::ParamsCandidate;
use crate::report::SessionSummary;
use crate::session::{CandleSource, ParamsSource, ResultSink, SignalSource};
use crate::signal::Signal;

/// Candle histories held in memory, keyed by trading-pair id.
#[derive(Debug, Clone, Default)]
pub struct MemoryCandleSource {
    data: CandleData,
}

impl MemoryCandleSource {
    pub fn new(data: CandleData) -> Self {
        Self { data }
    }

    pub fn insert(&mut self, trading_pair_id: i64, bars: Vec<Candle>) {
        self.data.insert(trading_pair_id, bars);
    }
}

impl CandleSource for MemoryCandleSource {
    fn candles(
        &self,
        trading_pair_id: i64,
        _timeframe_min: u32,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<Candle>, DataSourceError> {
        Ok(self
            .data
            .get(&trading_pair_id)
            .map(|bars| {
                bars.iter()
                    .filter(|c| c.ts >= from_ts && c.ts <= to_ts)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// A fixed signal list, filtered by window on request.
#[derive(Debug, Clone, Default)]
pub struct MemorySignalSource {
    signals: Vec<Signal>,
}

impl MemorySignalSource {
    pub fn new(signals: Vec<Signal>) -> Self {
        Self { signals }
    }
}

impl SignalSource for MemorySignalSource {
    fn signals(&self, from_ts: i64, to_ts: i64) -> Result<Vec<Signal>, DataSourceError> {
        Ok(self
            .signals
            .iter()
            .filter(|s| s.ts >= from_ts && s.ts <= to_ts)
            .cloned()
            .collect())
    }
}

/// A fixed candidate list. Empty by default, which makes the session fall
/// back to its base parameters for every exchange.
#[derive(Debug, Clone, Default)]
pub struct MemoryParamsSource {
    candidates: Vec<ParamsCandidate>,
}

impl MemoryParamsSource {
    pub fn new(candidates: Vec<ParamsCandidate>) -> Self {
        Self { candidates }
    }
}

impl ParamsSource for MemoryParamsSource {
    fn candidates(&self) -> Result<Vec<ParamsCandidate>, DataSourceError> {
        Ok(self.candidates.clone())
    }
}

/// Stored summary row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSummary {
    pub user_id: i64,
    pub params_fingerprint: String,
    pub summary: SessionSummary,
}

/// Collects trades and summaries per session id. Re-running a session id
/// replaces its previous rows, mirroring the SQLite sink's idempotency.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    trades: BTreeMap<String, Vec<TradeOutcome>>,
    summaries: BTreeMap<String, StoredSummary>,
    current_session: Option<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self, session_id: &str) -> &[TradeOutcome] {
        self.trades.get(session_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn summary(&self, session_id: &str) -> Option<&StoredSummary> {
        self.summaries.get(session_id)
    }
}

impl ResultSink for MemorySink {
    fn append_trade(
        &mut self,
        session_id: &str,
        outcome: &TradeOutcome,
    ) -> Result<(), DataSourceError> {
        if self.current_session.as_deref() != Some(session_id) {
            // First row of a (re-)run: drop whatever an earlier run stored.
            self.trades.remove(session_id);
            self.current_session = Some(session_id.to_string());
        }
        self.trades
            .entry(session_id.to_string())
            .or_default()
            .push(outcome.clone());
        Ok(())
    }

    fn write_summary(
        &mut self,
        session_id: &str,
        user_id: i64,
        params_fingerprint: &str,
        summary: &SessionSummary,
    ) -> Result<(), DataSourceError> {
        if self.current_session.as_deref() != Some(session_id) {
            // Summary for a session with no trades: still a fresh run.
            self.trades.remove(session_id);
        }
        self.current_session = None;
        self.summaries.insert(
            session_id.to_string(),
            StoredSummary {
                user_id,
                params_fingerprint: params_fingerprint.to_string(),
                summary: summary.clone(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::CloseReason;
    use crate::signal::Direction;

    fn outcome(signal_id: i64) -> TradeOutcome {
        TradeOutcome {
            signal_id,
            pair_symbol: "BTCUSDT".to_string(),
            trading_pair_id: 100,
            exchange_id: 1,
            direction: Direction::Long,
            entry_time: 0,
            entry_price: 100.0,
            entry_commission: 0.6,
            close_time: 1,
            close_price: 104.0,
            close_reason: CloseReason::TakeProfit,
            gross_pnl: 40.0,
            exit_commission: 0.6,
            net_pnl: 38.8,
            margin: 100.0,
            leverage: 10,
            peak_favorable_price: 104.0,
            max_potential_net_pnl: 38.8,
        }
    }

    #[test]
    fn rerunning_a_session_replaces_its_trades() {
        let mut sink = MemorySink::new();
        sink.append_trade("s1", &outcome(1)).unwrap();
        sink.append_trade("s1", &outcome(2)).unwrap();
        assert_eq!(sink.trades("s1").len(), 2);

        // New run of the same session id.
        let ledger = crate::ledger::CapitalLedger::new(1_000.0);
        let summary =
            crate::report::build_summary(&ledger, &[], crate::signal::SkipCounts::default());
        sink.write_summary("s1", 7, "fp", &summary).unwrap();

        sink.append_trade("s1", &outcome(3)).unwrap();
        assert_eq!(sink.trades("s1").len(), 1);
        assert_eq!(sink.trades("s1")[0].signal_id, 3);
        assert_eq!(sink.summary("s1").unwrap().user_id, 7);
    }

    #[test]
    fn candle_source_clips_to_the_window() {
        let mut source = MemoryCandleSource::default();
        source.insert(
            100,
            vec![
                Candle {
                    ts: 0,
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    mark_price: None,
                    volume: None,
                    open_interest: None,
                },
                Candle {
                    ts: 600_000,
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    mark_price: None,
                    volume: None,
                    open_interest: None,
                },
            ],
        );
        let bars = source.candles(100, 5, 0, 300_000).unwrap();
        assert_eq!(bars.len(), 1);
        assert!(source.candles(999, 5, 0, 300_000).unwrap().is_empty());
    }
}

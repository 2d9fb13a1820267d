//! SQLite persistence: read-only sources over a candle/signal database and a
//! result sink that replaces a session's rows when it is re-run.

use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;

use wave_core::candle::{Candle, CandleData};
use wave_core::error::DataSourceError;
use wave_core::outcome::{CloseReason, TradeOutcome};
use wave_core::params::ParamsCandidate;
use wave_core::report::SessionSummary;
use wave_core::session::{CandleSource, ParamsSource, ResultSink, SignalSource};
use wave_core::signal::{Direction, Signal};

/// Errors returned by store operations outside the core traits.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Json(serde_json::Error),
    MalformedCandle { trading_pair_id: i64, index: usize },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "sqlite: {e}"),
            StoreError::Json(e) => write!(f, "json: {e}"),
            StoreError::MalformedCandle {
                trading_pair_id,
                index,
            } => write!(
                f,
                "malformed candle for pair {trading_pair_id} at index {index}"
            ),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Json(e)
    }
}

/// Create every table the store uses. Idempotent.
pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS candles (
             trading_pair_id INTEGER NOT NULL,
             timeframe_min   INTEGER NOT NULL,
             ts              INTEGER NOT NULL,
             open            REAL    NOT NULL,
             high            REAL    NOT NULL,
             low             REAL    NOT NULL,
             close           REAL    NOT NULL,
             mark_price      REAL,
             volume          REAL,
             open_interest   REAL,
             PRIMARY KEY (trading_pair_id, timeframe_min, ts)
         );
         CREATE TABLE IF NOT EXISTS signals (
             signal_id        INTEGER PRIMARY KEY,
             pair_symbol      TEXT    NOT NULL,
             trading_pair_id  INTEGER NOT NULL,
             exchange_id      INTEGER NOT NULL,
             action           TEXT    NOT NULL,
             ts               INTEGER NOT NULL,
             score_week       REAL    NOT NULL,
             score_month      REAL    NOT NULL,
             volume_24h_usd   REAL,
             open_interest_usd REAL
         );
         CREATE TABLE IF NOT EXISTS params_history (
             exchange_id   INTEGER NOT NULL,
             params_json   TEXT    NOT NULL,
             total_pnl_usd REAL    NOT NULL,
             win_rate      REAL    NOT NULL
         );
         CREATE TABLE IF NOT EXISTS trade_results (
             session_id            TEXT    NOT NULL,
             signal_id             INTEGER NOT NULL,
             pair_symbol           TEXT    NOT NULL,
             trading_pair_id       INTEGER NOT NULL,
             exchange_id           INTEGER NOT NULL,
             direction             TEXT    NOT NULL,
             entry_time            INTEGER NOT NULL,
             entry_price           REAL    NOT NULL,
             entry_commission      REAL    NOT NULL,
             close_time            INTEGER NOT NULL,
             close_price           REAL    NOT NULL,
             close_reason          TEXT    NOT NULL,
             gross_pnl             REAL    NOT NULL,
             exit_commission       REAL    NOT NULL,
             net_pnl               REAL    NOT NULL,
             margin                REAL    NOT NULL,
             leverage              INTEGER NOT NULL,
             peak_favorable_price  REAL    NOT NULL,
             max_potential_net_pnl REAL    NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_trade_results_session
             ON trade_results (session_id);
         CREATE TABLE IF NOT EXISTS session_summaries (
             session_id         TEXT PRIMARY KEY,
             user_id            INTEGER NOT NULL,
             params_fingerprint TEXT    NOT NULL,
             summary_json       TEXT    NOT NULL
         );",
    )?;
    Ok(())
}

fn parse_direction(raw: &str) -> Result<Direction, String> {
    match raw {
        "BUY" | "LONG" => Ok(Direction::Long),
        "SELL" | "SHORT" => Ok(Direction::Short),
        other => Err(format!("unknown signal action: {other}")),
    }
}

fn parse_close_reason(raw: &str) -> Result<CloseReason, String> {
    match raw {
        "take_profit" => Ok(CloseReason::TakeProfit),
        "stop_loss" => Ok(CloseReason::StopLoss),
        "trailing_stop" => Ok(CloseReason::TrailingStop),
        "liquidation" => Ok(CloseReason::Liquidation),
        "breakeven" => Ok(CloseReason::Breakeven),
        "smart_loss" => Ok(CloseReason::SmartLoss),
        "forced_period_end" => Ok(CloseReason::ForcedPeriodEnd),
        "forced_liquidation" => Ok(CloseReason::ForcedLiquidation),
        other => Err(format!("unknown close reason: {other}")),
    }
}

fn conversion_failure(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn source_error(source_name: &'static str, e: impl std::fmt::Display) -> DataSourceError {
    DataSourceError::new(source_name, e.to_string())
}

/// Read-only view over the candle/signal/params database, implementing the
/// core source traits.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open an existing database read-only.
    pub fn open_read_only(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }

    /// Open (or create) a database read-write and ensure the schema exists.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn insert_candle(
        &self,
        trading_pair_id: i64,
        timeframe_min: u32,
        candle: &Candle,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO candles
                 (trading_pair_id, timeframe_min, ts, open, high, low, close,
                  mark_price, volume, open_interest)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                trading_pair_id,
                timeframe_min,
                candle.ts,
                candle.open,
                candle.high,
                candle.low,
                candle.close,
                candle.mark_price,
                candle.volume,
                candle.open_interest,
            ],
        )?;
        Ok(())
    }

    pub fn insert_signal(&self, signal: &Signal) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO signals
                 (signal_id, pair_symbol, trading_pair_id, exchange_id, action,
                  ts, score_week, score_month, volume_24h_usd, open_interest_usd)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                signal.signal_id,
                signal.pair_symbol,
                signal.trading_pair_id,
                signal.exchange_id,
                signal.action.to_string(),
                signal.ts,
                signal.score_week,
                signal.score_month,
                signal.volume_24h_usd,
                signal.open_interest_usd,
            ],
        )?;
        Ok(())
    }

    pub fn insert_params_candidate(&self, candidate: &ParamsCandidate) -> Result<(), StoreError> {
        let json = serde_json::to_string(&candidate.params)?;
        self.conn.execute(
            "INSERT INTO params_history (exchange_id, params_json, total_pnl_usd, win_rate)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                candidate.exchange_id,
                json,
                candidate.total_pnl_usd,
                candidate.win_rate,
            ],
        )?;
        Ok(())
    }

    /// Trade rows stored for one session, in insertion order.
    pub fn load_trades(&self, session_id: &str) -> Result<Vec<TradeOutcome>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT signal_id, pair_symbol, trading_pair_id, exchange_id, direction,
                    entry_time, entry_price, entry_commission, close_time, close_price,
                    close_reason, gross_pnl, exit_commission, net_pnl, margin, leverage,
                    peak_favorable_price, max_potential_net_pnl
             FROM trade_results WHERE session_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map([session_id], |row| {
            let direction: String = row.get(4)?;
            let reason: String = row.get(10)?;
            Ok(TradeOutcome {
                signal_id: row.get(0)?,
                pair_symbol: row.get(1)?,
                trading_pair_id: row.get(2)?,
                exchange_id: row.get(3)?,
                direction: parse_direction(&direction)
                    .map_err(|e| conversion_failure(4, e))?,
                entry_time: row.get(5)?,
                entry_price: row.get(6)?,
                entry_commission: row.get(7)?,
                close_time: row.get(8)?,
                close_price: row.get(9)?,
                close_reason: parse_close_reason(&reason)
                    .map_err(|e| conversion_failure(10, e))?,
                gross_pnl: row.get(11)?,
                exit_commission: row.get(12)?,
                net_pnl: row.get(13)?,
                margin: row.get(14)?,
                leverage: row.get(15)?,
                peak_favorable_price: row.get(16)?,
                max_potential_net_pnl: row.get(17)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Stored summary for one session.
    pub fn load_summary(
        &self,
        session_id: &str,
    ) -> Result<Option<(i64, String, SessionSummary)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, params_fingerprint, summary_json
             FROM session_summaries WHERE session_id = ?1",
        )?;
        let row = stmt.query_row([session_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        });
        match row {
            Ok((user_id, fingerprint, json)) => {
                let summary: SessionSummary = serde_json::from_str(&json)?;
                Ok(Some((user_id, fingerprint, summary)))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }
}

impl CandleSource for SqliteStore {
    fn candles(
        &self,
        trading_pair_id: i64,
        timeframe_min: u32,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<Candle>, DataSourceError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ts, open, high, low, close, mark_price, volume, open_interest
                 FROM candles
                 WHERE trading_pair_id = ?1 AND timeframe_min = ?2
                   AND ts >= ?3 AND ts <= ?4
                 ORDER BY ts ASC",
            )
            .map_err(|e| source_error("candle store", e))?;
        let rows = stmt
            .query_map(
                params![trading_pair_id, timeframe_min, from_ts, to_ts],
                |row| {
                    Ok(Candle {
                        ts: row.get(0)?,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        mark_price: row.get(5)?,
                        volume: row.get(6)?,
                        open_interest: row.get(7)?,
                    })
                },
            )
            .map_err(|e| source_error("candle store", e))?;
        let bars = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| source_error("candle store", e))?;
        if let Some(index) = wave_core::candle::first_malformed(&bars) {
            return Err(source_error(
                "candle store",
                format!("malformed candle for pair {trading_pair_id} at index {index}"),
            ));
        }
        Ok(bars)
    }
}

impl SignalSource for SqliteStore {
    fn signals(&self, from_ts: i64, to_ts: i64) -> Result<Vec<Signal>, DataSourceError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT signal_id, pair_symbol, trading_pair_id, exchange_id, action,
                        ts, score_week, score_month, volume_24h_usd, open_interest_usd
                 FROM signals
                 WHERE ts >= ?1 AND ts <= ?2
                 ORDER BY ts ASC, signal_id ASC",
            )
            .map_err(|e| source_error("signal source", e))?;
        let rows = stmt
            .query_map(params![from_ts, to_ts], |row| {
                let action: String = row.get(4)?;
                Ok(Signal {
                    signal_id: row.get(0)?,
                    pair_symbol: row.get(1)?,
                    trading_pair_id: row.get(2)?,
                    exchange_id: row.get(3)?,
                    action: parse_direction(&action).map_err(|e| conversion_failure(4, e))?,
                    ts: row.get(5)?,
                    score_week: row.get(6)?,
                    score_month: row.get(7)?,
                    volume_24h_usd: row.get(8)?,
                    open_interest_usd: row.get(9)?,
                })
            })
            .map_err(|e| source_error("signal source", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| source_error("signal source", e))
    }
}

impl ParamsSource for SqliteStore {
    fn candidates(&self) -> Result<Vec<ParamsCandidate>, DataSourceError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT exchange_id, params_json, total_pnl_usd, win_rate
                 FROM params_history ORDER BY rowid ASC",
            )
            .map_err(|e| source_error("params source", e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })
            .map_err(|e| source_error("params source", e))?;

        let mut candidates = Vec::new();
        for row in rows {
            let (exchange_id, json, total_pnl_usd, win_rate) =
                row.map_err(|e| source_error("params source", e))?;
            let params =
                serde_json::from_str(&json).map_err(|e| source_error("params source", e))?;
            candidates.push(ParamsCandidate {
                exchange_id,
                params,
                total_pnl_usd,
                win_rate,
            });
        }
        Ok(candidates)
    }
}

/// Load every candle history for one timeframe, grouped by trading pair and
/// ascending in `ts`. Used by the CLI to build in-memory sources up front.
pub fn load_candles(db_path: &Path, timeframe_min: u32) -> Result<CandleData, StoreError> {
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare(
        "SELECT trading_pair_id, ts, open, high, low, close, mark_price, volume, open_interest
         FROM candles WHERE timeframe_min = ?1
         ORDER BY trading_pair_id ASC, ts ASC",
    )?;

    let mut data = CandleData::default();
    let mut total_bars: u64 = 0;
    let mut current_pair: i64 = i64::MIN;
    let mut current_vec: Vec<Candle> = Vec::new();

    let rows = stmt.query_map([timeframe_min], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            Candle {
                ts: row.get(1)?,
                open: row.get(2)?,
                high: row.get(3)?,
                low: row.get(4)?,
                close: row.get(5)?,
                mark_price: row.get(6)?,
                volume: row.get(7)?,
                open_interest: row.get(8)?,
            },
        ))
    })?;

    for row in rows {
        let (pair_id, candle) = row?;
        total_bars += 1;
        if pair_id != current_pair {
            if current_pair != i64::MIN {
                data.insert(current_pair, std::mem::take(&mut current_vec));
            }
            current_pair = pair_id;
            current_vec = Vec::with_capacity(512);
        }
        current_vec.push(candle);
    }
    if current_pair != i64::MIN {
        data.insert(current_pair, current_vec);
    }

    for (pair_id, bars) in &data {
        if let Some(index) = wave_core::candle::first_malformed(bars) {
            return Err(StoreError::MalformedCandle {
                trading_pair_id: *pair_id,
                index,
            });
        }
    }

    eprintln!(
        "[wave-data] loaded {} pairs, {} bars ({}m timeframe) from {:?}",
        data.len(),
        total_bars,
        timeframe_min,
        db_path,
    );
    Ok(data)
}

/// Result sink writing trade rows and the session summary. Re-running a
/// session id deletes the previous rows first, so both operations are
/// idempotent on `session_id`.
pub struct SqliteResultSink {
    conn: Connection,
    current_session: Option<String>,
}

impl SqliteResultSink {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn,
            current_session: None,
        })
    }

    fn begin_session(&mut self, session_id: &str) -> Result<(), rusqlite::Error> {
        if self.current_session.as_deref() != Some(session_id) {
            self.conn.execute(
                "DELETE FROM trade_results WHERE session_id = ?1",
                [session_id],
            )?;
            self.current_session = Some(session_id.to_string());
        }
        Ok(())
    }
}

impl ResultSink for SqliteResultSink {
    fn append_trade(
        &mut self,
        session_id: &str,
        outcome: &TradeOutcome,
    ) -> Result<(), DataSourceError> {
        self.begin_session(session_id)
            .map_err(|e| source_error("result sink", e))?;
        self.conn
            .execute(
                "INSERT INTO trade_results
                     (session_id, signal_id, pair_symbol, trading_pair_id, exchange_id,
                      direction, entry_time, entry_price, entry_commission, close_time,
                      close_price, close_reason, gross_pnl, exit_commission, net_pnl,
                      margin, leverage, peak_favorable_price, max_potential_net_pnl)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                         ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                params![
                    session_id,
                    outcome.signal_id,
                    outcome.pair_symbol,
                    outcome.trading_pair_id,
                    outcome.exchange_id,
                    outcome.direction.to_string(),
                    outcome.entry_time,
                    outcome.entry_price,
                    outcome.entry_commission,
                    outcome.close_time,
                    outcome.close_price,
                    outcome.close_reason.to_string(),
                    outcome.gross_pnl,
                    outcome.exit_commission,
                    outcome.net_pnl,
                    outcome.margin,
                    outcome.leverage,
                    outcome.peak_favorable_price,
                    outcome.max_potential_net_pnl,
                ],
            )
            .map_err(|e| source_error("result sink", e))?;
        Ok(())
    }

    fn write_summary(
        &mut self,
        session_id: &str,
        user_id: i64,
        params_fingerprint: &str,
        summary: &SessionSummary,
    ) -> Result<(), DataSourceError> {
        self.begin_session(session_id)
            .map_err(|e| source_error("result sink", e))?;
        self.current_session = None;
        let json = serde_json::to_string(&summary.rounded())
            .map_err(|e| source_error("result sink", e))?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO session_summaries
                     (session_id, user_id, params_fingerprint, summary_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, user_id, params_fingerprint, json],
            )
            .map_err(|e| source_error("result sink", e))?;
        Ok(())
    }
}

//! In-memory stores and scripted providers for engine tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use finsync_market_data::{
    AssetKind, DataType, DiscoveredSymbol, DiscoverySource, DividendEvent, FetchError,
    FetchRequest, PriceBar, ProviderCapabilities, ProviderClient, RateLimit, Record,
    TransportKind,
};
use rust_decimal_macros::dec;

use super::cursor::{AttemptOutcome, CursorStore, DataTypeCursor, SyncCandidate};
use super::exclusion::{ExclusionRecord, ExclusionStore};
use super::writer::RecordStore;
use crate::errors::{DatabaseError, Error, Result};
use crate::symbols::{AdmissionState, NewSymbol, Symbol, SymbolStore};

#[derive(Default)]
struct State {
    symbols: BTreeMap<String, Symbol>,
    cursors: BTreeMap<(String, DataType), DataTypeCursor>,
    exclusions: BTreeMap<String, ExclusionRecord>,
    records: BTreeMap<String, Record>,
    upsert_calls: usize,
    failing_upserts: usize,
}

/// One shared in-memory backend implementing every store trait.
#[derive(Clone, Default)]
pub(crate) struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_symbol(&self, symbol: &str, kind: AssetKind, state: AdmissionState) {
        let now = Utc::now();
        self.state.lock().unwrap().symbols.insert(
            symbol.to_string(),
            Symbol {
                symbol: symbol.to_string(),
                name: None,
                exchange: None,
                asset_kind: kind,
                discovery_source: None,
                state,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub fn seed_cursor(&self, symbol: &str, data_type: DataType, synced_at: DateTime<Utc>) {
        let mut cursor = DataTypeCursor::new(symbol, data_type);
        cursor.apply_advance(synced_at, synced_at);
        self.state
            .lock()
            .unwrap()
            .cursors
            .insert((symbol.to_string(), data_type), cursor);
    }

    pub fn symbol_state(&self, symbol: &str) -> Option<AdmissionState> {
        self.state.lock().unwrap().symbols.get(symbol).map(|s| s.state)
    }

    pub fn exclusion(&self, symbol: &str) -> Option<ExclusionRecord> {
        self.state.lock().unwrap().exclusions.get(symbol).cloned()
    }

    pub fn cursor(&self, symbol: &str, data_type: DataType) -> Option<DataTypeCursor> {
        self.state
            .lock()
            .unwrap()
            .cursors
            .get(&(symbol.to_string(), data_type))
            .cloned()
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn records_for(&self, symbol: &str, data_type: DataType) -> Vec<Record> {
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .filter(|r| r.symbol() == symbol && r.data_type() == data_type)
            .cloned()
            .collect()
    }

    pub fn upsert_calls(&self) -> usize {
        self.state.lock().unwrap().upsert_calls
    }

    /// The next `n` upserts fail without writing anything.
    pub fn fail_next_upserts(&self, n: usize) {
        self.state.lock().unwrap().failing_upserts = n;
    }

    fn cursor_entry<'a>(state: &'a mut State, symbol: &str, data_type: DataType) -> &'a mut DataTypeCursor {
        state
            .cursors
            .entry((symbol.to_string(), data_type))
            .or_insert_with(|| DataTypeCursor::new(symbol, data_type))
    }
}

#[async_trait]
impl SymbolStore for InMemoryStore {
    fn get_symbols(&self, codes: &[String]) -> Result<HashMap<String, Symbol>> {
        let state = self.state.lock().unwrap();
        Ok(codes
            .iter()
            .filter_map(|c| state.symbols.get(c).map(|s| (c.clone(), s.clone())))
            .collect())
    }

    fn list_by_state(&self, wanted: AdmissionState) -> Result<Vec<Symbol>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .symbols
            .values()
            .filter(|s| s.state == wanted)
            .cloned()
            .collect())
    }

    async fn insert_pending(&self, symbols: Vec<NewSymbol>) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let mut inserted = 0;
        for new_symbol in symbols {
            if state.symbols.contains_key(&new_symbol.symbol) {
                continue;
            }
            state.symbols.insert(
                new_symbol.symbol.clone(),
                Symbol {
                    symbol: new_symbol.symbol,
                    name: new_symbol.name,
                    exchange: new_symbol.exchange,
                    asset_kind: new_symbol.asset_kind,
                    discovery_source: new_symbol.discovery_source,
                    state: AdmissionState::Pending,
                    created_at: now,
                    updated_at: now,
                },
            );
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn set_state(&self, symbol: &str, new_state: AdmissionState) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .symbols
            .get_mut(symbol)
            .ok_or_else(|| Error::Database(DatabaseError::NotFound(symbol.to_string())))?;
        entry.state = new_state;
        entry.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl CursorStore for InMemoryStore {
    fn get_cursor(&self, symbol: &str, data_type: DataType) -> Result<Option<DataTypeCursor>> {
        Ok(self.cursor(symbol, data_type))
    }

    fn list_cursors(&self, symbol: &str) -> Result<Vec<DataTypeCursor>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .cursors
            .values()
            .filter(|c| c.symbol == symbol)
            .cloned()
            .collect())
    }

    fn list_sync_candidates(&self, data_type: DataType) -> Result<Vec<SyncCandidate>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .symbols
            .values()
            .filter(|s| s.state != AdmissionState::Pending)
            .map(|s| SyncCandidate {
                symbol: s.symbol.clone(),
                asset_kind: s.asset_kind,
                state: s.state,
                cursor: state.cursors.get(&(s.symbol.clone(), data_type)).cloned(),
            })
            .collect())
    }

    async fn advance_cursor(
        &self,
        symbol: &str,
        data_type: DataType,
        watermark: DateTime<Utc>,
        attempted_at: DateTime<Utc>,
    ) -> Result<DataTypeCursor> {
        let mut state = self.state.lock().unwrap();
        let cursor = Self::cursor_entry(&mut state, symbol, data_type);
        cursor.apply_advance(watermark, attempted_at);
        Ok(cursor.clone())
    }

    async fn record_attempt(
        &self,
        symbol: &str,
        data_type: DataType,
        outcome: AttemptOutcome,
        attempted_at: DateTime<Utc>,
    ) -> Result<DataTypeCursor> {
        let mut state = self.state.lock().unwrap();
        let cursor = Self::cursor_entry(&mut state, symbol, data_type);
        cursor.apply_attempt(outcome, attempted_at);
        Ok(cursor.clone())
    }

    async fn reset_for_readmission(&self, symbol: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for cursor in state.cursors.values_mut().filter(|c| c.symbol == symbol) {
            cursor.apply_readmission();
        }
        Ok(())
    }
}

#[async_trait]
impl ExclusionStore for InMemoryStore {
    fn get_exclusion(&self, symbol: &str) -> Result<Option<ExclusionRecord>> {
        Ok(self.exclusion(symbol))
    }

    fn list_exclusions(&self) -> Result<Vec<ExclusionRecord>> {
        Ok(self.state.lock().unwrap().exclusions.values().cloned().collect())
    }

    async fn create_exclusion(&self, record: ExclusionRecord) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.exclusions.contains_key(&record.symbol) {
            return Ok(false);
        }
        state.exclusions.insert(record.symbol.clone(), record);
        Ok(true)
    }

    async fn update_exclusion(&self, record: ExclusionRecord) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.exclusions.insert(record.symbol.clone(), record);
        Ok(())
    }

    async fn delete_exclusion(&self, symbol: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().exclusions.remove(symbol).is_some())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn upsert_records(&self, records: &[Record]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        state.upsert_calls += 1;
        if state.failing_upserts > 0 {
            state.failing_upserts -= 1;
            return Err(Error::Database(DatabaseError::TransactionFailed(
                "injected failure".to_string(),
            )));
        }
        for record in records {
            state.records.insert(record.natural_key(), record.clone());
        }
        Ok(records.len())
    }
}

// =============================================================================
// Providers
// =============================================================================

/// Canned answer of a scripted provider.
#[derive(Clone, Debug)]
pub(crate) enum Scripted {
    Records(Vec<Record>),
    Empty,
    RateLimited,
    Transport,
    /// Never answers; exercises timeouts and cancellation.
    Hang,
}

/// Provider answering from a script keyed by (symbol, data type).
pub(crate) struct ScriptedProvider {
    id: &'static str,
    priority: u8,
    data_types: &'static [DataType],
    script: Mutex<HashMap<(String, DataType), Scripted>>,
    fallback: Scripted,
    discovered: Vec<DiscoveredSymbol>,
    calls: AtomicUsize,
    latency: Option<StdDuration>,
}

impl ScriptedProvider {
    pub fn new(id: &'static str, priority: u8) -> Self {
        Self {
            id,
            priority,
            data_types: &DataType::ALL,
            script: Mutex::new(HashMap::new()),
            fallback: Scripted::Empty,
            discovered: Vec::new(),
            calls: AtomicUsize::new(0),
            latency: None,
        }
    }

    pub fn serving(mut self, data_types: &'static [DataType]) -> Self {
        self.data_types = data_types;
        self
    }

    pub fn answer(self, symbol: &str, data_type: DataType, answer: Scripted) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert((symbol.to_string(), data_type), answer);
        self
    }

    pub fn otherwise(mut self, answer: Scripted) -> Self {
        self.fallback = answer;
        self
    }

    pub fn discovering(mut self, symbols: Vec<DiscoveredSymbol>) -> Self {
        self.discovered = symbols;
        self
    }

    pub fn with_latency(mut self, latency: StdDuration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn id(&self) -> &'static str {
        self.id
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            data_types: self.data_types,
            supports_discovery: !self.discovered.is_empty(),
        }
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests_per_minute: 60_000,
            initial_concurrency: 8,
            max_concurrency: 8,
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<Vec<Record>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let answer = self
            .script
            .lock()
            .unwrap()
            .get(&(request.symbol.clone(), request.data_type))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        match answer {
            Scripted::Records(records) => Ok(records),
            Scripted::Empty => Err(FetchError::empty(self.id, &request.symbol)),
            Scripted::RateLimited => Err(FetchError::rate_limited(self.id)),
            Scripted::Transport => Err(FetchError::transport(
                self.id,
                TransportKind::Network,
                "connection reset",
            )),
            Scripted::Hang => {
                std::future::pending::<()>().await;
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl DiscoverySource for ScriptedProvider {
    fn id(&self) -> &'static str {
        self.id
    }

    async fn discover(&self) -> std::result::Result<Vec<DiscoveredSymbol>, FetchError> {
        Ok(self.discovered.clone())
    }
}

// =============================================================================
// Record builders
// =============================================================================

/// Price bar dated 2024-03-`day`.
pub(crate) fn price_bar(symbol: &str, day: u32) -> Record {
    price_bar_on(symbol, NaiveDate::from_ymd_opt(2024, 3, day).unwrap())
}

pub(crate) fn price_bar_on(symbol: &str, date: NaiveDate) -> Record {
    Record::Price(PriceBar {
        symbol: symbol.to_string(),
        date,
        open: Some(dec!(100)),
        high: Some(dec!(101)),
        low: Some(dec!(99)),
        close: dec!(100.5),
        adjusted_close: None,
        volume: Some(dec!(1000)),
    })
}

/// Daily bars for the `days` days before today.
pub(crate) fn recent_price_bars(symbol: &str, days: i64) -> Vec<Record> {
    let today = Utc::now().date_naive();
    (1..=days)
        .rev()
        .map(|ago| price_bar_on(symbol, today - Duration::days(ago)))
        .collect()
}

pub(crate) fn dividend_days_ago(symbol: &str, days_ago: i64) -> Record {
    Record::Dividend(DividendEvent {
        symbol: symbol.to_string(),
        ex_date: Utc::now().date_naive() - Duration::days(days_ago),
        amount: dec!(0.24),
        pay_date: None,
        record_date: None,
        declaration_date: None,
    })
}

pub(crate) fn discovered(symbol: &str, source: &'static str) -> DiscoveredSymbol {
    DiscoveredSymbol {
        symbol: symbol.to_string(),
        name: None,
        exchange: Some("NASDAQ".to_string()),
        asset_kind: AssetKind::Equity,
        source: source.into(),
    }
}

pub(crate) fn as_client(provider: &Arc<ScriptedProvider>) -> Arc<dyn ProviderClient> {
    provider.clone()
}

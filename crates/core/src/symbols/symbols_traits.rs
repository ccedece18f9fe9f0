//! Symbol repository trait.

use std::collections::HashMap;

use async_trait::async_trait;

use super::symbols_model::{AdmissionState, NewSymbol, Symbol};
use crate::errors::Result;

/// Persistence contract for the tracked symbol universe.
///
/// Reads are synchronous; mutations are async so implementations can route
/// them through a serialized writer.
#[async_trait]
pub trait SymbolStore: Send + Sync {
    /// Returns the tracked symbols among `codes`, keyed by code.
    fn get_symbols(&self, codes: &[String]) -> Result<HashMap<String, Symbol>>;

    fn list_by_state(&self, state: AdmissionState) -> Result<Vec<Symbol>>;

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Inserts symbols in the `Pending` state, skipping codes already tracked.
    ///
    /// Returns the number of rows inserted.
    async fn insert_pending(&self, symbols: Vec<NewSymbol>) -> Result<usize>;

    async fn set_state(&self, symbol: &str, state: AdmissionState) -> Result<()>;
}

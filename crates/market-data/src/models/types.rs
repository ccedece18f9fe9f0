use std::borrow::Cow;

/// Provider identifier - mostly static constants
pub type ProviderId = Cow<'static, str>;

/// Ticker as tracked by the engine (e.g. "AAPL", "BRK.B")
pub type SymbolCode = String;

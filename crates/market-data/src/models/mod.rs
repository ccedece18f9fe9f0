//! Data model shared by providers and the sync engine.

mod data_type;
mod record;
mod request;
mod symbol;
mod types;

pub use data_type::{DataType, ParseDataTypeError};
pub use record::{
    start_of_day, DividendEvent, HoldingEntry, IntradayBar, PriceBar, Record, SplitEvent,
};
pub use request::FetchRequest;
pub use symbol::{AssetKind, DiscoveredSymbol};
pub use types::{ProviderId, SymbolCode};

//! BitMEX realtime connector.
//!
//! - `PublicSession`: `instrument` ticks and `tradeBin*` candles
//! - `UserSession`: authenticated `order`/`position`/`margin` tables with
//!   keepalive pings, merged into normalized `UserEvent`s
//! - `BitmexGateway`: the `ExchangeGateway` the engine drives
//!
//! Each stream runs under `connector_core::run_with_reconnect`, so transport
//! failures show up as gaps rather than errors.

mod gateway;
mod parser;
mod public;
mod tables;
mod user_stream;
mod ws;

pub use gateway::BitmexGateway;
pub use parser::{
    auth_request, parse_message, subscribe_request, Action, InstrumentRow, OrderDelta,
    ParsedMessage, Table, TableMessage,
};
pub use public::{subscribe_url, PublicFeed, PublicSession};
pub use tables::{MergedOrder, UserTables};
pub use user_stream::{
    forward_events, FeeLookup, FeeResolver, PendingEvent, UserEventProcessor, UserSession,
    USER_TOPICS,
};

//! tastytrade Streaming Adapters
//!
//! Implements the two tastytrade streaming connections:
//!
//! - **dxFeed**: market data over Bayeux/CometD (handshake, `/meta/connect`
//!   keep-alive, `/service/sub` subscriptions, compact quote arrays)
//! - **Account streamer**: account, watchlist, alert and user-message
//!   updates over flat JSON action messages

pub mod account;
pub mod codec;
pub mod connection;
pub mod credentials;
pub mod dxfeed;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod session;

pub use account::{
    AccountEvent, AccountEventStream, AccountStreamError, AccountStreamer, AccountStreamerConfig,
    HeartbeatHandle,
};
pub use codec::{CodecError, DecodeSkip, EnvelopeCodec, FeedData, QuoteDecoder};
pub use connection::{Connection, ConnectionState, MessageId, TransportError};
pub use credentials::{Credential, CredentialError};
pub use dxfeed::{DxFeedClient, DxFeedClientError, DxFeedConfig, MarketEventStream};
pub use heartbeat::{
    ActionKeepAlive, BayeuxKeepAlive, HeartbeatConfig, HeartbeatError, HeartbeatEvent,
    HeartbeatScheduler,
};
pub use messages::{Action, ActionMessage, Envelope, SubscriptionData};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use session::{BayeuxSession, SessionError, SessionState};

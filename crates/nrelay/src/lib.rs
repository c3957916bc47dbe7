mod client;
mod error;
mod event;
mod filter;
mod pubkey;
mod relay;
mod signer;

pub use client::ClientMessage;
pub use error::Error;
pub use event::{kind, Event, EventExtra, NoteId};
pub use ewebsock;
pub use filter::Filter;
pub use pubkey::Pubkey;
pub use relay::capabilities;
pub use relay::message::{CommandResult, RelayMessage};
pub use relay::transport::{Transport, WebsocketTransport, WsChannel, WsSink};
pub use relay::{
    CapabilitiesError, CloseReason, ConnectionConfig, Delivery, Fee, NormRelayUrl, Phase,
    PoolConfig, PoolHealth, PoolMessage, PoolSubscription, PublishReport, QueryStream,
    RelayCapabilities, RelayConnection, RelayDescriptor, RelayFees, RelayHealth, RelayLimitation,
    RelayPool, RelayReqId, RelayStatus, Subscription, SubscriptionState,
    DEFAULT_MAX_SUBSCRIPTIONS,
};
pub use signer::{KeysSigner, Signer, UnsignedEvent};

pub type Result<T> = std::result::Result<T, error::Error>;

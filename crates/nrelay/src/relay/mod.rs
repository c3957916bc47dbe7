pub mod capabilities;
mod connection;
mod descriptor;
mod identity;
pub mod message;
mod pool;
mod subscription;
pub mod transport;

pub use capabilities::{
    CapabilitiesError, Fee, RelayCapabilities, RelayFees, RelayLimitation,
    DEFAULT_MAX_SUBSCRIPTIONS,
};
pub use connection::{ConnectionConfig, RelayConnection};
pub use descriptor::RelayDescriptor;
pub use identity::{NormRelayUrl, RelayReqId};
pub use pool::{
    PoolConfig, PoolHealth, PoolMessage, PoolSubscription, PublishReport, QueryStream, RelayPool,
};
pub use subscription::{CloseReason, Delivery, Phase, Subscription, SubscriptionState};

/// Where a connection's websocket session is at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    Disconnected,
    Connecting,
    Connected,
    /// the transport ended without us asking
    Failed,
}

/// Whether a connection takes part in pool fan-out.
///
/// `Enabled` → a query fails → `Retrying` → the retry fails too →
/// `Disabled`, until a reconnect cycle brings it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayHealth {
    Enabled,
    Retrying,
    Disabled,
}

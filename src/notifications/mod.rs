//! Real-time notification fan-out

pub mod broadcaster;
pub mod pool;

pub use broadcaster::Broadcaster;
pub use pool::{
    next_client_id, ClientHandle, ClientId, ClientPool, PoolHandle, SubscriptionCell,
    SubscriptionKind,
};

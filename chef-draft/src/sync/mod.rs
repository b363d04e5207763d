// Two-replica synchronization: outbound writes, inbound change feed,
// prediction visibility, presence, and the store transports.

pub mod gateway;
pub mod listener;
pub mod presence;
pub mod store;
pub mod visibility;
pub mod ws_store;

pub use gateway::{OutboundWrite, SyncGateway};
pub use listener::{ChangeFeedListener, Inbound, Notice};
pub use presence::PresenceTracker;
pub use store::{MemoryStore, RemoteStore, StoreError};
pub use visibility::VisibilityFilter;
pub use ws_store::WsStore;

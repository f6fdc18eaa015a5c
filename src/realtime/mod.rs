pub mod bus;
pub mod channel;
pub mod events;

pub use bus::{EventBus, EventFilter, EventHandler, HandlerToken};
pub use channel::{ChannelError, ConnectionState, ItemSubscription, RealtimeChannel};
pub use events::{ChannelEvent, ClientFrame, EventKind};

pub mod controller;
pub mod state;

pub use controller::{FeedController, Seed};
pub use state::{FeedMode, FeedState, FeedStore, FetchTicket};

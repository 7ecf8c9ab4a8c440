pub mod hub;
pub mod models;
pub use hub::{Subscription, SubscriptionHub};
pub use models::*;

mod all_polls_sse;
mod poll_updates_sse;

pub use all_polls_sse::all_polls_sse;
pub use poll_updates_sse::poll_updates_sse;

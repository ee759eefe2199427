pub mod events;

pub use events::{UnknownEvent, WebhookEvent};

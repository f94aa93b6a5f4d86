mod handler;
mod message;

pub use handler::{is_valid_channel_name, ws_handler};
pub use message::{ClientMessage, OutboundMessage, ServerMessage};

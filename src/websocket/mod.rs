mod handler;
mod message;

pub use handler::{handle_client_message, reconcile_disconnect, ws_handler};
pub use message::{ClientMessage, OutboundMessage, ServerMessage};

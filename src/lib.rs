// Infrastructure layer (shared components)
pub mod auth;
pub mod config;
pub mod error;

// Domain layer (coordinator state)
pub mod broadcast;
pub mod presence;
pub mod room;
pub mod session;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

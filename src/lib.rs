pub mod config;
pub mod handshake;
pub mod relay_server;

//! A lottery server: agencies stream their bets over a small binary protocol,
//! and once every agency has finished betting the draw runs and each agency
//! may consult its own winners.

pub mod client;
pub mod config;
pub mod draw;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod store;

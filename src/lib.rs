//! relaychat: a minimal networked chat service
//!
//! A server accepts TCP connections, authenticates or registers users
//! against a credential table on disk, and relays each authenticated
//! client's messages back to it. The client validates commands locally and
//! exchanges one request and one response at a time with the server.
//!
//! Modules:
//! - [`protocol`]: command grammar and response encoding
//! - [`transport`]: bounded single-read/single-write message exchange
//! - [`store`]: file-backed credential table
//! - [`auth`]: login and registration decisions over the store
//! - [`session`]: per-connection state machine and dispatch loop
//! - [`server`]: listener, connection cap, one task per connection
//! - [`client`]: interactive front end with local validation
//! - [`config`], [`cli`]: command-line and TOML configuration

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;

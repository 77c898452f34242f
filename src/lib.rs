//! dropyard: the rendezvous-and-relay core of a browser-to-browser file
//! transfer service — pickup-code allocation, session lifecycle, the
//! dual-socket relay protocol, signaling/NAT exchange, the HTTP-stream
//! bridge, and the stored-file lifecycle.

pub mod admin;
pub mod api;
pub mod codes;
pub mod config;
pub mod counter;
pub mod error;
pub mod http_stream;
pub mod janitor;
pub mod server;
pub mod session;
pub mod socket;
pub mod state;
pub mod storage;
pub mod ws;

pub use error::{Error, Result};
pub use server::{app, run_server, ServerConfig};
pub use state::AppState;

//! securefetch server
//!
//! Accepts TLS connections, authenticates each client against a single
//! reference credential and serves `ls`/`getfile` from one root directory.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use dispatch::{Dispatcher, Flow, ServedRoot};
pub use server::Server;
pub use session::{handle_session, Session, SessionContext, SessionInfo, SessionState};

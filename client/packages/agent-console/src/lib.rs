//! Session connection manager for AI agent workspaces.
//!
//! Keeps the user's sessions and the current session pointer in sync with
//! the backend, holds at most one run stream connection per session, and
//! decides which chat views stay mounted.

pub mod backend;
pub mod broker;
pub mod cache;
pub mod cli;
pub mod connection;
pub mod context;
pub mod directory;
pub mod endpoint;
pub mod events;
pub mod http;
pub mod location;
pub mod manager;
pub mod notify;
pub mod preferences;
pub mod run_status;
pub mod session;
pub mod testing;
pub mod view;
pub mod ws;

pub use agent_console_error::{ConsoleError, ErrorType, ProblemDetails};
pub use broker::{AcquireMode, ConnectionBroker};
pub use cache::ConnectionCache;
pub use connection::{Connector, StreamConnection};
pub use context::ConsoleContext;
pub use directory::{SelectionState, SessionDirectory};
pub use endpoint::StreamEndpoint;
pub use manager::{SessionManager, TeardownReason};
pub use run_status::{RunStatus, RunStatusRegistry};
pub use session::{Session, SessionId};

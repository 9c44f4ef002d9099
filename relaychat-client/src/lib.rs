//! Client side of the relay chat protocol.
//!
//! One TCP connection carries every conversation. A single dispatcher task
//! reads frames and fans them out as [`ClientEvent`]s; any number of callers
//! send through the shared [`Outbound`] writer, one whole frame at a time.

pub mod command;
pub mod config;
pub mod connection;
pub mod console;
mod dispatcher;
pub mod error;
pub mod event;
mod lifecycle;
pub mod outbound;
pub mod receiver;
pub mod roster;
pub mod session;
pub mod staging;

pub use command::{ClientCommand, run_commands};
pub use config::{ClientConfig, SavedClientConfig};
pub use connection::{Client, ClientHandle};
pub use error::ClientError;
pub use event::{ClientEvent, CloseReason, EventSink};
pub use lifecycle::ConnectionState;
pub use outbound::{Outbound, SentFile};
pub use roster::Roster;
pub use session::{Conversation, SessionRegistry};
pub use staging::{StagingDir, save_received_file, unique_destination};

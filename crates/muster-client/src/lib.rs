//! muster client
//!
//! Joins a host, mirrors its player listing and proposes seat changes. The
//! host stays the only writer of seating; this crate only asks.

pub mod connection;
pub mod coordinator;
pub mod selection;
pub mod state;

pub use connection::HostConnection;
pub use coordinator::{ClientCoordinator, ClientUpdate, Credentials, HostAddress, SessionHandle};
pub use selection::MatchSelection;
pub use state::ClientState;

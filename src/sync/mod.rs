//! Metadata gossip between storage nodes

pub mod daemon;
pub mod metadata;
pub mod services;
pub mod transport;

pub use daemon::{CycleOutcome, MetadataSyncDaemon};
pub use metadata::{resolve_peers, MetadataDir};
pub use services::{FakeServices, ServiceSupervisor, SystemServices};
pub use transport::{LoopbackTransport, PeerTransport, SshTransport};

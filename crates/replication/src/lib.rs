//! Replication for revstore
//!
//! Pull and push strategies that move revisions between a local
//! [`revstore_engine::Database`] and any [`RemoteDatabase`]:
//! - remote: the peer trait and the change/revision shapes it exchanges
//! - peer: [`LocalPeer`], a local store acting as a peer
//! - checkpoint: replication ids and `_local/replication-<id>` progress docs
//! - pull / push: the batch loops
//!
//! Revision ids and histories are never generated here; every revision is
//! grafted with force-insert, one transaction per revision.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod config;
pub mod peer;
pub mod pull;
pub mod push;
pub mod remote;

pub use checkpoint::Direction;
pub use config::{ReplicationConfig, ReplicationStats};
pub use peer::LocalPeer;
pub use pull::PullReplication;
pub use push::PushReplication;
pub use remote::{ChangeEntry, RemoteChanges, RemoteDatabase, RemoteRevision};

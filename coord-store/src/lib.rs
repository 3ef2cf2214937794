//! Generic, prefixed etcd client: typed JSON get/list/put/delete, CAS-based
//! ephemeral keys, child-watch, and lease/session management. Knows nothing
//! about partitions, topics, or consumer groups — that domain logic lives
//! in `balanced-consumer`, built on top of this crate the way
//! `kafka-assigner` and `personhog-coordination` are built on top of
//! `assignment-coordination` in the wider workspace this was extracted
//! from.

mod error;
mod session;
mod store;

pub use error::{Error, Result};
pub use session::Session;
pub use store::{ChildWatch, CoordinatorClient, StoreConfig};

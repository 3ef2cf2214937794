use thiserror::Error;

use crate::types::Partition;

#[derive(Error, Debug)]
pub enum Error {
    #[error("coordinator error: {0}")]
    Store(#[from] coord_store::Error),

    #[error("consumer has been stopped")]
    ConsumerStopped,

    #[error("no partitions assigned to this consumer")]
    NoPartitionsForConsumer,

    #[error("partition {0:?} is still owned by another member")]
    PartitionOwned(Partition),

    #[error("group already has {participants} participants for {partitions} partitions")]
    CapacityExceeded {
        participants: usize,
        partitions: usize,
    },

    #[error("coordinator is missing broker metadata at {0}; is the cluster initialized?")]
    CoordinatorUnavailable(String),

    #[error("background worker error: {0}")]
    BackgroundWorkerError(String),

    #[error("configuration error: {0}")]
    Config(#[from] envconfig::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

//! The connection engine: batching, dispatch, failure handling.

mod aggregate;
mod config;
mod connection;
mod failure;
mod queues;
mod registry;
mod responses;
mod sequence;

pub use aggregate::AggregateSource;
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionStatus};
pub use failure::{
    classify_status, ChangesPager, FailureOutcome, MESSAGE_CHANGES_SCHEDULE,
    THREAD_CHANGES_SCHEDULE,
};
pub use queues::{QueryRequest, ResponseCallback, WorkQueues};
pub use registry::{
    CommitFn, FetchFn, HandlerRegistry, QueryFn, RefreshFn, RegistryTables, ResponseFn,
    ResponseKey, TypeHandler, TypeHandlers,
};
pub use responses::RecordType;
pub use sequence::{Sequence, SequenceHandle, SequenceHook, SequenceStep};

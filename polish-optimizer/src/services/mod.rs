//! Session orchestration services

pub mod manager;
pub mod publisher;
pub mod registry;
pub mod scheduler;
pub mod worker_pool;

pub use manager::{
    OptimizationManager, QueueStatus, RetryResponse, SessionDetail, StartRequest, StartResponse,
    StopAck,
};
pub use publisher::ProgressPublisher;
pub use registry::{SessionHandle, SessionRegistry};
pub use scheduler::{QueueEntry, Scheduler};
pub use worker_pool::WorkerPool;

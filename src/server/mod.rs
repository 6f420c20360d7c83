//! Connection acceptor and handler pool.

pub mod listener;
pub mod pool;

pub use listener::{Server, ShutdownHandle};
pub use pool::{
    BoxFuture, HandlerPool, HandlerPoolConfig, JobHandler, ObjectPool, PoolFull, PoolStats, Pooled,
    Recycle,
};

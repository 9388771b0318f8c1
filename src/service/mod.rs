pub mod alarm;
pub mod buffer;
pub mod flusher;
pub mod worker_pool;

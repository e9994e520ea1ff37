pub mod consumer;
pub mod ingest;
pub mod memory;
pub mod queue;
pub mod resize;
pub mod storage;
pub mod worker;

pub mod clock;
pub mod job_store;
pub mod materializer;
pub mod notifications;
pub mod poller;
pub mod simulator;
pub mod storage;
pub mod tracker;
pub mod transport;

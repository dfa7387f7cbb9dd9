//! The four pipeline stages. Each runs as its own task and talks to its neighbours only through
//! task queues.
pub mod activation;
pub mod download;
pub mod poll;
pub mod search;

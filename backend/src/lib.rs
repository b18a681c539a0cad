pub mod error;
pub mod pipeline;
pub mod routes;
pub mod storage;
pub mod store;

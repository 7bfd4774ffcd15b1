mod create_client;
pub mod data_types;
pub mod sse;

pub use create_client::create_client;

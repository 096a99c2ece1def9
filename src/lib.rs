pub mod config;
pub mod error;
pub mod invoker;
pub mod llm;
pub mod model;
pub mod rate_limit;
pub mod schema;

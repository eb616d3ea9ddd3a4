pub mod context;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod prompts;
pub mod queue;
pub mod store;
pub mod streaming;
pub mod worker;

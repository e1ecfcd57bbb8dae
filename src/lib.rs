pub mod api_router;
pub mod classify;
pub mod config;
pub mod identity;
pub mod llm;
pub mod merge;
pub mod shared;
pub mod tickets;

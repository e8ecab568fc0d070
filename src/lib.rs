pub mod api;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod credentials_store;
pub mod entities;
pub mod poolsync;

//! socialops library.
//!
//! Ingests comments from Telegram channels and VK communities, fans them out
//! to connected clients through a per-team event log, publishes posts to both
//! platforms and keeps per-post engagement statistics.

pub mod analytics;
pub mod auth;
pub mod bus;
pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod grpc;
pub mod posts;
pub mod retry;
pub mod storage;
pub mod telegram;
pub mod vk;
pub mod web;

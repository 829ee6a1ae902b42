//! Mail Assist: mail ingestion and calendar-event extraction.

pub mod accounts;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod links;
pub mod mail;
pub mod notify;
pub mod pipeline;
pub mod store;
pub mod vault;

//! mail-triage: classify unread support e-mails and log them to a sheet.

pub mod classify;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod source;
pub mod store;

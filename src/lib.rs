#![forbid(unsafe_code)]

//! Library behind the `uptube` command: duplicate-aware, resumable uploads of
//! local video folders, with a per-profile ledger of every attempt.

pub mod catalog;
pub mod config;
pub mod credentials;
pub mod fingerprint;
pub mod history;
pub mod metadata;
pub mod orchestrator;
pub mod progress;
pub mod transfer;
pub mod videos;

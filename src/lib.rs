// src/lib.rs

//! dumptool: resumable bulk acquisition of catalog metadata records.
//!
//! Records are fetched by integer id, stored as pretty-printed JSON under
//! bucketed directories, and tracked in append-only ledgers so that a run can
//! be interrupted and picked up again days later.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;

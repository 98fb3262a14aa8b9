//! Core pipeline orchestration and domain logic for feedpress.
//!
//! This crate ties feed fetching, history dedupe, AI enhancement, social
//! copy, CSV export, image attachment and spreadsheet publishing into the
//! dated daily run (`run_pipeline`), and exposes each step as a stage the
//! CLI can run on its own.

pub mod artifacts;
pub mod commit;
pub mod enhance;
pub mod export;
pub mod images;
pub mod pipeline;
pub mod publish;
pub mod social;
pub mod stages;
pub mod topup;

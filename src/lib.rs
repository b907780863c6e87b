//! Transaction reconciliation and rule engine for scraped bank data
//! (spec.md §1). The scraping/browser layer, HTTP exposure, CLI parsing
//! wrapper, and scheduler loop are external collaborators; this crate
//! provides the three in-scope subsystems — Parsing & Normalization,
//! Rule Engine, and Reconciliation Store — plus the ambient config,
//! error, store and concurrency-policy scaffolding a real deployment
//! wraps around them.

pub mod config;
pub mod error;
pub mod keywords;
pub mod model;
pub mod notifications;
pub mod parsers;
pub mod reconciler;
pub mod rules;
pub mod scheduler;
pub mod store;

pub use error::{BankingError, Result};

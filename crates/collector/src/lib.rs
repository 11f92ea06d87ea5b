#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`CollectorError`, temporary/fatal classification)
//! - [`config`]: Collector configuration (`ExportCollectorConfig`, `from_core`)
//! - [`types`]: Export domain types (`ExportJob`, `ExportStatus`, `VulnRecord`)
//! - [`client`]: Export API abstraction (`ExportApi` trait, `GitlabExportClient`,
//!   `wait_for_export`)
//! - [`csv`]: Streaming CSV payload reader (`CsvReader`)
//! - [`state`]: Durable dedup store (`StateManager`, `FindingState`)
//! - [`collector`]: Main orchestrator (`ExportCollector`, `ExportCollectorBuilder`,
//!   `Pipeline` impl)
//!
//! # Architecture
//!
//! ```text
//! poll tick --> resolve target --> create export --> wait (poll status)
//!                                                        |
//!                                                  download CSV
//!                                                        |
//!                                    CsvReader --> StateManager.should_process()
//!                                                        |
//!                                                  FindingEvent
//!                                                        |
//!                                               mpsc --> downstream
//! ```

pub mod client;
pub mod collector;
pub mod config;
pub mod csv;
pub mod error;
pub mod state;
pub mod types;

// --- Public API Re-exports ---

// Collector (main orchestrator)
pub use collector::{ExportCollector, ExportCollectorBuilder, TickReport};

// Configuration
pub use config::ExportCollectorConfig;

// Error
pub use error::CollectorError;

// Client
pub use client::{ExportApi, GitlabExportClient, wait_for_export};

// State store
pub use state::{FindingState, StateManager};

// Types
pub use types::{ExportJob, ExportStatus, VulnRecord};

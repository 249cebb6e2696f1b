//! # Core Logic - Shared Utilities for the Transaction Bots
//!
//! This crate provides the chain-agnostic pieces every bot binary needs:
//! configuration primitives, typed errors, logging, failure classification,
//! the run tally, account/proxy file parsing and the worker runner.
//!
//! ## Modules
//!
//! - [`config`] - Chain and proxy descriptors
//! - [`error`] - Typed error handling with thiserror
//! - [`metrics`] - Run tally (actions attempted/succeeded, failures per class)
//! - [`traits`] - Core trait definitions
//! - `utils` - Logger, retry classification, account/proxy parsing, runner

// Module declarations - internal modules marked pub(crate)
pub mod config;
pub mod error;
pub mod metrics;
pub mod traits;
pub(crate) mod utils;

// Selective exports - only public API types
pub use config::{ChainConfig, ProxyConfig};
pub use error::{AccountError, BuildError, ConfigError, NetworkError};
pub use metrics::{ActionCounts, ActionKind, RunTally, TallySnapshot};
pub use traits::{Worker, WorkerStats};

// Utils are pub(crate) - only export specific public utilities
pub use utils::{
    parse_account_line, parse_proxy_line, setup_logger, setup_logger_with_file, AccountManager,
    ProxyManager, RawAccount, WorkerRunner, LOG_ENV, RESULT_TARGET, SUBMISSION_TARGET,
};

// Export retry utilities for testing
pub use utils::retry::{classify_error, is_nonce_too_high, random_delay, FailureClass, LinearBackoff};

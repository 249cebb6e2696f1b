//! # Utilities Module
//!
//! Internal utility modules for the core-logic crate.
//! These modules are marked as `pub(crate)` to enforce API boundaries.

// Internal modules - not part of public API
pub(crate) mod account_manager;
pub(crate) mod logger;
pub(crate) mod proxy_manager;
pub(crate) mod retry;
pub(crate) mod runner;

// Selective exports - only public utilities
pub use account_manager::{parse_account_line, AccountManager, RawAccount};
pub use logger::{setup_logger, setup_logger_with_file, LOG_ENV, RESULT_TARGET, SUBMISSION_TARGET};
pub use proxy_manager::{parse_proxy_line, ProxyManager};
pub use retry::{classify_error, is_nonce_too_high, random_delay, FailureClass, LinearBackoff};
pub use runner::WorkerRunner;

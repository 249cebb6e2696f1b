//! # Core Error Types
//!
//! Centralized error definitions for the core-logic crate.
//! All errors implement `std::error::Error` and `std::fmt::Display`;
//! the binaries fold them into `anyhow` at the edges.

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Invalid RPC URL format: '{url}'")]
    InvalidRpcUrl { url: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("I/O error reading {path}: {msg}")]
    IoError { path: String, msg: String },
}

/// Account file parsing errors
#[derive(Error, Debug, Clone)]
pub enum AccountError {
    #[error("Unrecognized account format on line {line}")]
    UnrecognizedFormat { line: usize },

    #[error("Invalid private key format: expected hex string")]
    InvalidKeyFormat,

    #[error("Private key has wrong length: expected 64 hex chars, got {length}")]
    InvalidKeyLength { length: usize },
}

/// Why a connection failed its health check
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("RPC unreachable via {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("Chain id mismatch: expected {expected}, node reports {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },
}

/// Errors raised while turning an intent into a transaction request.
///
/// These are never retried: the same intent would fail the same way.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Contract '{name}' is not in the catalog")]
    UnknownContract { name: String },

    #[error("Contract '{name}' has no bytecode")]
    MissingBytecode { name: String },

    #[error("Constructor mismatch for '{name}': ABI expects {expected} argument(s), got {actual}")]
    ConstructorMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Contract '{contract}' has no function '{function}'")]
    UnknownFunction { contract: String, function: String },

    #[error("No interaction strategy for {contract}.{function}")]
    UnsupportedInteraction { contract: String, function: String },

    #[error("Invalid argument for '{member}': {reason}")]
    InvalidArgument { member: String, reason: String },

    #[error("Invalid address '{value}'")]
    InvalidAddress { value: String },

    #[error("Invalid amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },
}

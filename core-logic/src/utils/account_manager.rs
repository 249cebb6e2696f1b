use crate::error::AccountError;
use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A private key (and optionally a declared address) read from an accounts file.
///
/// The key is stored normalized as `0x` + 64 lowercase hex chars and wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RawAccount {
    private_key: String,
    #[zeroize(skip)]
    pub declared_address: Option<String>,
    #[zeroize(skip)]
    pub line: usize,
}

impl RawAccount {
    pub fn from_key(key: &str) -> Result<Self, AccountError> {
        Ok(Self {
            private_key: normalize_key(key)?,
            declared_address: None,
            line: 0,
        })
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }
}

impl fmt::Debug for RawAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawAccount")
            .field("declared_address", &self.declared_address)
            .field("line", &self.line)
            .field("private_key", &"***REDACTED***")
            .finish()
    }
}

pub struct AccountManager;

impl AccountManager {
    /// Loads every parseable account from `path`. Bad lines are skipped with a warning.
    pub fn load_accounts(path: impl AsRef<Path>) -> Result<Vec<RawAccount>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read accounts file {}", path.display()))?;

        let accounts = Self::parse_accounts(&content);
        info!("Loaded {} accounts from {}", accounts.len(), path.display());
        Ok(accounts)
    }

    pub fn parse_accounts(content: &str) -> Vec<RawAccount> {
        let mut accounts = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            match parse_account_line(line, idx + 1) {
                Ok(Some(account)) => accounts.push(account),
                Ok(None) => {}
                Err(e) => warn!("Skipping account line: {}", e),
            }
        }
        accounts
    }
}

/// Parses one line. Blank lines and `#` comments yield `Ok(None)`.
///
/// Accepted shapes: `KEY`, `0xKEY`, `ADDRESS<d>KEY` and `KEY<d>ADDRESS`
/// where `<d>` is one of `,` `|` `;` or whitespace.
pub fn parse_account_line(line: &str, line_no: usize) -> Result<Option<RawAccount>, AccountError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let parts: Vec<&str> = line
        .split(|c: char| c == ',' || c == '|' || c == ';' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();

    let (key, address) = match parts.as_slice() {
        [key] => (*key, None),
        [a, b] if is_address(a) => (*b, Some(*a)),
        [a, b] if is_address(b) => (*a, Some(*b)),
        _ => return Err(AccountError::UnrecognizedFormat { line: line_no }),
    };

    let mut account = RawAccount::from_key(key)?;
    account.declared_address = address.map(str::to_string);
    account.line = line_no;
    Ok(Some(account))
}

fn normalize_key(key: &str) -> Result<String, AccountError> {
    let stripped = key
        .strip_prefix("0x")
        .or_else(|| key.strip_prefix("0X"))
        .unwrap_or(key);
    if stripped.len() != 64 {
        return Err(AccountError::InvalidKeyLength {
            length: stripped.len(),
        });
    }
    hex::decode(stripped).map_err(|_| AccountError::InvalidKeyFormat)?;
    Ok(format!("0x{}", stripped.to_lowercase()))
}

fn is_address(s: &str) -> bool {
    s.len() == 42
        && (s.starts_with("0x") || s.starts_with("0X"))
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use core_logic::RawAccount;
use std::fmt;
use tracing::warn;

/// A signing account. The key lives only inside the wallet.
#[derive(Clone)]
pub struct Account {
    address: Address,
    wallet: EthereumWallet,
}

impl Account {
    pub fn from_private_key(key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = key.parse().context("Failed to parse private key")?;
        Ok(Self {
            address: signer.address(),
            wallet: EthereumWallet::from(signer),
        })
    }

    /// The derived address always wins over a declared one.
    pub fn from_raw(raw: &RawAccount) -> Result<Self> {
        let account = Self::from_private_key(raw.private_key())
            .with_context(|| format!("Invalid key on accounts line {}", raw.line))?;

        if let Some(declared) = &raw.declared_address {
            match declared.parse::<Address>() {
                Ok(addr) if addr == account.address => {}
                _ => warn!(
                    "Line {}: declared address {} does not match key, using {}",
                    raw.line,
                    declared,
                    account.address.to_checksum(None)
                ),
            }
        }
        Ok(account)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn wallet(&self) -> &EthereumWallet {
        &self.wallet
    }

    /// `0x1234...abcd`, for log lines
    pub fn short(&self) -> String {
        let full = self.address.to_checksum(None);
        format!("{}...{}", &full[..6], &full[full.len() - 4..])
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("private_key", &"***REDACTED***")
            .finish()
    }
}

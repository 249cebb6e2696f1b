//! Transaction Builder
//!
//! Turns a [`TxIntent`] into a chain-valid legacy transaction request. All ABI
//! work happens once in [`TxBuilder::prepare`]; each attempt then only stamps
//! a nonce and a fresh gas price onto the prepared payload.

use crate::catalog::ContractCatalog;
use crate::interactions::{InteractionContext, InteractionRegistry};
use alloy::dyn_abi::JsonAbiExt;
use alloy::json_abi::StateMutability;
use alloy::network::TransactionBuilder;
use alloy::primitives::utils::parse_ether;
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::eth::TransactionRequest;
use core_logic::{ActionKind, BuildError};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentTarget {
    Deploy {
        contract: String,
    },
    Call {
        contract: String,
        address: Address,
        function: String,
        /// Index of this call against the same contract, fed to argument generators
        round: u32,
    },
    Transfer {
        recipient: Address,
        amount: U256,
    },
}

/// One logical action requested by a worker. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIntent {
    pub from: Address,
    pub target: IntentTarget,
    /// Overrides the value a call strategy would attach
    pub value: Option<U256>,
    /// Gas estimate, if the caller has one
    pub gas_hint: Option<u64>,
}

impl TxIntent {
    pub fn deploy(from: Address, contract: impl Into<String>) -> Self {
        Self {
            from,
            target: IntentTarget::Deploy {
                contract: contract.into(),
            },
            value: None,
            gas_hint: None,
        }
    }

    pub fn call(
        from: Address,
        contract: impl Into<String>,
        address: Address,
        function: impl Into<String>,
        round: u32,
    ) -> Self {
        Self {
            from,
            target: IntentTarget::Call {
                contract: contract.into(),
                address,
                function: function.into(),
                round,
            },
            value: None,
            gas_hint: None,
        }
    }

    pub fn transfer(from: Address, recipient: Address, amount: U256) -> Self {
        Self {
            from,
            target: IntentTarget::Transfer { recipient, amount },
            value: None,
            gas_hint: None,
        }
    }

    pub fn with_gas_hint(mut self, gas: u64) -> Self {
        self.gas_hint = Some(gas);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn kind(&self) -> ActionKind {
        match self.target {
            IntentTarget::Deploy { .. } => ActionKind::Deploy,
            IntentTarget::Call { .. } => ActionKind::Interact,
            IntentTarget::Transfer { .. } => ActionKind::Transfer,
        }
    }
}

impl fmt::Display for TxIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            IntentTarget::Deploy { contract } => write!(f, "deploy {}", contract),
            IntentTarget::Call {
                contract, function, ..
            } => write!(f, "{}.{}()", contract, function),
            IntentTarget::Transfer { recipient, amount } => write!(
                f,
                "transfer {} to {}",
                alloy::primitives::utils::format_ether(*amount),
                recipient.to_checksum(None)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasLimits {
    pub deploy: u64,
    pub call: u64,
    pub transfer: u64,
    pub safety_margin: f64,
}

impl Default for GasLimits {
    fn default() -> Self {
        Self {
            deploy: 500_000,
            call: 200_000,
            transfer: 21_000,
            safety_margin: 1.2,
        }
    }
}

impl GasLimits {
    pub fn limit_for(&self, kind: ActionKind, hint: Option<u64>) -> u64 {
        match hint {
            Some(estimate) => (estimate as f64 * self.safety_margin).ceil() as u64,
            None => match kind {
                ActionKind::Deploy => self.deploy,
                ActionKind::Interact => self.call,
                ActionKind::Transfer => self.transfer,
            },
        }
    }
}

/// Everything about a transaction except nonce and gas price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTx {
    pub kind: ActionKind,
    pub from: Address,
    /// `None` for contract creation
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub chain_id: u64,
}

impl PreparedTx {
    pub fn request(&self, nonce: u64, gas_price: u128) -> TransactionRequest {
        let tx = TransactionRequest::default()
            .with_from(self.from)
            .with_chain_id(self.chain_id)
            .with_nonce(nonce)
            .with_gas_price(gas_price)
            .with_gas_limit(self.gas_limit)
            .with_value(self.value);

        match self.to {
            Some(to) => tx.with_to(to).with_input(self.input.clone()),
            None => tx.with_deploy_code(self.input.clone()),
        }
    }

    /// Canonical EIP-55 form of the recipient.
    pub fn to_checksum(&self) -> Option<String> {
        self.to.map(|a| a.to_checksum(None))
    }

    /// Worst-case spend: value plus `gas_limit * gas_price`.
    pub fn max_cost(&self, gas_price: u128) -> U256 {
        self.value + U256::from(self.gas_limit) * U256::from(gas_price)
    }
}

pub struct TxBuilder {
    chain_id: u64,
    catalog: Arc<ContractCatalog>,
    registry: Arc<InteractionRegistry>,
    gas: GasLimits,
}

impl TxBuilder {
    pub fn new(
        chain_id: u64,
        catalog: Arc<ContractCatalog>,
        registry: Arc<InteractionRegistry>,
        gas: GasLimits,
    ) -> Self {
        Self {
            chain_id,
            catalog,
            registry,
            gas,
        }
    }

    pub fn catalog(&self) -> &ContractCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &InteractionRegistry {
        &self.registry
    }

    /// Resolves ABI members and encodes calldata. Never returns a partial payload.
    pub fn prepare(&self, intent: &TxIntent) -> Result<PreparedTx, BuildError> {
        let kind = intent.kind();
        let gas_limit = self.gas.limit_for(kind, intent.gas_hint);

        let (to, value, input) = match &intent.target {
            IntentTarget::Deploy { contract } => {
                let artifact = self.catalog.get(contract)?;
                if artifact.bytecode.is_empty() {
                    return Err(BuildError::MissingBytecode {
                        name: artifact.name.clone(),
                    });
                }

                let ctx = InteractionContext {
                    caller: intent.from,
                    contract: Address::ZERO,
                    round: 0,
                };
                let inputs = artifact
                    .abi
                    .constructor()
                    .map(|c| c.inputs.clone())
                    .unwrap_or_default();
                let args = self
                    .registry
                    .constructor_args(&artifact.kind(), &ctx, &inputs);

                if args.len() != inputs.len() {
                    return Err(BuildError::ConstructorMismatch {
                        name: artifact.name.clone(),
                        expected: inputs.len(),
                        actual: args.len(),
                    });
                }

                let mut code = artifact.bytecode.to_vec();
                if let Some(constructor) = artifact.abi.constructor() {
                    let encoded = constructor.abi_encode_input(&args).map_err(|e| {
                        BuildError::InvalidArgument {
                            member: format!("{}.constructor", artifact.name),
                            reason: e.to_string(),
                        }
                    })?;
                    code.extend_from_slice(&encoded);
                }
                (None, intent.value.unwrap_or(U256::ZERO), Bytes::from(code))
            }

            IntentTarget::Call {
                contract,
                address,
                function,
                round,
            } => {
                let artifact = self.catalog.get(contract)?;
                let overloads =
                    artifact
                        .abi
                        .function(function)
                        .ok_or_else(|| BuildError::UnknownFunction {
                            contract: artifact.name.clone(),
                            function: function.clone(),
                        })?;
                let strategy = self.registry.resolve(&artifact.kind(), function)?;

                let ctx = InteractionContext {
                    caller: intent.from,
                    contract: *address,
                    round: *round,
                };

                let mut encoded = None;
                for candidate in overloads {
                    let args = strategy.args(&ctx, &candidate.inputs);
                    if args.len() != candidate.inputs.len() {
                        continue;
                    }
                    let data = candidate.abi_encode_input(&args).map_err(|e| {
                        BuildError::InvalidArgument {
                            member: format!("{}.{}", artifact.name, function),
                            reason: e.to_string(),
                        }
                    })?;
                    encoded = Some((candidate, data));
                    break;
                }
                let (selected, data) = encoded.ok_or_else(|| BuildError::InvalidArgument {
                    member: format!("{}.{}", artifact.name, function),
                    reason: "no overload matches the generated arguments".to_string(),
                })?;

                let value = intent.value.unwrap_or_else(|| strategy.value(&ctx));
                if !value.is_zero() && selected.state_mutability != StateMutability::Payable {
                    return Err(BuildError::InvalidArgument {
                        member: format!("{}.{}", artifact.name, function),
                        reason: "value sent to a non-payable function".to_string(),
                    });
                }
                (Some(*address), value, Bytes::from(data))
            }

            IntentTarget::Transfer { recipient, amount } => {
                (Some(*recipient), *amount, Bytes::new())
            }
        };

        Ok(PreparedTx {
            kind,
            from: intent.from,
            to,
            value,
            input,
            gas_limit,
            chain_id: self.chain_id,
        })
    }

    /// `prepare` + `request` in one step.
    pub fn build(
        &self,
        intent: &TxIntent,
        nonce: u64,
        gas_price: u128,
    ) -> Result<TransactionRequest, BuildError> {
        Ok(self.prepare(intent)?.request(nonce, gas_price))
    }
}

/// Parses a recipient. Mixed-case input must carry a valid EIP-55 checksum.
pub fn parse_recipient(value: &str) -> Result<Address, BuildError> {
    let trimmed = value.trim();
    let body = trimmed.trim_start_matches("0x");
    let mixed_case =
        body.chars().any(|c| c.is_ascii_uppercase()) && body.chars().any(|c| c.is_ascii_lowercase());

    let parsed = if mixed_case {
        Address::parse_checksummed(trimmed, None).ok()
    } else {
        Address::from_str(trimmed).ok()
    };
    parsed.ok_or_else(|| BuildError::InvalidAddress {
        value: value.to_string(),
    })
}

/// Native units to wei, exact for up to 18 decimals.
pub fn to_wei(amount: f64) -> Result<U256, BuildError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(BuildError::InvalidAmount {
            value: amount.to_string(),
            reason: "must be a finite, non-negative number".to_string(),
        });
    }
    parse_ether(&format!("{:.18}", amount)).map_err(|e| BuildError::InvalidAmount {
        value: amount.to_string(),
        reason: e.to_string(),
    })
}

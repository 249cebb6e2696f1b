//! Interaction strategies: stock argument generators per (contract kind, function).
//!
//! The builder resolves a strategy once per call intent. A pair without a
//! registered strategy is an explicit [`BuildError::UnsupportedInteraction`].

use alloy::dyn_abi::DynSolValue;
use alloy::json_abi::Param;
use alloy::primitives::utils::parse_ether;
use alloy::primitives::{Address, U256};
use core_logic::BuildError;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// What a strategy may look at when generating arguments.
#[derive(Debug, Clone)]
pub struct InteractionContext {
    /// Sender of the transaction
    pub caller: Address,
    /// Deployed contract address (zero for constructors)
    pub contract: Address,
    /// 0-based index of this interaction against the same contract
    pub round: u32,
}

pub trait InteractionStrategy: Send + Sync {
    /// Arguments for the call. `inputs` are the ABI parameters of the target
    /// member, for strategies that adapt to overloaded shapes.
    fn args(&self, ctx: &InteractionContext, inputs: &[Param]) -> Vec<DynSolValue>;

    /// Native value attached to the call
    fn value(&self, _ctx: &InteractionContext) -> U256 {
        U256::ZERO
    }
}

type ArgFn = dyn Fn(&InteractionContext, &[Param]) -> Vec<DynSolValue> + Send + Sync;

struct FnStrategy {
    args: Box<ArgFn>,
    value: U256,
}

impl InteractionStrategy for FnStrategy {
    fn args(&self, ctx: &InteractionContext, inputs: &[Param]) -> Vec<DynSolValue> {
        (self.args)(ctx, inputs)
    }

    fn value(&self, _ctx: &InteractionContext) -> U256 {
        self.value
    }
}

#[derive(Default, Clone)]
pub struct InteractionRegistry {
    calls: HashMap<(String, String), Arc<dyn InteractionStrategy>>,
    constructors: HashMap<String, Arc<dyn InteractionStrategy>>,
}

impl InteractionRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: &str,
        function: &str,
        strategy: Arc<dyn InteractionStrategy>,
    ) -> &mut Self {
        self.calls
            .insert((kind.to_lowercase(), function.to_string()), strategy);
        self
    }

    pub fn register_fn<F>(&mut self, kind: &str, function: &str, value: U256, f: F) -> &mut Self
    where
        F: Fn(&InteractionContext, &[Param]) -> Vec<DynSolValue> + Send + Sync + 'static,
    {
        self.register(
            kind,
            function,
            Arc::new(FnStrategy {
                args: Box::new(f),
                value,
            }),
        )
    }

    pub fn register_constructor<F>(&mut self, kind: &str, f: F) -> &mut Self
    where
        F: Fn(&InteractionContext, &[Param]) -> Vec<DynSolValue> + Send + Sync + 'static,
    {
        self.constructors.insert(
            kind.to_lowercase(),
            Arc::new(FnStrategy {
                args: Box::new(f),
                value: U256::ZERO,
            }),
        );
        self
    }

    pub fn resolve(
        &self,
        kind: &str,
        function: &str,
    ) -> Result<Arc<dyn InteractionStrategy>, BuildError> {
        self.calls
            .get(&(kind.to_lowercase(), function.to_string()))
            .cloned()
            .ok_or_else(|| BuildError::UnsupportedInteraction {
                contract: kind.to_string(),
                function: function.to_string(),
            })
    }

    /// Constructor arguments for `kind`; contracts without a registered
    /// generator deploy with none.
    pub fn constructor_args(
        &self,
        kind: &str,
        ctx: &InteractionContext,
        inputs: &[Param],
    ) -> Vec<DynSolValue> {
        self.constructors
            .get(&kind.to_lowercase())
            .map(|s| s.args(ctx, inputs))
            .unwrap_or_default()
    }

    /// Registered function names for `kind`, sorted.
    pub fn functions_for(&self, kind: &str) -> Vec<String> {
        let kind = kind.to_lowercase();
        let mut names: Vec<String> = self
            .calls
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, f)| f.clone())
            .collect();
        names.sort();
        names
    }

    /// Generators for the bundled contract set.
    pub fn stock() -> Self {
        let mut r = Self::empty();
        let zero = U256::ZERO;

        // Demo set
        r.register_constructor("Greeter", |_, _| vec![string("Hello Rome")]);
        r.register_fn("Greeter", "setGreeting", zero, |_, _| {
            vec![string(&format!("Hello {}", rand_u64(1, 9999)))]
        });
        r.register_fn("Counter", "increment", zero, |_, _| vec![]);
        r.register_fn("SimpleStorage", "set", zero, |_, _| {
            vec![uint(U256::from(rand_u64(1, 1_000_000)))]
        });
        r.register_fn("Faucet", "drip", zero, |_, _| vec![]);
        r.register_fn("YesNoVote", "vote", zero, |_, _| {
            vec![DynSolValue::Bool(rand::thread_rng().gen())]
        });
        r.register_fn("Registry", "setRecord", zero, |_, _| {
            vec![string("key"), string("value")]
        });
        r.register_fn("TimeNote", "setNote", zero, |_, _| {
            vec![string(&format!("note {}", rand_u64(1, 9999)))]
        });
        r.register_fn("Pinger", "ping", zero, |_, _| vec![]);

        // Voting
        r.register_fn("Voting", "createProposal", zero, |ctx, _| {
            vec![string(&format!("Proposal #{}", ctx.round + 1))]
        });
        r.register_fn("Voting", "vote", zero, |_, _| {
            vec![uint(U256::ZERO), DynSolValue::Bool(rand::thread_rng().gen())]
        });

        // ERC20 (both `mint(uint256)` and `mint(address,uint256)` shapes)
        r.register_fn("SimpleToken", "transfer", zero, |_, _| {
            vec![address(random_address()), uint(ether("0.001"))]
        });
        r.register_fn("SimpleToken", "mint", zero, |ctx, inputs| {
            if inputs.len() == 2 {
                vec![address(ctx.caller), uint(ether("0.001"))]
            } else {
                vec![uint(ether("0.001"))]
            }
        });

        // ERC721 (`mint()` and `mint(address)` shapes)
        r.register_fn("SimpleNFT", "mint", zero, |ctx, inputs| {
            if inputs.is_empty() {
                vec![]
            } else {
                vec![address(ctx.caller)]
            }
        });
        r.register_fn("SimpleNFT", "transferFrom", zero, |ctx, _| {
            vec![
                address(ctx.caller),
                address(random_address()),
                uint(U256::from(ctx.round)),
            ]
        });

        // Auction
        r.register_constructor("SimpleAuction", |_, _| vec![uint(U256::from(3600u64))]);
        r.register_fn("SimpleAuction", "bid", ether("0.0001"), |_, _| vec![]);
        r.register_fn("SimpleAuction", "withdraw", zero, |_, _| vec![]);
        r.register_fn("SimpleAuction", "endAuction", zero, |_, _| vec![]);

        // MultiSig
        r.register_constructor("MultiSigWallet", |ctx, _| {
            vec![
                DynSolValue::Array(vec![address(ctx.caller)]),
                uint(U256::from(1u64)),
            ]
        });
        r.register_fn("MultiSigWallet", "submitTransaction", zero, |ctx, _| {
            vec![
                address(ctx.caller),
                uint(U256::ZERO),
                DynSolValue::Bytes(Vec::new()),
            ]
        });
        r.register_fn("MultiSigWallet", "confirmTransaction", zero, |ctx, _| {
            vec![uint(U256::from(ctx.round))]
        });
        r.register_fn("MultiSigWallet", "executeTransaction", zero, |ctx, _| {
            vec![uint(U256::from(ctx.round))]
        });

        // Lottery (ticket price is 0.01)
        r.register_fn("Lottery", "enterLottery", ether("0.01"), |_, _| vec![]);
        r.register_fn("Lottery", "pickWinner", zero, |_, _| vec![]);

        // Staking
        r.register_fn("StakingContract", "stake", ether("0.0001"), |_, _| vec![]);
        r.register_fn("StakingContract", "unstake", zero, |_, _| {
            vec![uint(ether("0.00005"))]
        });
        r.register_fn("StakingContract", "claimReward", zero, |_, _| vec![]);

        // Marketplace
        r.register_fn("NFTMarketplace", "listItem", zero, |ctx, _| {
            vec![
                address(ctx.contract),
                uint(U256::from(ctx.round)),
                uint(ether("0.001")),
            ]
        });
        r.register_fn("NFTMarketplace", "buyItem", ether("0.001"), |_, _| {
            vec![uint(U256::ZERO)]
        });
        r.register_fn("NFTMarketplace", "cancelListing", zero, |_, _| {
            vec![uint(U256::ZERO)]
        });

        // Escrow
        r.register_fn("Escrow", "createTrade", ether("0.0001"), |ctx, _| {
            vec![
                address(random_address()),
                address(ctx.caller),
                string(&format!("Trade #{}", ctx.round + 1)),
            ]
        });
        for function in ["releaseFunds", "refundBuyer", "disputeTrade"] {
            r.register_fn("Escrow", function, zero, |_, _| vec![uint(U256::ZERO)]);
        }

        // Governance
        r.register_constructor("GovernanceToken", |_, _| {
            vec![uint(U256::from(1_000_000u64))]
        });
        r.register_fn("GovernanceToken", "transfer", zero, |_, _| {
            vec![address(random_address()), uint(ether("1"))]
        });
        r.register_fn("GovernanceToken", "createProposal", zero, |ctx, _| {
            vec![string(&format!("Governance proposal #{}", ctx.round + 1))]
        });
        r.register_fn("GovernanceToken", "vote", zero, |_, _| {
            vec![uint(U256::ZERO), DynSolValue::Bool(true)]
        });
        r.register_fn("GovernanceToken", "executeProposal", zero, |_, _| {
            vec![uint(U256::ZERO)]
        });

        r
    }
}

fn string(s: &str) -> DynSolValue {
    DynSolValue::String(s.to_string())
}

fn uint(v: U256) -> DynSolValue {
    DynSolValue::Uint(v, 256)
}

fn address(a: Address) -> DynSolValue {
    DynSolValue::Address(a)
}

fn ether(amount: &str) -> U256 {
    parse_ether(amount).unwrap_or_default()
}

fn rand_u64(lo: u64, hi: u64) -> u64 {
    rand::thread_rng().gen_range(lo..=hi)
}

/// A random, syntactically valid recipient.
pub fn random_address() -> Address {
    let bytes: [u8; 20] = rand::thread_rng().gen();
    Address::from(bytes)
}

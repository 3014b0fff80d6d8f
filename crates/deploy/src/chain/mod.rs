//! The seam between the orchestrator and the network.
//!
//! The engine only submits transactions and waits for them through [`ChainClient`].
//! [`RpcChainClient`] talks JSON-RPC to a node with unlocked accounts, and
//! [`MemoryChainClient`] simulates a chain in-process for dry runs and tests.

mod memory;
mod rpc_client;

pub use memory::{MemoryChainClient, SubmittedCall};
pub use rpc_client::{DEFAULT_POLL_INTERVAL, RpcChainClient};

use std::future::Future;
use std::time::Duration;

use alloy_core::primitives::{Address, TxHash};
use anyhow::Result;
use serde_json::Value;

/// Final state of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Confirmation {
    /// Mined successfully. Contract creations carry the address from the receipt.
    Confirmed { contract_address: Option<Address> },
    TimedOut,
    Reverted,
}

/// Submits transactions on behalf of a sender and waits for their confirmation.
///
/// Arguments arrive fully resolved: unit references are already addresses.
pub trait ChainClient {
    /// Submit a contract creation. Returns the address the contract is expected
    /// to live at and the transaction hash. The receipt has the final say.
    fn deploy_contract(
        &self,
        contract_name: &str,
        args: &[Value],
        sender: Address,
    ) -> impl Future<Output = Result<(Address, TxHash)>> + Send;

    /// Submit a method call on `address`, which is an instance of `contract_name`.
    fn call_method(
        &self,
        address: Address,
        contract_name: &str,
        method: &str,
        args: &[Value],
        sender: Address,
    ) -> impl Future<Output = Result<TxHash>> + Send;

    /// Wait until the transaction is mined or `timeout` expires.
    fn await_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> impl Future<Output = Result<Confirmation>> + Send;

    /// Accounts the client can send from, in the node's order.
    fn accounts(&self) -> impl Future<Output = Result<Vec<Address>>> + Send;
}

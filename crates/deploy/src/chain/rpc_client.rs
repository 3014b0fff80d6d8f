use std::time::{Duration, Instant};

use alloy_core::primitives::{Address, Bytes, TxHash, U64};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use super::{ChainClient, Confirmation};
use crate::rpc::{DEFAULT_REQUEST_TIMEOUT, RpcTransport};
use crate::store::{ContractInterface, InterfaceCatalog};

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// The subset of a transaction receipt the client looks at.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    /// `0x1` on success, `0x0` on revert. Absent on pre-Byzantium chains.
    status: Option<U64>,
    contract_address: Option<Address>,
}

impl Receipt {
    fn confirmation(&self) -> Confirmation {
        if self.status.is_some_and(|s| s.is_zero()) {
            Confirmation::Reverted
        } else {
            Confirmation::Confirmed {
                contract_address: self.contract_address,
            }
        }
    }
}

/// JSON-RPC chain client for nodes that manage their own accounts
/// (Hardhat node, Anvil, a Geth dev node).
///
/// Transactions are submitted with `eth_sendTransaction` and signed by the node.
/// ABI encoding uses the contract interfaces the client was built with.
#[derive(Debug)]
pub struct RpcChainClient {
    transport: RpcTransport,
    interfaces: InterfaceCatalog,
    poll_interval: Duration,
    gas_limit: Option<u64>,
}

impl RpcChainClient {
    pub fn new(url: Url, interfaces: InterfaceCatalog) -> Result<Self> {
        Ok(Self {
            transport: RpcTransport::new(url, DEFAULT_REQUEST_TIMEOUT)?,
            interfaces,
            poll_interval: DEFAULT_POLL_INTERVAL,
            gas_limit: None,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Use a fixed gas limit instead of letting the node estimate it.
    pub fn with_gas_limit(mut self, gas_limit: Option<u64>) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Chain ID reported by the node.
    pub async fn chain_id(&self) -> Result<u64> {
        let chain_id: U64 = self.transport.call("eth_chainId", vec![]).await?;
        Ok(chain_id.to::<u64>())
    }

    fn interface(&self, contract_name: &str) -> Result<&ContractInterface> {
        self.interfaces.get(contract_name).with_context(|| {
            format!(
                "No compiled artifact for contract {} (is the artifacts directory up to date?)",
                contract_name
            )
        })
    }

    async fn send_transaction(&self, sender: Address, to: Option<Address>, data: Bytes) -> Result<TxHash> {
        let mut tx = json!({
            "from": sender,
            "data": data,
        });
        if let Some(to) = to {
            tx["to"] = json!(to);
        }
        if let Some(gas) = self.gas_limit {
            tx["gas"] = json!(format!("0x{:x}", gas));
        }

        self.transport
            .call("eth_sendTransaction", vec![tx])
            .await
            .context("Failed to send transaction")
    }
}

impl ChainClient for RpcChainClient {
    async fn deploy_contract(
        &self,
        contract_name: &str,
        args: &[Value],
        sender: Address,
    ) -> Result<(Address, TxHash)> {
        let data = self.interface(contract_name)?.encode_deploy(args)?;

        // CREATE addresses depend only on the sender and its nonce.
        let nonce: U64 = self
            .transport
            .call("eth_getTransactionCount", vec![json!(sender), json!("pending")])
            .await
            .context("Failed to fetch sender nonce")?;
        let address = sender.create(nonce.to::<u64>());

        let tx_hash = self.send_transaction(sender, None, data).await?;
        tracing::debug!(contract = %contract_name, %address, %tx_hash, "Deployment submitted");
        Ok((address, tx_hash))
    }

    async fn call_method(
        &self,
        address: Address,
        contract_name: &str,
        method: &str,
        args: &[Value],
        sender: Address,
    ) -> Result<TxHash> {
        let data = self.interface(contract_name)?.encode_call(method, args)?;
        let tx_hash = self.send_transaction(sender, Some(address), data).await?;
        tracing::debug!(contract = %contract_name, method, %address, %tx_hash, "Call submitted");
        Ok(tx_hash)
    }

    async fn await_confirmation(&self, tx_hash: TxHash, timeout: Duration) -> Result<Confirmation> {
        let start = Instant::now();

        loop {
            let receipt: Option<Receipt> = self
                .transport
                .call("eth_getTransactionReceipt", vec![json!(tx_hash)])
                .await
                .context("Failed to fetch transaction receipt")?;

            if let Some(receipt) = receipt {
                let confirmation = receipt.confirmation();
                tracing::trace!(%tx_hash, %confirmation, contract_address = ?receipt.contract_address, "Receipt received");
                return Ok(confirmation);
            }

            if start.elapsed() + self.poll_interval > timeout {
                return Ok(Confirmation::TimedOut);
            }

            tracing::trace!(%tx_hash, "Transaction pending, polling again...");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn accounts(&self) -> Result<Vec<Address>> {
        self.transport
            .call("eth_accounts", vec![])
            .await
            .context("Failed to list node accounts")
    }
}

use alloy_core::primitives::{Address, TxHash};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// What produced a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordKind {
    /// A contract deployment. `address` is the deployed instance.
    #[default]
    Deploy,
    /// A tracked method call. `address` is the call target.
    Call,
}

/// Persisted result of a unit, keyed by `(unit_name, network)`.
///
/// Records are only written after the chain client reports confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub unit_name: String,
    /// Interface name of the deployed (or called) contract.
    pub contract_name: String,
    #[serde(default)]
    pub kind: RecordKind,
    pub address: Address,
    /// Resolved arguments, with every symbolic reference substituted.
    pub args: Vec<Value>,
    /// SHA-256 of the resolved arguments, see [`DeploymentRecord::hash_args`].
    pub args_hash: String,
    pub network: String,
    pub transaction_hash: TxHash,
    /// Unix timestamp of the confirmation.
    pub recorded_at: i64,
}

impl DeploymentRecord {
    pub fn new(
        kind: RecordKind,
        unit_name: impl Into<String>,
        contract_name: impl Into<String>,
        network: impl Into<String>,
        address: Address,
        transaction_hash: TxHash,
        args: Vec<Value>,
    ) -> Self {
        Self {
            unit_name: unit_name.into(),
            contract_name: contract_name.into(),
            kind,
            address,
            args_hash: Self::hash_args(&args),
            args,
            network: network.into(),
            transaction_hash,
            recorded_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Deterministic hex SHA-256 of the JSON-serialized arguments.
    pub fn hash_args(args: &[Value]) -> String {
        // Serializing a slice of `Value` cannot fail.
        let json = serde_json::to_string(args).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether `args` differ from the arguments this record was created with.
    pub fn args_changed(&self, args: &[Value]) -> bool {
        Self::hash_args(args) != self.args_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_determinism() {
        let args = vec![json!("0x0000000000000000000000000000000000000001"), json!(42)];
        let hash1 = DeploymentRecord::hash_args(&args);
        let hash2 = DeploymentRecord::hash_args(&args);

        assert_eq!(hash1, hash2, "Hash should be deterministic");
        assert_eq!(hash1.len(), 64, "SHA-256 hash should be 64 hex characters");
    }

    #[test]
    fn test_args_changed() {
        let record = DeploymentRecord::new(
            RecordKind::Deploy,
            "Staking",
            "Staking",
            "localhost",
            Address::repeat_byte(0x11),
            TxHash::repeat_byte(0x22),
            vec![json!("0x1111111111111111111111111111111111111111")],
        );

        assert!(!record.args_changed(&[json!("0x1111111111111111111111111111111111111111")]));
        assert!(record.args_changed(&[json!("0x2222222222222222222222222222222222222222")]));
        assert!(record.args_changed(&[]));
    }

    #[test]
    fn test_kind_defaults_to_deploy_when_missing() {
        let json = json!({
            "unit_name": "Controller",
            "contract_name": "Controller",
            "address": "0x1111111111111111111111111111111111111111",
            "args": [],
            "args_hash": DeploymentRecord::hash_args(&[]),
            "network": "localhost",
            "transaction_hash": format!("0x{}", "22".repeat(32)),
            "recorded_at": 1654560000
        });

        let record: DeploymentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.kind, RecordKind::Deploy);
        assert_eq!(record.address, Address::repeat_byte(0x11));
    }
}

use ciborium::value::Value;
use config::Network;

pub const CLAIM_TTL_SECS: u64 = 3600;
pub const CHUNK_DELAY_MS: u64 = 100;
pub const ERROR_RETRY_DELAY_SECS: u64 = 5;
pub const CACHE_SWEEP_INTERVAL_SECS: u64 = 300;

/// A single inscription as reported by the upstream provider. Materialized
/// on demand, never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct InscriptionRecord {
    pub inscription_id: String,
    pub inscription_number: u64,
    pub content_type: String,
    pub sat: Option<u64>,
}

/// The by-id projection used for resource ID derivation.
#[derive(Clone, Debug, PartialEq)]
pub struct InscriptionDetails {
    pub inscription_id: String,
    pub sat: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityKind {
    DidDocument,
    VerifiableCredential,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::DidDocument => "did-document",
            IdentityKind::VerifiableCredential => "verifiable-credential",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IdentityResource {
    pub resource_id: String,
    pub inscription_id: String,
    pub inscription_number: u64,
    pub identity_kind: IdentityKind,
    pub content_type: String,
    pub metadata: Value,
    pub indexed_at: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NonIdentityResource {
    pub resource_id: String,
    pub inscription_id: String,
    pub inscription_number: u64,
    pub content_type: String,
    pub indexed_at: u64,
}

/// A contiguous, non-overlapping interval of inscription numbers reserved by
/// exactly one worker. The interval end serializes as `endInscription`
/// because `end` is a reserved word in the Lua claim script.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchClaim {
    pub start: u64,
    pub end_inscription: u64,
    pub worker_id: String,
    pub claimed_at: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ErrorRecord {
    pub inscription_id: String,
    pub inscription_number: u64,
    pub error: String,
    pub timestamp: u64,
    pub worker_id: String,
}

/// Composes the network-qualified resource identifier for an inscription at
/// `index` within the ordered inscription list of `sat`.
pub fn build_resource_id(network: &Network, sat: u64, index: usize) -> String {
    match network.did_tag() {
        Some(tag) => format!("did:btco:{tag}:{sat}/{index}"),
        None => format!("did:btco:{sat}/{index}"),
    }
}

/// Recovers the network label from a derived resource identifier.
pub fn network_label_of_resource_id(resource_id: &str) -> &'static str {
    if resource_id.starts_with("did:btco:sig:") {
        "signet"
    } else if resource_id.starts_with("did:btco:test:") {
        "testnet"
    } else {
        "mainnet"
    }
}

/// Statistics bucket for a MIME content type: the top-level segment
/// (`image`, `text`, ...), or `unknown` when there is none.
pub fn content_type_bucket(content_type: &str) -> &str {
    match content_type.split('/').next() {
        Some(prefix) if !prefix.is_empty() => prefix,
        _ => "unknown",
    }
}

#[cfg(test)]
mod test {
    use config::Network;
    use test_case::test_case;

    use super::*;

    #[test_case(Network::Mainnet, 1000, 0 => "did:btco:1000/0"; "mainnet carries no tag")]
    #[test_case(Network::Signet, 42, 2 => "did:btco:sig:42/2"; "signet tag")]
    #[test_case(Network::Testnet, 7, 1 => "did:btco:test:7/1"; "testnet tag")]
    fn composes_resource_ids(network: Network, sat: u64, index: usize) -> String {
        build_resource_id(&network, sat, index)
    }

    #[test_case("did:btco:1000/0" => "mainnet")]
    #[test_case("did:btco:sig:42/2" => "signet")]
    #[test_case("did:btco:test:7/1" => "testnet")]
    fn extracts_network_labels(resource_id: &str) -> &'static str {
        network_label_of_resource_id(resource_id)
    }

    #[test_case("image/png" => "image")]
    #[test_case("text/plain;charset=utf-8" => "text")]
    #[test_case("unknown" => "unknown")]
    #[test_case("" => "unknown")]
    fn buckets_content_types(content_type: &str) -> &str {
        content_type_bucket(content_type)
    }

    #[test]
    fn claim_serializes_with_wire_field_names() {
        let claim = BatchClaim {
            start: 1,
            end_inscription: 100,
            worker_id: "worker-1".to_string(),
            claimed_at: 1_700_000_000_000,
        };
        let value = serde_json::to_value(&claim).unwrap();
        assert_eq!(value["start"], 1);
        assert_eq!(value["endInscription"], 100);
        assert_eq!(value["workerId"], "worker-1");
        assert_eq!(value["claimedAt"], 1_700_000_000_000u64);

        let decoded: BatchClaim = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, claim);
    }
}

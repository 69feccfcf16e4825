use ciborium::value::Value;

use crate::metadata::map_get;
use crate::types::IdentityKind;

const DID_PREFIX: &str = "did:btco:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    Identity(IdentityKind),
    NonIdentity,
}

/// Classifies inscription metadata by structural shape. Purely syntactic:
/// the first matching rule wins and no I/O is performed.
pub fn classify(metadata: Option<&Value>) -> Classification {
    let Some(metadata) = metadata else {
        return Classification::NonIdentity;
    };
    if is_did_document(metadata) {
        return Classification::Identity(IdentityKind::DidDocument);
    }
    if is_verifiable_credential(metadata) {
        return Classification::Identity(IdentityKind::VerifiableCredential);
    }
    Classification::NonIdentity
}

fn is_did_document(metadata: &Value) -> bool {
    let id_is_btco_did = matches!(
        map_get(metadata, "id"),
        Some(Value::Text(id)) if id.starts_with(DID_PREFIX)
    );
    if !id_is_btco_did {
        return false;
    }
    match map_get(metadata, "verificationMethod") {
        Some(Value::Array(methods)) => !methods.is_empty(),
        _ => false,
    }
}

fn is_verifiable_credential(metadata: &Value) -> bool {
    let has_credential_type = matches!(
        map_get(metadata, "type"),
        Some(Value::Array(types)) if types
            .iter()
            .any(|t| matches!(t, Value::Text(s) if s == "VerifiableCredential"))
    );
    has_credential_type || map_get(metadata, "credentialSubject").is_some()
}

#[cfg(test)]
mod test {
    use ciborium::value::Value;
    use serde_json::json;

    use super::*;
    use crate::metadata::json_to_cbor;
    use crate::types::IdentityKind;

    #[test]
    fn recognizes_did_documents() {
        let metadata = json_to_cbor(&json!({
            "id": "did:btco:1000",
            "verificationMethod": [{"type": "Multikey"}]
        }));
        assert_eq!(
            classify(Some(&metadata)),
            Classification::Identity(IdentityKind::DidDocument)
        );
    }

    #[test]
    fn did_document_requires_verification_methods() {
        let missing = json_to_cbor(&json!({"id": "did:btco:1000"}));
        assert_eq!(classify(Some(&missing)), Classification::NonIdentity);

        let empty = json_to_cbor(&json!({
            "id": "did:btco:1000",
            "verificationMethod": []
        }));
        assert_eq!(classify(Some(&empty)), Classification::NonIdentity);
    }

    #[test]
    fn did_document_requires_btco_prefix() {
        let metadata = json_to_cbor(&json!({
            "id": "did:web:example.com",
            "verificationMethod": [{"type": "Multikey"}]
        }));
        assert_eq!(classify(Some(&metadata)), Classification::NonIdentity);
    }

    #[test]
    fn recognizes_credentials_by_type_array() {
        let metadata = json_to_cbor(&json!({
            "type": ["VerifiableCredential", "ExampleCredential"]
        }));
        assert_eq!(
            classify(Some(&metadata)),
            Classification::Identity(IdentityKind::VerifiableCredential)
        );
    }

    #[test]
    fn recognizes_credentials_by_subject() {
        let metadata = json_to_cbor(&json!({
            "credentialSubject": {"id": "did:btco:42"}
        }));
        assert_eq!(
            classify(Some(&metadata)),
            Classification::Identity(IdentityKind::VerifiableCredential)
        );
    }

    #[test]
    fn did_document_shape_wins_over_credential_shape() {
        let metadata = json_to_cbor(&json!({
            "id": "did:btco:1000",
            "verificationMethod": [{"type": "Multikey"}],
            "type": ["VerifiableCredential"],
            "credentialSubject": {}
        }));
        assert_eq!(
            classify(Some(&metadata)),
            Classification::Identity(IdentityKind::DidDocument)
        );
    }

    #[test]
    fn non_mappings_are_non_identity() {
        assert_eq!(classify(None), Classification::NonIdentity);
        assert_eq!(
            classify(Some(&Value::Text("plain".to_string()))),
            Classification::NonIdentity
        );
        assert_eq!(
            classify(Some(&Value::Array(vec![]))),
            Classification::NonIdentity
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let metadata = json_to_cbor(&json!({
            "type": ["VerifiableCredential"]
        }));
        let first = classify(Some(&metadata));
        assert_eq!(classify(Some(&metadata)), first);
    }
}

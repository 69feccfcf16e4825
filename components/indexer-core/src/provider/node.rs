use ciborium::value::Value;

use super::{decode_response, ProviderError, SatInfo};
use crate::metadata::decode_cbor;
use crate::types::{InscriptionDetails, InscriptionRecord};

#[derive(Clone, Debug, Deserialize)]
struct NodeInscriptionResponse {
    id: String,
    number: Option<u64>,
    content_type: Option<String>,
    sat: Option<u64>,
}

/// Client for an ord-style node exposing the JSON HTTP API. Inscription and
/// sat lookups go through the regular endpoints; metadata comes from the
/// recursive endpoint as a hex-encoded CBOR blob.
#[derive(Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    endpoint: String,
}

impl NodeClient {
    pub fn new(http: reqwest::Client, endpoint: &str) -> NodeClient {
        NodeClient {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.endpoint, path);
        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("request to {url} failed: {e}")))?;
        decode_response(response, &url).await
    }

    pub async fn inscription_by_number(
        &self,
        number: u64,
    ) -> Result<InscriptionRecord, ProviderError> {
        let data: NodeInscriptionResponse = self.get_json(&format!("/inscription/{number}")).await?;
        Ok(InscriptionRecord {
            inscription_id: data.id,
            inscription_number: data.number.unwrap_or(number),
            content_type: data.content_type.unwrap_or_else(|| "unknown".to_string()),
            sat: data.sat,
        })
    }

    pub async fn inscription_by_id(
        &self,
        inscription_id: &str,
    ) -> Result<InscriptionDetails, ProviderError> {
        let data: NodeInscriptionResponse =
            self.get_json(&format!("/inscription/{inscription_id}")).await?;
        Ok(InscriptionDetails {
            inscription_id: data.id,
            sat: data.sat,
        })
    }

    pub async fn sat_info(&self, sat: u64) -> Result<SatInfo, ProviderError> {
        self.get_json(&format!("/sat/{sat}")).await
    }

    pub async fn metadata(&self, inscription_id: &str) -> Result<Option<Value>, ProviderError> {
        let hex_payload: String = match self
            .get_json(&format!("/r/metadata/{inscription_id}"))
            .await
        {
            Ok(payload) => payload,
            Err(ProviderError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        if hex_payload.is_empty() {
            return Ok(None);
        }
        let bytes = hex::decode(&hex_payload).map_err(|e| {
            ProviderError::Transport(format!(
                "metadata for {inscription_id} is not valid hex: {e}"
            ))
        })?;
        decode_cbor(&bytes).map(Some).map_err(ProviderError::Transport)
    }
}

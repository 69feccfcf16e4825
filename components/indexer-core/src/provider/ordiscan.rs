use ciborium::value::Value;

use super::{decode_response, ProviderError, SatInfo};
use crate::metadata::json_to_cbor;
use crate::types::{InscriptionDetails, InscriptionRecord};

#[derive(Clone, Debug, Deserialize)]
struct OrdiscanEnvelope<T> {
    data: T,
}

#[derive(Clone, Debug, Deserialize)]
struct OrdiscanInscription {
    inscription_id: String,
    inscription_number: Option<u64>,
    content_type: Option<String>,
    sat: Option<u64>,
    metadata: Option<serde_json::Value>,
}

/// Client for the hosted Ordiscan API. Responses arrive under a `data`
/// envelope; metadata is already-decoded JSON and gets transcoded into the
/// CBOR value tree the classifier expects.
#[derive(Clone)]
pub struct OrdiscanClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OrdiscanClient {
    pub fn new(http: reqwest::Client, endpoint: &str, api_key: String) -> OrdiscanClient {
        OrdiscanClient {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.endpoint, path);
        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("request to {url} failed: {e}")))?;
        decode_response(response, &url).await
    }

    async fn fetch_inscription(&self, reference: &str) -> Result<OrdiscanInscription, ProviderError> {
        let envelope: OrdiscanEnvelope<OrdiscanInscription> = self
            .get_json(&format!("/v1/inscription/{reference}"))
            .await?;
        Ok(envelope.data)
    }

    pub async fn inscription_by_number(
        &self,
        number: u64,
    ) -> Result<InscriptionRecord, ProviderError> {
        let data = self.fetch_inscription(&number.to_string()).await?;
        Ok(InscriptionRecord {
            inscription_id: data.inscription_id,
            inscription_number: data.inscription_number.unwrap_or(number),
            content_type: data.content_type.unwrap_or_else(|| "unknown".to_string()),
            sat: data.sat,
        })
    }

    pub async fn inscription_by_id(
        &self,
        inscription_id: &str,
    ) -> Result<InscriptionDetails, ProviderError> {
        let data = self.fetch_inscription(inscription_id).await?;
        Ok(InscriptionDetails {
            inscription_id: data.inscription_id,
            sat: data.sat,
        })
    }

    pub async fn sat_info(&self, sat: u64) -> Result<SatInfo, ProviderError> {
        let envelope: OrdiscanEnvelope<SatInfo> = self.get_json(&format!("/v1/sat/{sat}")).await?;
        Ok(envelope.data)
    }

    pub async fn metadata(&self, inscription_id: &str) -> Result<Option<Value>, ProviderError> {
        let data = match self.fetch_inscription(inscription_id).await {
            Ok(data) => data,
            Err(ProviderError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        match data.metadata {
            Some(serde_json::Value::Null) | None => Ok(None),
            Some(metadata) => Ok(Some(json_to_cbor(&metadata))),
        }
    }
}

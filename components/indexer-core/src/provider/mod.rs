pub mod node;
pub mod ordiscan;

use std::fmt;
use std::time::Duration;

use ciborium::value::Value;
use config::{ProviderConfig, ProviderType};

use self::node::NodeClient;
use self::ordiscan::OrdiscanClient;
use crate::types::{InscriptionDetails, InscriptionRecord};

/// Failures the back-off logic must tell apart: `NotFound` means the
/// upstream reports the inscription as absent (it is information, not an
/// error), everything else is a transport problem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderError {
    NotFound,
    Transport(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::NotFound => write!(f, "not found upstream"),
            ProviderError::Transport(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SatInfo {
    #[serde(alias = "inscriptions")]
    pub inscription_ids: Vec<String>,
}

/// Typed client over the upstream inscription provider. The concrete
/// transport (a local ord-style node or the hosted Ordiscan API) is chosen
/// at configuration time.
#[derive(Clone)]
pub enum ProviderClient {
    Node(NodeClient),
    Ordiscan(OrdiscanClient),
}

impl ProviderClient {
    pub fn from_config(config: &ProviderConfig) -> Result<ProviderClient, String> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| format!("unable to build http client: {e}"))?;
        match config.provider_type {
            ProviderType::Node => Ok(ProviderClient::Node(NodeClient::new(
                http,
                &config.endpoint,
            ))),
            ProviderType::Api => {
                let api_key = config
                    .api_key
                    .clone()
                    .ok_or("api provider requires an api key".to_string())?;
                Ok(ProviderClient::Ordiscan(OrdiscanClient::new(
                    http,
                    &config.endpoint,
                    api_key,
                )))
            }
        }
    }

    pub async fn inscription_by_number(
        &self,
        number: u64,
    ) -> Result<InscriptionRecord, ProviderError> {
        match self {
            ProviderClient::Node(client) => client.inscription_by_number(number).await,
            ProviderClient::Ordiscan(client) => client.inscription_by_number(number).await,
        }
    }

    pub async fn inscription_by_id(
        &self,
        inscription_id: &str,
    ) -> Result<InscriptionDetails, ProviderError> {
        match self {
            ProviderClient::Node(client) => client.inscription_by_id(inscription_id).await,
            ProviderClient::Ordiscan(client) => client.inscription_by_id(inscription_id).await,
        }
    }

    pub async fn sat_info(&self, sat: u64) -> Result<SatInfo, ProviderError> {
        match self {
            ProviderClient::Node(client) => client.sat_info(sat).await,
            ProviderClient::Ordiscan(client) => client.sat_info(sat).await,
        }
    }

    pub async fn metadata(&self, inscription_id: &str) -> Result<Option<Value>, ProviderError> {
        match self {
            ProviderClient::Node(client) => client.metadata(inscription_id).await,
            ProviderClient::Ordiscan(client) => client.metadata(inscription_id).await,
        }
    }
}

pub(crate) async fn decode_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    url: &str,
) -> Result<T, ProviderError> {
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound);
    }
    if !response.status().is_success() {
        return Err(ProviderError::Transport(format!(
            "{url} answered with status {}",
            response.status()
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Transport(format!("unable to decode response from {url}: {e}")))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sat_info_accepts_both_field_spellings() {
        let canonical: SatInfo =
            serde_json::from_str(r#"{"inscription_ids": ["abcdi0"]}"#).unwrap();
        assert_eq!(canonical.inscription_ids, vec!["abcdi0".to_string()]);

        let node_style: SatInfo = serde_json::from_str(r#"{"inscriptions": ["abcdi0"]}"#).unwrap();
        assert_eq!(node_style.inscription_ids, vec!["abcdi0".to_string()]);
    }
}

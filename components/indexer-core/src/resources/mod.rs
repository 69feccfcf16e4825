use std::sync::Arc;

use config::Network;

use crate::cache::InscriptionCache;
use crate::provider::{ProviderClient, ProviderError};
use crate::try_warn;
use crate::types::build_resource_id;
use crate::utils::Context;

/// Derives the network-qualified `did:btco` resource identifier of an
/// inscription from the satoshi it rides and its position within that
/// sat's ordered inscription list. Lookups go through the two-level cache
/// before hitting the provider.
#[derive(Clone)]
pub struct ResourceIdDeriver {
    provider: ProviderClient,
    cache: Arc<InscriptionCache>,
    network: Network,
    ctx: Context,
}

impl ResourceIdDeriver {
    pub fn new(
        provider: ProviderClient,
        cache: Arc<InscriptionCache>,
        network: Network,
        ctx: &Context,
    ) -> ResourceIdDeriver {
        ResourceIdDeriver {
            provider,
            cache,
            network,
            ctx: ctx.clone(),
        }
    }

    pub async fn derive(&self, inscription_id: &str) -> Result<String, String> {
        let details = match self.cache.details_for(inscription_id) {
            Some(details) => details,
            None => {
                let details = self
                    .provider
                    .inscription_by_id(inscription_id)
                    .await
                    .map_err(|e| match e {
                        ProviderError::NotFound => {
                            format!("inscription {inscription_id} not found upstream")
                        }
                        e => format!("unable to fetch inscription {inscription_id}: {e}"),
                    })?;
                self.cache.put_details(details.clone());
                details
            }
        };
        let sat = details
            .sat
            .ok_or(format!("inscription {inscription_id} has no sat attribution"))?;

        let inscription_ids = match self.cache.inscriptions_on_sat(sat) {
            Some(inscription_ids) => inscription_ids,
            None => {
                let info = self
                    .provider
                    .sat_info(sat)
                    .await
                    .map_err(|e| format!("unable to fetch sat {sat}: {e}"))?;
                self.cache
                    .put_sat_inscriptions(sat, info.inscription_ids.clone());
                info.inscription_ids
            }
        };
        if inscription_ids.is_empty() {
            return Err(format!("sat {sat} reports no inscriptions"));
        }
        let index = match inscription_ids.iter().position(|id| id == inscription_id) {
            Some(index) => index,
            None => {
                try_warn!(
                    self.ctx,
                    "Inscription {inscription_id} missing from sat {sat} listing, defaulting to index 0"
                );
                0
            }
        };
        Ok(build_resource_id(&self.network, sat, index))
    }
}

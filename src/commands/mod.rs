pub mod aggregate;
pub mod clean;
pub mod poll_metadata;
pub mod poll_states;
pub mod run;

pub use aggregate::handle_aggregate;
pub use clean::handle_clean;
pub use poll_metadata::handle_poll_metadata;
pub use poll_states::handle_poll_states;
pub use run::handle_run;

use anyhow::{Context, Result};
use std::sync::Arc;

use flightlink::airlabs_client::AirLabsClient;
use flightlink::config::PipelineConfig;
use flightlink::feed::{MetadataSource, StateVectorSource};
use flightlink::opensky_client::OpenSkyClient;

pub(crate) fn opensky_source(config: &PipelineConfig) -> Result<Arc<dyn StateVectorSource>> {
    let client = OpenSkyClient::new(&config.opensky, config.retry.policy())
        .context("Failed to build OpenSky HTTP client")?;
    Ok(Arc::new(client))
}

pub(crate) fn airlabs_source(config: &PipelineConfig) -> Result<Arc<dyn MetadataSource>> {
    let client = AirLabsClient::new(&config.airlabs, config.retry.policy())
        .context("Failed to build AirLabs HTTP client")?;
    Ok(Arc::new(client))
}

use std::time::Instant;

use tracing::debug;

use crate::{
    config::IndexConfig,
    network::{self, NetworkData, RouteNetwork},
    spatial::SpatialIndex,
};

/// A route network together with the index built over it.
///
/// Snapshots are immutable and shared through an `Arc`. Replacing the
/// service's snapshot never disturbs a fix that is already being matched
/// against the previous one.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub network: RouteNetwork,
    pub index: SpatialIndex,
}

impl Snapshot {
    pub fn build(data: NetworkData, config: &IndexConfig) -> Result<Self, network::Error> {
        let now = Instant::now();
        let network = RouteNetwork::from_data(data)?;
        let snapshot = Self::from_network(network, config);
        debug!("Building snapshot took {:?}", now.elapsed());
        Ok(snapshot)
    }

    pub fn from_network(network: RouteNetwork, config: &IndexConfig) -> Self {
        let index = SpatialIndex::build(&network, config.cell_size);
        Self { network, index }
    }
}

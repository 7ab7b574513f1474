use crate::types::Address;

/// Parameters of the bootstrap validator seeded into a fresh chain.
#[derive(Clone, Debug)]
pub struct GenesisConfig {
    /// Address of the bootstrap validator. `None` means "this node", which
    /// is only useful for a single-node bootstrap.
    pub validator: Option<Address>,
    pub reputation: f64,
    pub energy_capacity: f64,
    pub energy_rate: f64,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            validator: None,
            reputation: 10.0,
            energy_capacity: 20.0,
            energy_rate: 1.0,
        }
    }
}

/// Consensus configuration parameters.
#[derive(Clone, Debug, Default)]
pub struct ConsensusConfig {
    pub genesis: GenesisConfig,
}

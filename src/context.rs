//! Everything a collection needs from the place it lives on.

use crate::config::DistConfig;
use crate::registry::DecoderRegistry;
use crate::team::{self, Place, Team};
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared handle to a place's team, decoder registry and configuration.
///
/// Cloning is cheap; every collection brought up on a place holds a clone.
#[derive(Clone)]
pub struct PlaceContext {
    team: Arc<dyn Team>,
    registry: Arc<DecoderRegistry>,
    config: Arc<DistConfig>,
    /// Serializes consumption of point-to-point posts on this place.
    delivery: Arc<Mutex<()>>,
}

impl std::fmt::Debug for PlaceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaceContext")
            .field("place", &self.place())
            .field("size", &self.size())
            .field("registry", &self.registry)
            .finish()
    }
}

impl PlaceContext {
    pub fn new(team: impl Team + 'static, config: DistConfig) -> Self {
        Self::from_shared(Arc::new(team), config)
    }

    pub fn from_shared(team: Arc<dyn Team>, config: DistConfig) -> Self {
        Self {
            team,
            registry: Arc::new(DecoderRegistry::new()),
            config: Arc::new(config),
            delivery: Arc::new(Mutex::new(())),
        }
    }

    /// Context with the default configuration.
    pub fn with_defaults(team: impl Team + 'static) -> Self {
        Self::new(team, DistConfig::default())
    }

    pub fn team(&self) -> &dyn Team {
        self.team.as_ref()
    }

    pub fn place(&self) -> Place {
        self.team.place()
    }

    pub fn size(&self) -> usize {
        self.team.size()
    }

    pub fn places(&self) -> impl Iterator<Item = Place> {
        team::places(self.team.as_ref())
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DistConfig {
        &self.config
    }

    pub(crate) fn delivery_lock(&self) -> &Mutex<()> {
        &self.delivery
    }
}

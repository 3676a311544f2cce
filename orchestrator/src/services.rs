use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use shared_event_bus::EventPublisher;

use derma_agents::{
    AgentServices, Clock, Crypto, Generator, HeuristicVisionSpecialist, IdSource,
    LocalTemplateGenerator, SpecialistKind, StdCrypto, SystemClock, UuidSource, VisionSpecialist,
};
use derma_audit::{AuditLedger, EventBusNotifier};
use derma_reasoning::{Embedder, HashingEmbedder, ReasoningBank};

use crate::config::OrchestratorConfig;

/// Explicit service wiring injected into every run. Owns the
/// reasoning-bank and ledger handles (shared, internally synchronised)
/// plus the capability bindings the router selects between.
pub struct ServiceRegistry {
    bank: Arc<ReasoningBank>,
    ledger: Arc<AuditLedger>,
    generator: Arc<dyn Generator>,
    fallback_generator: Arc<dyn Generator>,
    dermoscopy: Arc<dyn VisionSpecialist>,
    clinical: Arc<dyn VisionSpecialist>,
    embedder: Arc<dyn Embedder>,
    crypto: Arc<dyn Crypto>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdSource>,
}

impl ServiceRegistry {
    /// Starts a builder over the two mandatory shared resources.
    #[must_use]
    pub fn builder(bank: Arc<ReasoningBank>, ledger: Arc<AuditLedger>) -> ServiceRegistryBuilder {
        ServiceRegistryBuilder {
            bank,
            ledger,
            generator: None,
            fallback_generator: None,
            dermoscopy: None,
            clinical: None,
            embedder: None,
            crypto: None,
            clock: None,
            ids: None,
        }
    }

    /// Opens a registry over local stores under `data_dir`, with the
    /// event-bus notifier attached when a publisher is provided.
    pub fn local(
        data_dir: impl AsRef<Path>,
        config: &OrchestratorConfig,
        publisher: Option<Arc<dyn EventPublisher>>,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let bank = Arc::new(ReasoningBank::open(
            data_dir.join("reasoning"),
            Arc::new(HashingEmbedder::new(config.reasoning_bank_dimension)),
            config.bank_config(),
        )?);
        let mut ledger = AuditLedger::open(data_dir.join("audit.log"))?;
        if let Some(publisher) = publisher {
            ledger = ledger.with_notifier(Arc::new(EventBusNotifier::new(publisher)));
        }
        Ok(Self::builder(bank, Arc::new(ledger)).build())
    }

    /// Identifier source (run ids).
    #[must_use]
    pub fn ids(&self) -> Arc<dyn IdSource> {
        Arc::clone(&self.ids)
    }

    /// Crypto bindings (ephemeral key allocation).
    #[must_use]
    pub fn crypto(&self) -> Arc<dyn Crypto> {
        Arc::clone(&self.crypto)
    }

    /// Shared reasoning bank.
    #[must_use]
    pub fn bank(&self) -> Arc<ReasoningBank> {
        Arc::clone(&self.bank)
    }

    /// Shared audit ledger.
    #[must_use]
    pub fn ledger(&self) -> Arc<AuditLedger> {
        Arc::clone(&self.ledger)
    }

    /// Service bundle for one run, with the vision specialist the
    /// router's intent selected.
    #[must_use]
    pub fn agent_services(&self, specialist: SpecialistKind) -> AgentServices {
        let vision = match specialist {
            SpecialistKind::Dermoscopy => Arc::clone(&self.dermoscopy),
            SpecialistKind::ClinicalPhoto => Arc::clone(&self.clinical),
        };
        AgentServices {
            bank: Arc::clone(&self.bank),
            ledger: Arc::clone(&self.ledger),
            generator: Arc::clone(&self.generator),
            fallback_generator: Arc::clone(&self.fallback_generator),
            vision,
            embedder: Arc::clone(&self.embedder),
            crypto: Arc::clone(&self.crypto),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
        }
    }
}

/// Builder for [`ServiceRegistry`]. Unset capabilities fall back to the
/// local deterministic bindings.
pub struct ServiceRegistryBuilder {
    bank: Arc<ReasoningBank>,
    ledger: Arc<AuditLedger>,
    generator: Option<Arc<dyn Generator>>,
    fallback_generator: Option<Arc<dyn Generator>>,
    dermoscopy: Option<Arc<dyn VisionSpecialist>>,
    clinical: Option<Arc<dyn VisionSpecialist>>,
    embedder: Option<Arc<dyn Embedder>>,
    crypto: Option<Arc<dyn Crypto>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdSource>>,
}

impl ServiceRegistryBuilder {
    /// Overrides the primary generator.
    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Overrides the fallback generator.
    #[must_use]
    pub fn fallback_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.fallback_generator = Some(generator);
        self
    }

    /// Overrides both vision specialists.
    #[must_use]
    pub fn specialists(
        mut self,
        dermoscopy: Arc<dyn VisionSpecialist>,
        clinical: Arc<dyn VisionSpecialist>,
    ) -> Self {
        self.dermoscopy = Some(dermoscopy);
        self.clinical = Some(clinical);
        self
    }

    /// Overrides the embedder.
    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Overrides the crypto bindings.
    #[must_use]
    pub fn crypto(mut self, crypto: Arc<dyn Crypto>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    /// Overrides the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Overrides the identifier source.
    #[must_use]
    pub fn ids(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Finalizes the registry.
    #[must_use]
    pub fn build(self) -> ServiceRegistry {
        let dimension = self.bank.dimension();
        ServiceRegistry {
            bank: self.bank,
            ledger: self.ledger,
            generator: self
                .generator
                .unwrap_or_else(|| Arc::new(LocalTemplateGenerator)),
            fallback_generator: self
                .fallback_generator
                .unwrap_or_else(|| Arc::new(LocalTemplateGenerator)),
            dermoscopy: self.dermoscopy.unwrap_or_else(|| {
                Arc::new(HeuristicVisionSpecialist::new(SpecialistKind::Dermoscopy))
            }),
            clinical: self.clinical.unwrap_or_else(|| {
                Arc::new(HeuristicVisionSpecialist::new(SpecialistKind::ClinicalPhoto))
            }),
            embedder: self
                .embedder
                .unwrap_or_else(|| Arc::new(HashingEmbedder::new(dimension))),
            crypto: self.crypto.unwrap_or_else(|| Arc::new(StdCrypto)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            ids: self.ids.unwrap_or_else(|| Arc::new(UuidSource)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn local_registry_opens_stores() {
        let dir = tempdir().unwrap();
        let registry =
            ServiceRegistry::local(dir.path(), &OrchestratorConfig::default(), None).unwrap();
        assert_eq!(registry.bank().dimension(), 384);
        let services = registry.agent_services(SpecialistKind::Dermoscopy);
        assert_eq!(services.bank.dimension(), 384);
    }

    #[test]
    fn intent_selects_the_specialist() {
        let dir = tempdir().unwrap();
        let registry =
            ServiceRegistry::local(dir.path(), &OrchestratorConfig::default(), None).unwrap();
        let dermoscopy = registry.agent_services(SpecialistKind::Dermoscopy);
        let clinical = registry.agent_services(SpecialistKind::ClinicalPhoto);
        assert_eq!(dermoscopy.vision.kind(), SpecialistKind::Dermoscopy);
        assert_eq!(clinical.vision.kind(), SpecialistKind::ClinicalPhoto);
    }
}

//! Tracking id generation and issuance.

use std::sync::{Arc, Mutex};

use mibsp_storage::TrackingIdRegistry;
use mibsp_types::{TrackingId, TRACKING_ID_ALPHABET, TRACKING_ID_SUFFIX_LEN};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use tracing::{debug, error, instrument, warn};

use crate::config::TrackingConfig;
use crate::error::TrackingError;

pub type TrackingResult<T> = Result<T, TrackingError>;

/// Draws unique tracking ids, checking each against a [`TrackingIdRegistry`].
///
/// Suffix characters are sampled uniformly from the alphabet with an
/// operating-system CSPRNG by default.
pub struct TrackingIdGenerator<R = OsRng> {
    registry: Arc<dyn TrackingIdRegistry>,
    rng: Mutex<R>,
    config: TrackingConfig,
}

impl TrackingIdGenerator<OsRng> {
    pub fn new(registry: Arc<dyn TrackingIdRegistry>, config: TrackingConfig) -> Self {
        Self::with_rng(registry, config, OsRng)
    }
}

impl<R: RngCore + Send> TrackingIdGenerator<R> {
    pub fn with_rng(registry: Arc<dyn TrackingIdRegistry>, config: TrackingConfig, rng: R) -> Self {
        Self {
            registry,
            rng: Mutex::new(rng),
            config,
        }
    }

    /// Generate an id not yet present in the registry.
    ///
    /// The id is not reserved; use [`Self::issue`] when two workers could
    /// draw concurrently.
    #[instrument(skip(self))]
    pub async fn generate(&self) -> TrackingResult<TrackingId> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            let candidate = self.draw()?;
            if !self.registry.exists(&candidate).await? {
                debug!(attempt, "tracking id generated");
                return Ok(candidate);
            }
            warn!(attempt, "tracking id collision, redrawing");
        }
        error!(attempts, "tracking id generation exhausted");
        Err(TrackingError::Exhausted { attempts })
    }

    /// Generate an id and record it as issued, atomically with respect to
    /// other issuers sharing the registry.
    #[instrument(skip(self))]
    pub async fn issue(&self) -> TrackingResult<TrackingId> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            let candidate = self.draw()?;
            if self.registry.register(&candidate).await? {
                debug!(attempt, "tracking id issued");
                return Ok(candidate);
            }
            warn!(attempt, "tracking id already issued, redrawing");
        }
        error!(attempts, "tracking id issuance exhausted");
        Err(TrackingError::Exhausted { attempts })
    }

    fn draw(&self) -> TrackingResult<TrackingId> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| TrackingError::RandomSource("rng lock poisoned".to_string()))?;
        let mut suffix = [0u8; TRACKING_ID_SUFFIX_LEN];
        for slot in suffix.iter_mut() {
            *slot = TRACKING_ID_ALPHABET[rng.gen_range(0..TRACKING_ID_ALPHABET.len())];
        }
        Ok(TrackingId::from_suffix(&suffix)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mibsp_storage::memory::InMemoryStorage;
    use mibsp_types::{validate, TRACKING_ID_LEN, TRACKING_ID_PREFIX};
    use rand::rngs::mock::StepRng;

    #[tokio::test]
    async fn generated_ids_are_well_formed() {
        let generator =
            TrackingIdGenerator::new(Arc::new(InMemoryStorage::new()), TrackingConfig::default());
        for _ in 0..50 {
            let id = generator.generate().await.unwrap();
            assert_eq!(id.as_str().len(), TRACKING_ID_LEN);
            assert!(id.as_str().starts_with(TRACKING_ID_PREFIX));
            assert!(validate(id.as_str()));
        }
    }

    #[tokio::test]
    async fn issued_ids_are_registered() {
        let storage = Arc::new(InMemoryStorage::new());
        let generator = TrackingIdGenerator::new(storage.clone(), TrackingConfig::default());
        let id = generator.issue().await.unwrap();
        assert!(storage.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn stuck_random_source_exhausts() {
        let storage = Arc::new(InMemoryStorage::new());
        // A constant source yields the same id every draw.
        let generator = TrackingIdGenerator::with_rng(
            storage.clone(),
            TrackingConfig { max_attempts: 4 },
            StepRng::new(0, 0),
        );

        let first = generator.issue().await.unwrap();
        assert!(storage.exists(&first).await.unwrap());

        assert_eq!(
            generator.issue().await,
            Err(TrackingError::Exhausted { attempts: 4 })
        );
        assert_eq!(
            generator.generate().await,
            Err(TrackingError::Exhausted { attempts: 4 })
        );
    }

    #[tokio::test]
    async fn registry_failure_is_persistence_error() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.set_reject_writes(true);
        let generator = TrackingIdGenerator::new(storage, TrackingConfig::default());
        assert!(matches!(
            generator.issue().await,
            Err(TrackingError::Persistence(_))
        ));
    }
}

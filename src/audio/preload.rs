//! Next-track preload cache with generation-based invalidation.
//!
//! At most one resource is cached, always keyed by the queue head's
//! [`TrackKey`]. Each preload attempt is tagged with the cache generation at
//! the moment it started; any head-changing mutation bumps the generation,
//! so an attempt that completes afterwards is released instead of
//! committed. An advance that needs the track being preloaded claims the
//! in-flight attempt and receives its result directly.
//!
//! The cache is plain data kept under the guild state lock. Methods that
//! evict a resource hand it back to the caller, which releases it through
//! the gateway once the lock is dropped.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use super::track::TrackKey;
use crate::error::ProviderError;

pub(crate) type PreloadResult<R> = Result<R, ProviderError>;

/// Un intento de preload en curso
#[derive(Debug)]
pub struct PreloadJob<R> {
    pub key: TrackKey,
    pub generation: u64,
    /// Un avance que reclamó este intento espera aquí el resultado
    waiter: Mutex<Option<oneshot::Sender<PreloadResult<R>>>>,
}

pub enum PreloadStart<R> {
    /// Ya hay recurso o intento para esta clave
    AlreadyCovered,
    Started {
        job: Arc<PreloadJob<R>>,
        evicted: Option<R>,
    },
}

pub enum PreloadTake<R> {
    Ready(R),
    Waiting(oneshot::Receiver<PreloadResult<R>>),
    Miss,
}

#[derive(Debug)]
pub enum PreloadOutcome<R> {
    /// Entregado al avance que lo reclamó
    Delivered,
    Committed,
    /// El intento quedó obsoleto; el recurso (si lo hay) debe liberarse
    Stale(Option<R>),
    Failed(ProviderError),
}

#[derive(Debug)]
pub struct PreloadCache<R> {
    generation: u64,
    ready: Option<(TrackKey, R)>,
    in_flight: Option<Arc<PreloadJob<R>>>,
}

impl<R> Default for PreloadCache<R> {
    fn default() -> Self {
        Self {
            generation: 0,
            ready: None,
            in_flight: None,
        }
    }
}

impl<R> PreloadCache<R> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ready_key(&self) -> Option<&TrackKey> {
        self.ready.as_ref().map(|(key, _)| key)
    }

    pub fn in_flight_key(&self) -> Option<&TrackKey> {
        self.in_flight.as_ref().map(|job| &job.key)
    }

    /// Descarta todo: sube la generación y devuelve el recurso cacheado
    pub fn invalidate(&mut self) -> Option<R> {
        self.generation += 1;
        self.in_flight = None;
        self.ready.take().map(|(key, resource)| {
            debug!("🗑️ Preload de {} invalidado", key);
            resource
        })
    }

    /// Alinea la caché con la cabeza actual de la cola
    pub fn reconcile(&mut self, head: Option<&TrackKey>) -> Option<R> {
        if self.in_flight.as_ref().is_some_and(|job| Some(&job.key) != head) {
            self.generation += 1;
            self.in_flight = None;
        }
        match &self.ready {
            Some((key, _)) if Some(key) != head => self.ready.take().map(|(key, resource)| {
                debug!("🗑️ Preload de {} ya no es la cabeza", key);
                resource
            }),
            _ => None,
        }
    }

    /// Empieza un intento para `key`, salvo que ya esté cubierta
    pub fn begin(&mut self, key: TrackKey) -> PreloadStart<R> {
        let ready_matches = self.ready_key() == Some(&key);
        let in_flight_matches = self
            .in_flight
            .as_ref()
            .is_some_and(|job| job.key == key && job.generation == self.generation);
        if ready_matches || in_flight_matches {
            return PreloadStart::AlreadyCovered;
        }

        let evicted = self.invalidate();
        let job = Arc::new(PreloadJob {
            key,
            generation: self.generation,
            waiter: Mutex::new(None),
        });
        self.in_flight = Some(job.clone());
        PreloadStart::Started { job, evicted }
    }

    /// El avance pide el recurso de `key`. Devuelve además lo que haya que liberar.
    pub fn take(&mut self, key: &TrackKey) -> (PreloadTake<R>, Option<R>) {
        if self.ready_key() == Some(key) {
            if let Some((_, resource)) = self.ready.take() {
                return (PreloadTake::Ready(resource), None);
            }
        }

        let claimable = self
            .in_flight
            .as_ref()
            .filter(|job| &job.key == key && job.generation == self.generation)
            .cloned();
        if let Some(job) = claimable {
            let (tx, rx) = oneshot::channel();
            *job.waiter.lock() = Some(tx);
            self.in_flight = None;
            let evicted = self.ready.take().map(|(_, resource)| resource);
            return (PreloadTake::Waiting(rx), evicted);
        }

        (PreloadTake::Miss, self.invalidate())
    }

    /// Termina un intento. Debe llamarse con el lock del estado tomado.
    pub fn complete(&mut self, job: &Arc<PreloadJob<R>>, result: PreloadResult<R>) -> PreloadOutcome<R> {
        if let Some(waiter) = job.waiter.lock().take() {
            return match waiter.send(result) {
                Ok(()) => PreloadOutcome::Delivered,
                // El avance que esperaba ya no existe
                Err(result) => PreloadOutcome::Stale(result.ok()),
            };
        }

        let is_current = self
            .in_flight
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, job))
            && job.generation == self.generation;
        if !is_current {
            debug!("Preload de {} obsoleto (gen {} vs {})", job.key, job.generation, self.generation);
            return PreloadOutcome::Stale(result.ok());
        }

        self.in_flight = None;
        match result {
            Ok(resource) => {
                debug!("✅ Preload listo para {}", job.key);
                self.ready = Some((job.key.clone(), resource));
                PreloadOutcome::Committed
            }
            Err(e) => PreloadOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::TrackIdGenerator;

    fn keys() -> (TrackKey, TrackKey) {
        let ids = TrackIdGenerator::new();
        (
            TrackKey {
                id: ids.next_id(),
                url: Some("https://youtu.be/a".into()),
            },
            TrackKey {
                id: ids.next_id(),
                url: Some("https://youtu.be/b".into()),
            },
        )
    }

    fn started(cache: &mut PreloadCache<&'static str>, key: TrackKey) -> Arc<PreloadJob<&'static str>> {
        match cache.begin(key) {
            PreloadStart::Started { job, .. } => job,
            PreloadStart::AlreadyCovered => panic!("expected a new preload"),
        }
    }

    #[test]
    fn begin_is_idempotent_for_the_same_head() {
        let (a, _) = keys();
        let mut cache = PreloadCache::default();
        let job = started(&mut cache, a.clone());
        assert!(matches!(cache.begin(a.clone()), PreloadStart::AlreadyCovered));

        assert!(matches!(cache.complete(&job, Ok("res-a")), PreloadOutcome::Committed));
        assert!(matches!(cache.begin(a.clone()), PreloadStart::AlreadyCovered));
        assert_eq!(cache.ready_key(), Some(&a));
    }

    #[test]
    fn head_change_mid_preload_discards_the_result() {
        let (a, b) = keys();
        let mut cache = PreloadCache::default();
        let job = started(&mut cache, a);
        let generation = cache.generation();

        assert!(cache.reconcile(Some(&b)).is_none());
        assert_eq!(cache.generation(), generation + 1);
        match cache.complete(&job, Ok("res-a")) {
            PreloadOutcome::Stale(Some(resource)) => assert_eq!(resource, "res-a"),
            other => panic!("expected a stale preload, got {:?}", other),
        }
        assert!(cache.ready_key().is_none());
    }

    #[test]
    fn superseded_resource_is_evicted_before_replacement() {
        let (a, b) = keys();
        let mut cache = PreloadCache::default();
        let job = started(&mut cache, a);
        cache.complete(&job, Ok("res-a"));

        match cache.begin(b.clone()) {
            PreloadStart::Started { evicted, .. } => assert_eq!(evicted, Some("res-a")),
            PreloadStart::AlreadyCovered => panic!("b is not covered"),
        }
        assert_eq!(cache.in_flight_key(), Some(&b));
    }

    #[tokio::test]
    async fn advance_claims_the_in_flight_attempt() {
        let (a, _) = keys();
        let mut cache = PreloadCache::default();
        let job = started(&mut cache, a.clone());

        let (taken, evicted) = cache.take(&a);
        assert!(evicted.is_none());
        let PreloadTake::Waiting(rx) = taken else {
            panic!("expected to wait on the in-flight preload");
        };

        assert!(matches!(cache.complete(&job, Ok("res-a")), PreloadOutcome::Delivered));
        assert_eq!(rx.await.unwrap().unwrap(), "res-a");
        // Entregado, no cacheado
        assert!(cache.ready_key().is_none());
    }

    #[test]
    fn take_of_another_key_releases_the_cached_one() {
        let (a, b) = keys();
        let mut cache = PreloadCache::default();
        let job = started(&mut cache, a);
        cache.complete(&job, Ok("res-a"));

        let (taken, evicted) = cache.take(&b);
        assert!(matches!(taken, PreloadTake::Miss));
        assert_eq!(evicted, Some("res-a"));
    }

    #[test]
    fn dropped_waiter_turns_the_result_stale() {
        let (a, _) = keys();
        let mut cache = PreloadCache::default();
        let job = started(&mut cache, a.clone());
        let (taken, _) = cache.take(&a);
        drop(taken);

        assert!(matches!(cache.complete(&job, Ok("res-a")), PreloadOutcome::Stale(Some("res-a"))));
    }
}

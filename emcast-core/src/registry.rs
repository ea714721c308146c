//! Live session registry for the aggregator.
//!
//! One registry instance holds every negotiated bundle, keyed by id
//! within its entity type. The aggregator wraps it in `Arc<Mutex<..>>`
//! and all mutation goes through it, so listener and console tasks
//! never race on session state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entity::EntityKind;
use crate::error::EmcastError;
use crate::interface::{EmitterBundle, Interface, ShutdownOutcome, SubscriberBundle};

/// How many shutdown rounds an unresponsive emitter gets before its
/// sockets are dropped anyway.
const SWEEP_ROUNDS: u32 = 4;

/// Frame-count logging cadence for a watch.
const WATCH_LOG_EVERY: u64 = 150;

/// A running frame-consuming task on one emitter's data socket.
struct Watch {
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    frames: Arc<AtomicU64>,
}

impl Watch {
    fn start(emitter: &EmitterBundle) -> Self {
        let cancel = CancellationToken::new();
        let frames = Arc::new(AtomicU64::new(0));
        let mut stream = emitter.frame_stream();

        let id = emitter.id().to_string();
        let token = cancel.clone();
        let counter = frames.clone();
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    batch = stream.next_batch() => match batch {
                        Ok(frames) => {
                            let total =
                                counter.fetch_add(frames.len() as u64, Ordering::Relaxed)
                                    + frames.len() as u64;
                            if total % WATCH_LOG_EVERY < frames.len() as u64 {
                                info!("emitter-{id}: {total} frames received");
                            }
                        }
                        Err(e) => {
                            debug!("emitter-{id}: watch ended: {e}");
                            break;
                        }
                    },
                }
            }
        });

        Self {
            cancel,
            worker: Some(worker),
            frames,
        }
    }

    /// Cancel the worker and return the total frame count.
    async fn stop(mut self) -> u64 {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        self.frames.load(Ordering::Relaxed)
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// All live sessions, keyed by id within each entity type.
#[derive(Default)]
pub struct Registry {
    emitters: HashMap<String, EmitterBundle>,
    subscribers: HashMap<String, SubscriberBundle>,
    watches: HashMap<String, Watch>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly negotiated interface. Ids must be unique
    /// within their entity type.
    pub fn register(&mut self, interface: Interface) -> Result<(), EmcastError> {
        let id = interface.id().to_string();
        match interface {
            Interface::Emitter(bundle) => {
                if self.emitters.contains_key(&id) {
                    return Err(EmcastError::DuplicateId {
                        kind: EntityKind::Emitter,
                        id,
                    });
                }
                self.emitters.insert(id, bundle);
            }
            Interface::Subscriber(bundle) => {
                if self.subscribers.contains_key(&id) {
                    return Err(EmcastError::DuplicateId {
                        kind: EntityKind::Subscriber,
                        id,
                    });
                }
                self.subscribers.insert(id, bundle);
            }
        }
        Ok(())
    }

    /// Ids of all live emitters, sorted for stable listings.
    pub fn emitter_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.emitters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn subscriber_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.subscribers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn emitter(&self, id: &str) -> Option<&EmitterBundle> {
        self.emitters.get(id)
    }

    pub fn subscriber(&self, id: &str) -> Option<&SubscriberBundle> {
        self.subscribers.get(id)
    }

    /// Whether a watch is running for this emitter.
    pub fn is_watching(&self, id: &str) -> bool {
        self.watches.contains_key(id)
    }

    pub fn subscriber_mut(&mut self, id: &str) -> Option<&mut SubscriberBundle> {
        self.subscribers.get_mut(id)
    }

    /// Drop a subscriber that already announced itself offline.
    pub fn remove_subscriber(&mut self, id: &str) -> Option<SubscriberBundle> {
        self.subscribers.remove(id)
    }

    /// Send a text payload to a live entity's messaging channel.
    pub async fn message(
        &self,
        kind: EntityKind,
        id: &str,
        text: &str,
    ) -> Result<(), EmcastError> {
        match kind {
            EntityKind::Emitter => {
                let bundle = self
                    .emitters
                    .get(id)
                    .ok_or_else(|| EmcastError::NoSuchEmitter(id.to_string()))?;
                bundle.message(text).await
            }
            EntityKind::Subscriber => {
                let bundle = self
                    .subscribers
                    .get(id)
                    .ok_or_else(|| EmcastError::NoSuchSubscriber(id.to_string()))?;
                bundle.message(text).await
            }
        }
    }

    // ── Watching ─────────────────────────────────────────────────

    /// Switch an emitter's stream on and start consuming its frames.
    pub async fn watch(&mut self, id: &str) -> Result<(), EmcastError> {
        if self.watches.contains_key(id) {
            return Err(EmcastError::AlreadyWatching(id.to_string()));
        }
        let emitter = self
            .emitters
            .get_mut(id)
            .ok_or_else(|| EmcastError::NoSuchEmitter(id.to_string()))?;
        emitter.set_streaming(true).await?;
        self.watches.insert(id.to_string(), Watch::start(emitter));
        Ok(())
    }

    /// Stop consuming, switch the stream off, report frames seen.
    pub async fn unwatch(&mut self, id: &str) -> Result<u64, EmcastError> {
        let watch = self
            .watches
            .remove(id)
            .ok_or_else(|| EmcastError::NoSuchEmitter(id.to_string()))?;
        let frames = watch.stop().await;
        if let Some(emitter) = self.emitters.get_mut(id) {
            emitter.set_streaming(false).await?;
        }
        info!("emitter-{id}: unwatched after {frames} frames");
        Ok(frames)
    }

    // ── Attachments ──────────────────────────────────────────────

    /// Splice a subscriber onto an emitter's data (and maybe RC) flow.
    pub async fn attach_subscriber(
        &mut self,
        subscriber_id: &str,
        emitter_id: &str,
    ) -> Result<(), EmcastError> {
        // Disjoint maps, so both borrows are fine.
        let emitter = self
            .emitters
            .get(emitter_id)
            .ok_or_else(|| EmcastError::NoSuchEmitter(emitter_id.to_string()))?;
        let subscriber = self
            .subscribers
            .get_mut(subscriber_id)
            .ok_or_else(|| EmcastError::NoSuchSubscriber(subscriber_id.to_string()))?;
        subscriber.attach(emitter).await
    }

    pub async fn detach_subscriber(&mut self, subscriber_id: &str) -> Result<String, EmcastError> {
        let subscriber = self
            .subscribers
            .get_mut(subscriber_id)
            .ok_or_else(|| EmcastError::NoSuchSubscriber(subscriber_id.to_string()))?;
        subscriber.detach().await
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Shut one emitter down and drop it from the registry.
    ///
    /// Returns whether the emitter confirmed with its offline status.
    pub async fn kill_emitter(&mut self, id: &str, wait: Duration) -> Result<bool, EmcastError> {
        if self.watches.contains_key(id) {
            let _ = self.unwatch(id).await;
        }
        let attached: Vec<String> = self
            .subscribers
            .iter()
            .filter(|(_, s)| s.attached_to() == Some(id))
            .map(|(sid, _)| sid.clone())
            .collect();
        for sid in attached {
            let _ = self.detach_subscriber(&sid).await;
        }

        let mut emitter = self
            .emitters
            .remove(id)
            .ok_or_else(|| EmcastError::NoSuchEmitter(id.to_string()))?;
        let outcome = emitter.remote_shutdown(wait).await;
        emitter.teardown().await;
        match outcome {
            Ok(ShutdownOutcome::Confirmed) => Ok(true),
            Ok(other) => {
                warn!("emitter-{id}: shutdown not confirmed: {other:?}");
                Ok(false)
            }
            Err(e) => {
                warn!("emitter-{id}: shutdown request failed: {e}");
                Ok(false)
            }
        }
    }

    /// Shut every live session down.
    ///
    /// Emitters get up to four shutdown rounds to confirm before
    /// their sockets are dropped regardless; subscribers get one.
    /// Returns one report line per session.
    pub async fn shutdown_sweep(&mut self, wait: Duration) -> Vec<String> {
        let mut report = Vec::new();

        for id in self.watches.keys().cloned().collect::<Vec<_>>() {
            let _ = self.unwatch(&id).await;
        }
        for id in self.subscriber_ids() {
            let _ = self.detach_subscriber(&id).await;
        }

        let mut pending: HashMap<String, EmitterBundle> = self.emitters.drain().collect();
        for round in 1..=SWEEP_ROUNDS {
            if pending.is_empty() {
                break;
            }
            let mut still_pending = HashMap::new();
            for (id, mut emitter) in pending {
                match emitter.remote_shutdown(wait).await {
                    Ok(ShutdownOutcome::Confirmed) => {
                        emitter.teardown().await;
                        report.push(format!("emitter-{id}: confirmed (round {round})"));
                    }
                    Ok(outcome) => {
                        if round == SWEEP_ROUNDS {
                            emitter.teardown().await;
                            report.push(format!(
                                "emitter-{id}: dropped after {SWEEP_ROUNDS} rounds ({outcome:?})"
                            ));
                        } else {
                            still_pending.insert(id, emitter);
                        }
                    }
                    Err(e) => {
                        emitter.teardown().await;
                        report.push(format!("emitter-{id}: dropped, channel dead ({e})"));
                    }
                }
            }
            pending = still_pending;
        }

        for (id, mut subscriber) in std::mem::take(&mut self.subscribers) {
            match subscriber.remote_shutdown(wait).await {
                Ok(ShutdownOutcome::Confirmed) => {
                    report.push(format!("subscriber-{id}: confirmed"));
                }
                Ok(outcome) => {
                    report.push(format!("subscriber-{id}: dropped ({outcome:?})"));
                }
                Err(e) => {
                    report.push(format!("subscriber-{id}: dropped, channel dead ({e})"));
                }
            }
            subscriber.teardown().await;
        }

        report.sort();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageChannel;
    use crate::frame::FrameShape;
    use crate::interface::bundle::BundleCore;
    use crate::state::BundlePhase;
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    struct FarSide {
        _messaging: TcpStream,
        _data: TcpStream,
        _rc: TcpStream,
    }

    async fn fake_core(id: &str) -> (BundleCore, FarSide) {
        let (m, m_far) = socket_pair().await;
        let (d, d_far) = socket_pair().await;
        let (r, r_far) = socket_pair().await;
        let mut channel = MessageChannel::new(m, Vec::new()).unwrap();
        channel.start();
        let mut phase = BundlePhase::default();
        phase.establish().unwrap();
        let core = BundleCore::new(
            id.to_string(),
            channel,
            Arc::new(d),
            Arc::new(r),
            "127.0.0.1".parse().unwrap(),
            phase,
        );
        (
            core,
            FarSide {
                _messaging: m_far,
                _data: d_far,
                _rc: r_far,
            },
        )
    }

    async fn fake_emitter(id: &str) -> (EmitterBundle, FarSide) {
        let (core, far) = fake_core(id).await;
        (
            EmitterBundle::new(core, FrameShape::parse("2x2").unwrap()),
            far,
        )
    }

    #[tokio::test]
    async fn duplicate_emitter_id_rejected() {
        let mut registry = Registry::new();
        let (a, _far_a) = fake_emitter("7").await;
        let (b, _far_b) = fake_emitter("7").await;
        registry.register(Interface::Emitter(a)).unwrap();
        assert!(matches!(
            registry.register(Interface::Emitter(b)),
            Err(EmcastError::DuplicateId {
                kind: EntityKind::Emitter,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn emitter_ids_come_back_sorted() {
        let mut registry = Registry::new();
        let (c, _fc) = fake_emitter("charlie").await;
        let (a, _fa) = fake_emitter("alpha").await;
        let (b, _fb) = fake_emitter("bravo").await;
        registry.register(Interface::Emitter(c)).unwrap();
        registry.register(Interface::Emitter(a)).unwrap();
        registry.register(Interface::Emitter(b)).unwrap();
        assert_eq!(registry.emitter_ids(), vec!["alpha", "bravo", "charlie"]);
    }

    #[tokio::test]
    async fn attach_to_missing_emitter_fails() {
        let mut registry = Registry::new();
        let (core, _far) = fake_core("s1").await;
        registry
            .register(Interface::Subscriber(SubscriberBundle::new(core)))
            .unwrap();
        assert!(matches!(
            registry.attach_subscriber("s1", "ghost").await,
            Err(EmcastError::NoSuchEmitter(_))
        ));
        assert!(matches!(
            registry.detach_subscriber("s1").await,
            Err(EmcastError::NotAttached(_))
        ));
    }

    #[tokio::test]
    async fn kill_unknown_emitter_fails() {
        let mut registry = Registry::new();
        assert!(matches!(
            registry.kill_emitter("ghost", Duration::from_millis(10)).await,
            Err(EmcastError::NoSuchEmitter(_))
        ));
    }
}

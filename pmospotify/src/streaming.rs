//! Poll-and-broadcast loop
//!
//! [`StreamingLoop`] repeatedly asks a [`NowPlayingSource`] what is playing and
//! broadcasts one [`StreamMessage`] per iteration to the
//! [`SubscriberRegistry`]. The delay before the next poll depends only on the
//! last outcome:
//!
//! - `Snapshot` → playing interval (1 s by default)
//! - `NothingPlaying`, `TransientError` → idle interval (10 s by default)
//! - `Unauthorized` → the loop stops
//!
//! [`StreamHub`] owns the single shared loop: it starts it when a subscriber
//! attaches (or a new credential arrives while subscribers are attached), and
//! stops it when the last subscriber leaves or the server shuts down.

use crate::auth::Authorizer;
use crate::client::NowPlayingSource;
use crate::credential::Credential;
use crate::models::{PollOutcome, StreamMessage};
use crate::registry::{ChannelSubscriber, Subscriber, SubscriberId, SubscriberRegistry};
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default delay after a snapshot
pub const DEFAULT_PLAYING_INTERVAL: Duration = Duration::from_secs(1);

/// Default delay after nothing playing or a transient error
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(10);

/// The two poll cadences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub playing: Duration,
    pub idle: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            playing: DEFAULT_PLAYING_INTERVAL,
            idle: DEFAULT_IDLE_INTERVAL,
        }
    }
}

impl PollIntervals {
    pub fn new(playing: Duration, idle: Duration) -> Self {
        Self { playing, idle }
    }

    /// Delay before the next poll, `None` when polling must stop
    pub fn next_delay(&self, outcome: &PollOutcome) -> Option<Duration> {
        match outcome {
            PollOutcome::Snapshot(_) => Some(self.playing),
            PollOutcome::NothingPlaying | PollOutcome::TransientError(_) => Some(self.idle),
            PollOutcome::Unauthorized => None,
        }
    }
}

/// Why a loop run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The cancellation token fired
    Cancelled,
    /// No credential, or the upstream rejected it
    Unauthorized,
}

/// The poll-and-broadcast control loop
#[derive(Clone)]
pub struct StreamingLoop {
    authorizer: Arc<Authorizer>,
    source: Arc<dyn NowPlayingSource>,
    registry: SubscriberRegistry,
    intervals: PollIntervals,
}

impl StreamingLoop {
    pub fn new(
        authorizer: Arc<Authorizer>,
        source: Arc<dyn NowPlayingSource>,
        registry: SubscriberRegistry,
        intervals: PollIntervals,
    ) -> Self {
        Self {
            authorizer,
            source,
            registry,
            intervals,
        }
    }

    pub fn intervals(&self) -> PollIntervals {
        self.intervals
    }

    /// Runs until cancelled or until authorization is lost
    ///
    /// The credential is read again on every iteration, so a replacement is
    /// picked up on the next poll. A rejection of a credential that was
    /// replaced in the meantime is not a loss of authorization. Waits
    /// (refresh and upstream call included) are interrupted as soon as
    /// `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> LoopExit {
        info!("▶️ Streaming loop started");

        let exit = loop {
            if cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }

            let credential = tokio::select! {
                biased;
                _ = cancel.cancelled() => break LoopExit::Cancelled,
                credential = self.authorizer.refresh_if_expired() => credential,
            };
            let Some(credential) = credential else {
                info!("No credential, streaming loop stops");
                self.registry
                    .broadcast(&StreamMessage::authorization_lost(Utc::now()));
                break LoopExit::Unauthorized;
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break LoopExit::Cancelled,
                outcome = self.source.fetch_current(&credential) => outcome,
            };

            // Rejet d'un credential déjà remplacé : on repart avec le nouveau
            if matches!(outcome, PollOutcome::Unauthorized) && self.was_replaced(&credential) {
                debug!("Credential replaced during the poll, retrying with the new one");
                continue;
            }

            match &outcome {
                PollOutcome::Snapshot(track) => {
                    debug!("Now playing: {} - {}", track.artists.join(", "), track.name)
                }
                PollOutcome::NothingPlaying => debug!("Nothing playing"),
                PollOutcome::Unauthorized => warn!("Upstream rejected the credential"),
                PollOutcome::TransientError(e) => warn!("Transient upstream error: {}", e),
            }

            let message = StreamMessage::from_outcome(&outcome, Utc::now());
            let delivered = self.registry.broadcast(&message);
            debug!("Broadcast to {} subscriber(s)", delivered);

            let Some(delay) = self.intervals.next_delay(&outcome) else {
                break LoopExit::Unauthorized;
            };

            tokio::select! {
                _ = cancel.cancelled() => break LoopExit::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        info!("⏹️ Streaming loop stopped ({:?})", exit);
        exit
    }

    fn was_replaced(&self, used: &Arc<Credential>) -> bool {
        self.authorizer
            .current_credential()
            .is_some_and(|current| !Arc::ptr_eq(&current, used))
    }
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<LoopExit>,
}

impl RunningLoop {
    fn is_active(&self) -> bool {
        !self.handle.is_finished() && !self.token.is_cancelled()
    }
}

/// Owner of the single shared streaming loop
///
/// Start and stop decisions are taken under one lock so that an attach racing
/// with the last detach never leaves subscribers without a loop.
pub struct StreamHub {
    registry: SubscriberRegistry,
    streaming: StreamingLoop,
    running: Mutex<Option<RunningLoop>>,
    shutdown: CancellationToken,
}

impl StreamHub {
    /// `shutdown` is the parent token; cancelling it stops the loop
    pub fn new(streaming: StreamingLoop, shutdown: CancellationToken) -> Self {
        Self {
            registry: streaming.registry.clone(),
            streaming,
            running: Mutex::new(None),
            shutdown,
        }
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Attaches a channel subscriber and makes sure the loop runs
    ///
    /// The registry owns the sending half: once the subscriber is detached
    /// (by [`StreamHub::unsubscribe`] or a failed delivery) the receiver
    /// drains and then yields `None`.
    pub fn subscribe(
        &self,
        capacity: usize,
    ) -> (SubscriberId, tokio::sync::mpsc::Receiver<StreamMessage>) {
        let (subscriber, rx) = ChannelSubscriber::channel(capacity);
        let id = subscriber.id();
        self.registry.attach(subscriber);
        self.ensure_running();
        (id, rx)
    }

    /// Detaches a subscriber and stops the loop if it was the last one
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.registry.detach(id);
        self.stop_if_idle();
    }

    /// Starts the loop if subscribers are attached and none is running
    ///
    /// Returns `true` when a new loop was spawned.
    pub fn ensure_running(&self) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }

        let mut running = self.lock();
        if self.registry.is_empty() {
            return false;
        }
        if running.as_ref().is_some_and(RunningLoop::is_active) {
            return false;
        }

        let token = self.shutdown.child_token();
        let streaming = self.streaming.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { streaming.run(loop_token).await });

        *running = Some(RunningLoop { token, handle });
        true
    }

    /// Stops the loop when no subscriber is left
    pub fn stop_if_idle(&self) -> bool {
        let mut running = self.lock();
        if !self.registry.is_empty() {
            return false;
        }
        match running.take() {
            Some(current) => {
                debug!("Last subscriber left, stopping streaming loop");
                current.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().as_ref().is_some_and(RunningLoop::is_active)
    }

    /// Stops the loop regardless of subscribers
    pub fn shutdown(&self) {
        if let Some(current) = self.lock().take() {
            current.token.cancel();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<RunningLoop>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StreamHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

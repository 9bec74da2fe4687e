use std::{collections::HashMap, sync::Arc, time::Duration};

use baton_time::Clock;
use baton_token::{event_channel, ClientId, RequestOutcome, Substrate, TokenError, TokenName};
use baton_trigger::{
    ActionSink, FireTarget, ObjectDirectory, ObjectId, TriggerConfig, TriggerPhase,
    TriggerScheduler, TriggerSnapshot,
};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{actor::ObjectActor, Backoff, DEFAULT_RETRY_INITIAL, DEFAULT_RETRY_MAX};

pub const DEFAULT_TOKEN_PREFIX: &str = "io.baton.cuckoo-clock";

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    /// The object lacks metadata it needs to fire; no token was requested.
    #[error("object {object} is misconfigured: {reason}")]
    Misconfigured { object: ObjectId, reason: String },
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Trigger(#[from] baton_trigger::ConfigError),
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub token_prefix: String,
    pub trigger: TriggerConfig,
    pub retry_initial: Duration,
    pub retry_max: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            trigger: TriggerConfig::default(),
            retry_initial: DEFAULT_RETRY_INITIAL,
            retry_max: DEFAULT_RETRY_MAX,
        }
    }
}

struct Activation {
    token: TokenName,
    scheduler: Arc<TriggerScheduler>,
    cancel: CancellationToken,
    actor: JoinHandle<()>,
}

#[derive(Default)]
struct Objects {
    active: HashMap<ObjectId, Activation>,
    /// Stopped objects whose token release failed; the next `deactivate` or `shutdown` retries.
    releasing: HashMap<ObjectId, TokenName>,
}

/// Lifecycle glue for one client: turns `activate`/`deactivate` of an object into token
/// requests and a per-object actor that keeps the trigger in step with ownership.
///
/// Call [`Coordinator::shutdown`] before dropping it; dropping only stops the local actors and
/// leaves the client's registrations with the substrate.
pub struct Coordinator {
    client: ClientId,
    substrate: Arc<dyn Substrate>,
    directory: Arc<dyn ObjectDirectory>,
    sink: Arc<dyn ActionSink>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    // Held across substrate calls so activate/deactivate of the same object never interleave.
    objects: Mutex<Objects>,
}

impl Coordinator {
    pub fn new(
        client: ClientId,
        substrate: Arc<dyn Substrate>,
        directory: Arc<dyn ObjectDirectory>,
        sink: Arc<dyn ActionSink>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            client,
            substrate,
            directory,
            sink,
            clock,
            config,
            objects: Mutex::new(Objects::default()),
        }
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// `<prefix>:<object>`, shared by every client coordinating the same object.
    pub fn token_for(&self, object: &ObjectId) -> Result<TokenName, TokenError> {
        TokenName::new(format!("{}:{}", self.config.token_prefix, object))
    }

    /// Validate the object's metadata, build its scheduler and request its token.
    ///
    /// Activating an object that is already active is a no-op. A release left over from a failed
    /// [`Coordinator::deactivate`] is dropped once the new request succeeds.
    pub async fn activate(&self, object: &ObjectId) -> Result<(), ActivationError> {
        let mut objects = self.objects.lock().await;
        if objects.active.contains_key(object) {
            tracing::warn!(object = %object, "object already active");
            return Ok(());
        }

        let linked_body =
            self.directory
                .linked_body(object)
                .ok_or_else(|| ActivationError::Misconfigured {
                    object: object.clone(),
                    reason: "no linked body".to_string(),
                })?;
        let token = self.token_for(object)?;
        let scheduler = Arc::new(TriggerScheduler::new(
            FireTarget {
                object: object.clone(),
                linked_body,
            },
            self.config.trigger,
            Arc::clone(&self.clock),
            Arc::clone(&self.sink),
            Arc::clone(&self.directory),
        )?);

        let (events_tx, events_rx) = event_channel();
        let outcome = self
            .substrate
            .request(&token, &self.client, events_tx.clone())
            .await?;
        tracing::info!(object = %object, token = %token, ?outcome, "object activated");
        objects.releasing.remove(object);
        if matches!(outcome, RequestOutcome::AlreadyOwner) {
            // No `Granted` follows for a token this client still holds.
            scheduler.activate();
        }

        let cancel = CancellationToken::new();
        let actor = ObjectActor {
            token: token.clone(),
            client: self.client.clone(),
            substrate: Arc::clone(&self.substrate),
            scheduler: Arc::clone(&scheduler),
            events_tx,
            backoff: Backoff::new(self.config.retry_initial, self.config.retry_max),
            cancel: cancel.clone(),
        };
        let actor = tokio::spawn(actor.run(events_rx));

        objects.active.insert(
            object.clone(),
            Activation {
                token,
                scheduler,
                cancel,
                actor,
            },
        );
        Ok(())
    }

    /// Stop the trigger, leave the queue and give up ownership. A no-op for inactive objects.
    ///
    /// The trigger is stopped even when the substrate call fails. The release is then kept and
    /// retried by the next `deactivate` of the same object (or by `shutdown`), so calling this
    /// again is how a caller retries.
    pub async fn deactivate(&self, object: &ObjectId) -> Result<(), TokenError> {
        let mut objects = self.objects.lock().await;
        let token = if let Some(activation) = objects.active.remove(object) {
            self.stop(object, activation).await
        } else if let Some(token) = objects.releasing.remove(object) {
            token
        } else {
            return Ok(());
        };

        if let Err(err) = self.release(object, &token).await {
            tracing::warn!(object = %object, token = %token, "token release failed: {err}");
            objects.releasing.insert(object.clone(), token);
            return Err(err);
        }
        Ok(())
    }

    /// Deactivate every object, then drop all of this client's registrations.
    pub async fn shutdown(&self) -> Result<(), TokenError> {
        let mut objects = self.objects.lock().await;
        let mut tokens: Vec<(ObjectId, TokenName)> = objects.releasing.drain().collect();
        let active: Vec<(ObjectId, Activation)> = objects.active.drain().collect();
        for (object, activation) in active {
            let token = self.stop(&object, activation).await;
            tokens.push((object, token));
        }

        let mut first_err = None;
        for (object, token) in tokens {
            if let Err(err) = self.release(&object, &token).await {
                objects.releasing.insert(object, token);
                first_err.get_or_insert(err);
            }
        }
        match self.substrate.disconnect(&self.client).await {
            // Dropping every registration also completes any release that failed above.
            Ok(()) => {
                objects.releasing.clear();
                Ok(())
            }
            Err(err) => Err(first_err.unwrap_or(err)),
        }
    }

    pub async fn is_active(&self, object: &ObjectId) -> bool {
        self.objects.lock().await.active.contains_key(object)
    }

    pub async fn active_objects(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.objects.lock().await.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stopped objects whose token could not be released yet.
    pub async fn pending_releases(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .objects
            .lock()
            .await
            .releasing
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Trigger phase of an activated object, `None` when not activated.
    pub async fn phase(&self, object: &ObjectId) -> Option<TriggerPhase> {
        self.objects
            .lock()
            .await
            .active
            .get(object)
            .map(|activation| activation.scheduler.phase())
    }

    pub async fn snapshot(&self, object: &ObjectId) -> Option<TriggerSnapshot> {
        self.objects
            .lock()
            .await
            .active
            .get(object)
            .map(|activation| activation.scheduler.snapshot())
    }

    /// Stop the actor and the trigger, returning the token still to be released.
    async fn stop(&self, object: &ObjectId, activation: Activation) -> TokenName {
        // The actor goes first: once it is gone its receiver is dropped, so the revocation
        // triggered by `relinquish` is acknowledged without it.
        activation.cancel.cancel();
        if let Err(err) = activation.actor.await {
            tracing::warn!(object = %object, "object actor failed: {err}");
        }
        activation.scheduler.deactivate();
        tracing::info!(object = %object, token = %activation.token, "object deactivated");
        activation.token
    }

    async fn release(&self, object: &ObjectId, token: &TokenName) -> Result<(), TokenError> {
        self.substrate.withdraw(token, &self.client).await?;
        self.substrate.relinquish(token, &self.client).await?;
        tracing::debug!(object = %object, token = %token, "token released");
        Ok(())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        for activation in self.objects.get_mut().active.values() {
            activation.cancel.cancel();
        }
    }
}

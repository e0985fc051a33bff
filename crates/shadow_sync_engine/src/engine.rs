//! Shadow synchronization state machine.
//!
//! The engine reacts to the five shadow event kinds and decides what to
//! write into the [`SharedStateStore`] and when to announce a change. All
//! handlers run on the single dispatch context; the control loop may call
//! [`ShadowSyncEngine::local_change`] concurrently from its own thread.
//!
//! ## Key Invariants
//!
//! - A publish happens only when at least one cached value changed
//! - The token of a publish is registered before the publish is issued
//! - Only the matching accepted/rejected event consumes a token
//! - Adopting a cloud-origin update never publishes (no echo)

use crate::config::ShadowConfig;
use crate::error::{SyncError, SyncResult};
use crate::store::{SharedStateStore, StoreGuard};
use crate::transport::{ShadowTransport, TransportFuture};
use parking_lot::RwLock;
use shadow_protocol::{
    default_state, AcceptedResponse, AttributeValue, ClientToken, DeltaEvent, ErrorResponse,
    GetShadowRequest, StateMap, UpdateShadowRequest, UpdateState, UPLOAD_ENABLE,
};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Counters describing engine activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Update requests issued.
    pub updates_published: u64,
    /// Get requests issued.
    pub gets_published: u64,
    /// Writes that changed nothing and were not published.
    pub unchanged_writes: u64,
    /// Responses carrying an unknown token.
    pub stale_responses: u64,
    /// Cloud-origin updates adopted into the cache.
    pub cloud_adoptions: u64,
    /// Requests rejected by the service.
    pub rejections: u64,
}

/// Reconciles the local attribute cache with the remote shadow document.
pub struct ShadowSyncEngine<T: ShadowTransport> {
    config: ShadowConfig,
    store: Arc<SharedStateStore>,
    transport: Arc<T>,
    runtime: Handle,
    defaults: StateMap,
    stats: RwLock<EngineStats>,
    answered: watch::Sender<bool>,
}

impl<T: ShadowTransport + 'static> ShadowSyncEngine<T> {
    /// Creates a new engine. Publishes are spawned on `runtime`.
    pub fn new(
        config: ShadowConfig,
        store: Arc<SharedStateStore>,
        transport: Arc<T>,
        runtime: Handle,
    ) -> Self {
        let defaults = default_state(config.attributes.iter().cloned());
        Self {
            config,
            store,
            transport,
            runtime,
            defaults,
            stats: RwLock::new(EngineStats::default()),
            answered: watch::channel(false).0,
        }
    }

    /// Returns the shared store.
    pub fn store(&self) -> &Arc<SharedStateStore> {
        &self.store
    }

    /// Returns the all-absent default state.
    pub fn default_state(&self) -> &StateMap {
        &self.defaults
    }

    /// Watches whether a get request has been answered.
    ///
    /// Flips to `true` once a get response consumed its token and any
    /// resulting update was issued.
    pub fn get_answered(&self) -> watch::Receiver<bool> {
        self.answered.subscribe()
    }

    fn mark_answered(&self) {
        self.answered.send_replace(true);
    }

    /// Gets the current stats.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// Writes a locally decided state (control loop, shutdown).
    pub fn local_change(&self, candidate: &StateMap) -> Option<ClientToken> {
        self.evaluate_and_publish(candidate)
    }

    /// Applies `candidate` and publishes the resulting document if anything
    /// changed. Returns the token of the issued update.
    pub fn evaluate_and_publish(&self, candidate: &StateMap) -> Option<ClientToken> {
        let request = {
            let mut store = self.store.lock();
            self.evaluate(&mut store, candidate)?
        };
        Some(self.publish_update(request))
    }

    /// Applies `candidate` under an already held lock and builds the update
    /// to publish, if anything changed.
    fn evaluate(
        &self,
        store: &mut StoreGuard<'_>,
        candidate: &StateMap,
    ) -> Option<UpdateShadowRequest> {
        let changed = store.apply_if_changed(candidate);
        if changed.is_empty() {
            debug!("Shadow values are unchanged");
            self.stats.write().unchanged_writes += 1;
            return None;
        }
        info!("Shadow values that were changed - {:?}", changed);

        let clear = matches!(
            candidate.get(UPLOAD_ENABLE),
            Some(Some(value)) if value.is_clear_shadow()
        );
        let state = if clear {
            UpdateState::clear()
        } else {
            UpdateState::mirror(store.snapshot())
        };

        let client_token = ClientToken::generate();
        store.register_token(client_token.clone());
        Some(UpdateShadowRequest {
            thing_name: self.config.thing_name.clone(),
            shadow_name: self.config.shadow_name.clone(),
            state,
            client_token,
        })
    }

    fn publish_update(&self, request: UpdateShadowRequest) -> ClientToken {
        let token = request.client_token.clone();
        self.stats.write().updates_published += 1;
        self.spawn_publish("update", self.transport.publish_update(request));
        token
    }

    /// Requests the current document; the answer arrives as a get event.
    pub fn request_get(&self) -> ClientToken {
        let (token, publish) = self.prepare_get();
        self.spawn_publish("get", publish);
        token
    }

    /// Requests the current document and waits until the request is on the
    /// wire. Must not be awaited on the dispatch context.
    pub async fn fetch(&self) -> SyncResult<ClientToken> {
        let (token, publish) = self.prepare_get();
        publish.await.map_err(|e| SyncError::PublishFailure {
            operation: "get",
            message: e.to_string(),
        })?;
        Ok(token)
    }

    fn prepare_get(&self) -> (ClientToken, TransportFuture<()>) {
        let client_token = ClientToken::generate();
        self.store.register_token(client_token.clone());
        self.stats.write().gets_published += 1;
        let request = GetShadowRequest {
            thing_name: self.config.thing_name.clone(),
            shadow_name: self.config.shadow_name.clone(),
            client_token: client_token.clone(),
        };
        (client_token, self.transport.publish_get(request))
    }

    fn spawn_publish(&self, operation: &'static str, publish: TransportFuture<()>) {
        self.runtime.spawn(async move {
            match publish.await {
                Ok(()) => info!("Shadow {} request published.", operation),
                Err(e) => {
                    let err = SyncError::PublishFailure {
                        operation,
                        message: e.to_string(),
                    };
                    error!("{}", err);
                }
            }
        });
    }

    fn consume(
        &self,
        store: &mut StoreGuard<'_>,
        event: &'static str,
        token: Option<&ClientToken>,
    ) -> SyncResult<()> {
        match token {
            Some(token) if store.try_consume_token(token) => Ok(()),
            _ => {
                self.stats.write().stale_responses += 1;
                Err(SyncError::stale(event, token.cloned()))
            }
        }
    }

    /// Handles an unsolicited delta; always authoritative.
    pub fn on_delta(&self, event: &DeltaEvent) -> SyncResult<()> {
        if event.state.is_empty() {
            return Ok(());
        }
        self.evaluate_and_publish(&event.state);
        Ok(())
    }

    /// Handles the answer to a get request.
    ///
    /// Only acts as the bootstrap response while nothing is cached: a delta
    /// that arrived first wins over the slower fetch.
    pub fn on_get_accepted(&self, response: &AcceptedResponse) -> SyncResult<()> {
        let mut store = self.store.lock();
        self.consume(&mut store, "get/accepted", response.client_token.as_ref())?;
        info!("Finished getting initial shadow state.");

        if !store.is_pristine() {
            info!("Ignoring initial query because a delta event has already been received.");
            drop(store);
            self.mark_answered();
            return Ok(());
        }

        let request = match (response.delta(), response.reported()) {
            (Some(delta), _) => {
                info!("Shadow contains delta value '{:?}'.", delta);
                self.evaluate(&mut store, delta)
            }
            (None, Some(reported)) => {
                info!("Shadow contains reported value '{:?}'.", reported);
                store.apply_if_changed(reported);
                None
            }
            (None, None) => None,
        };
        drop(store);

        if let Some(request) = request {
            self.publish_update(request);
        }
        self.mark_answered();
        Ok(())
    }

    /// Handles a refused get request; a missing document is created from
    /// the defaults.
    pub fn on_get_rejected(&self, error: &ErrorResponse) -> SyncResult<()> {
        let mut store = self.store.lock();
        self.consume(&mut store, "get/rejected", error.client_token.as_ref())?;

        if error.is_not_found() {
            info!("Thing has no shadow document. Creating with defaults...");
            let request = self.evaluate(&mut store, &self.defaults);
            drop(store);
            if let Some(request) = request {
                self.publish_update(request);
            }
            self.mark_answered();
            return Ok(());
        }
        drop(store);
        self.mark_answered();

        self.stats.write().rejections += 1;
        Err(SyncError::Rejected {
            operation: "get",
            code: error.code,
            message: error.message.clone(),
        })
    }

    /// Handles a confirmed update.
    ///
    /// With a known token this confirms our own write; an absent `reported`
    /// means the document was cleared and the defaults are re-asserted. With
    /// an unknown token the update came from elsewhere and its `reported`
    /// section is adopted without publishing.
    pub fn on_update_accepted(&self, response: &AcceptedResponse) -> SyncResult<()> {
        let cleared = {
            let mut store = self.store.lock();
            match response.client_token.as_ref() {
                Some(token) if store.try_consume_token(token) => response.reported().is_none(),
                _ => {
                    info!("Shadow Update Request Initiated from Cloud");
                    if let Some(reported) = response.reported() {
                        let changed = store.apply_if_changed(reported);
                        debug!("Adopted cloud values - {:?}", changed);
                        self.stats.write().cloud_adoptions += 1;
                    }
                    return Ok(());
                }
            }
        };

        if cleared {
            info!("Clearing all shadow states.");
            self.evaluate_and_publish(&self.defaults);
        }
        Ok(())
    }

    /// Handles a refused update. Not retried.
    pub fn on_update_rejected(&self, error: &ErrorResponse) -> SyncResult<()> {
        {
            let mut store = self.store.lock();
            self.consume(&mut store, "update/rejected", error.client_token.as_ref())?;
        }

        self.stats.write().rejections += 1;
        Err(SyncError::Rejected {
            operation: "update",
            code: error.code,
            message: error.message.clone(),
        })
    }

    /// Returns the cached `upload_enable` value.
    pub fn upload_enable(&self) -> Option<AttributeValue> {
        self.store.get(UPLOAD_ENABLE)
    }
}

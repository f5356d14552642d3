//! Executes queued operations on the worker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use player_api::ProviderMode;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::repositories::{AllianceRepository, ChangeRepository, MemberRepository};
use crate::monitor::{ChangeDetector, PlayerFetcher};
use crate::notification::{StatusBroadcaster, StatusEvent};
use crate::queue::{Operation, OperationHandler, OperationKind, RateLimiter};

/// Routes each operation kind to the component that does the work.
///
/// Owned by the queue worker together with the rate limiter, which makes
/// the worker the only writer of the provider mode and the backoff state.
pub struct OperationDispatcher<F, A, M, C>
where
    F: PlayerFetcher + 'static,
    A: AllianceRepository + 'static,
    M: MemberRepository + 'static,
    C: ChangeRepository + 'static,
{
    fetcher: F,
    detector: Arc<ChangeDetector<A, M, C>>,
    events: StatusBroadcaster,
    provider_mode: watch::Sender<ProviderMode>,
}

impl<F, A, M, C> OperationDispatcher<F, A, M, C>
where
    F: PlayerFetcher + 'static,
    A: AllianceRepository + 'static,
    M: MemberRepository + 'static,
    C: ChangeRepository + 'static,
{
    pub fn new(
        fetcher: F,
        detector: Arc<ChangeDetector<A, M, C>>,
        events: StatusBroadcaster,
        provider_mode: watch::Sender<ProviderMode>,
    ) -> Self {
        Self {
            fetcher,
            detector,
            events,
            provider_mode,
        }
    }

    async fn probe_providers(&mut self) {
        let mode = self.fetcher.probe_providers().await;
        let description = mode.description();
        if mode.is_available() {
            info!("Provider probe: {}", description);
        } else {
            warn!("Provider probe: {}", description);
        }
        self.provider_mode.send_replace(mode.clone());
        self.events.publish(StatusEvent::ProviderMode {
            description,
            mode,
            timestamp: Utc::now(),
        });
    }
}

#[async_trait]
impl<F, A, M, C> OperationHandler for OperationDispatcher<F, A, M, C>
where
    F: PlayerFetcher + 'static,
    A: AllianceRepository + 'static,
    M: MemberRepository + 'static,
    C: ChangeRepository + 'static,
{
    async fn execute(&mut self, operation: Operation, limiter: &mut RateLimiter) -> Result<()> {
        match operation.kind {
            OperationKind::AllianceCheck { alliance_id } => {
                self.detector
                    .check_alliance(alliance_id, &self.fetcher, limiter)
                    .await?;
            }
            OperationKind::MemberRefresh { alliance_id } => {
                self.detector
                    .refresh_members(alliance_id, &self.fetcher, limiter)
                    .await?;
            }
            OperationKind::PlayerLookup {
                player_id,
                proxy,
                reply,
            } => {
                limiter.wait_until_ready().await;
                let result = self.fetcher.fetch_player(player_id, proxy.as_deref()).await;
                if let Some(wait) = limiter.on_response(&result) {
                    self.events.publish(StatusEvent::ThrottleWait {
                        player_id: Some(player_id),
                        wait_secs: wait.as_secs(),
                        consecutive_throttles: limiter.state().consecutive_throttles,
                        timestamp: Utc::now(),
                    });
                }
                debug!(player_id, result = result.label(), "Lookup finished");
                if reply.send(result).is_err() {
                    debug!(player_id, "Lookup requester went away");
                }
            }
            OperationKind::ProbeProviders => self.probe_providers().await,
        }
        Ok(())
    }
}

use std::sync::Arc;

use async_trait::async_trait;

use crate::delivery::DeliveryClient;
use crate::domain::{BroadcastRun, BroadcastStatus, DeliveryLog, DeliveryStatus, JobError};
use crate::ports::{BroadcastStore, CredentialStore, DeliveryLogStore, IdGenerator, OutboundMessage};
use crate::quota::QuotaGate;
use crate::vault::CredentialVault;

use super::{Handler, TaskContext, open_credential};

/// Sends a stored broadcast to every recipient. Per-recipient failures are
/// counted on the broadcast, not returned. Recipients past the tenant's
/// remaining monthly allowance are counted as failed without a send.
pub struct BroadcastHandler {
    pub broadcasts: Arc<dyn BroadcastStore>,
    pub quota: Arc<QuotaGate>,
    pub credentials: Arc<dyn CredentialStore>,
    pub vault: Arc<CredentialVault>,
    pub client: Arc<DeliveryClient>,
    pub logs: Arc<dyn DeliveryLogStore>,
    pub ids: Arc<dyn IdGenerator>,
}

#[async_trait]
impl Handler<BroadcastRun> for BroadcastHandler {
    async fn handle(&self, ctx: &TaskContext, p: BroadcastRun) -> Result<(), JobError> {
        let mut broadcast = self
            .broadcasts
            .broadcast(p.broadcast_id)
            .await?
            .ok_or_else(|| JobError::malformed(format!("broadcast {} not found", p.broadcast_id)))?;
        if broadcast.status == BroadcastStatus::Sent {
            tracing::debug!(broadcast_id = %broadcast.id, "broadcast already sent");
            return Ok(());
        }

        let mut allowance = self.quota.check(broadcast.tenant_id, ctx.now).await?.remaining();
        let (credential, token) = open_credential(
            self.credentials.as_ref(),
            &self.vault,
            broadcast.credential_id,
            broadcast.tenant_id,
            broadcast.channel,
        )
        .await?;

        let (mut sent, mut failed, mut over_quota) = (0u64, 0u64, 0u64);
        for recipient in &broadcast.recipients {
            if allowance == Some(0) {
                failed += 1;
                over_quota += 1;
                continue;
            }
            let message = OutboundMessage {
                channel: broadcast.channel,
                account_id: credential.account_id.clone(),
                recipient: recipient.clone(),
                text: broadcast.message.clone(),
            };
            match self.client.send(&message, &token).await {
                Ok(receipt) => {
                    sent += 1;
                    allowance = allowance.map(|left| left.saturating_sub(1));
                    let entry = DeliveryLog {
                        id: self.ids.generate_log_id(),
                        tenant_id: broadcast.tenant_id,
                        channel: broadcast.channel,
                        recipient: recipient.clone(),
                        status: DeliveryStatus::Success,
                        message: message.text,
                        message_id: receipt.message_id,
                        error: None,
                        source: Some("broadcast".to_string()),
                        task_id: ctx.task_id,
                        attempt: ctx.attempt,
                        created_at: ctx.now,
                    };
                    if let Err(e) = self.logs.append(entry).await {
                        tracing::error!(broadcast_id = %broadcast.id, error = %e, "delivery log write failed");
                    }
                }
                Err(failure) => {
                    failed += 1;
                    tracing::debug!(
                        broadcast_id = %broadcast.id,
                        kind = ?failure.kind,
                        error = %failure.message,
                        "broadcast recipient failed"
                    );
                }
            }
        }

        broadcast.sent_count = sent;
        broadcast.failed_count = failed;
        broadcast.status = BroadcastStatus::Sent;
        broadcast.sent_at = Some(ctx.now);
        let id = broadcast.id;
        self.broadcasts.save_broadcast(broadcast).await?;
        if over_quota > 0 {
            tracing::warn!(broadcast_id = %id, over_quota, "monthly delivery limit reached mid-broadcast");
        }
        tracing::info!(broadcast_id = %id, sent, failed, "broadcast sent");
        Ok(())
    }
}

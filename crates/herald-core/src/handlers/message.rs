use std::sync::Arc;

use async_trait::async_trait;

use crate::delivery::{DeliveryClient, FailureKind};
use crate::domain::{DeliveryLog, DeliveryStatus, JobError, MessageDelivery, TokenStatus};
use crate::ports::{CredentialStore, DeliveryLogStore, IdGenerator, OutboundMessage};
use crate::quota::QuotaGate;
use crate::template;
use crate::vault::CredentialVault;

use super::{Handler, TaskContext, open_credential};

/// Sends one direct message: quota → template → credential → send → log.
pub struct MessageDeliveryHandler {
    pub quota: Arc<QuotaGate>,
    pub credentials: Arc<dyn CredentialStore>,
    pub vault: Arc<CredentialVault>,
    pub client: Arc<DeliveryClient>,
    pub logs: Arc<dyn DeliveryLogStore>,
    pub ids: Arc<dyn IdGenerator>,
}

#[async_trait]
impl Handler<MessageDelivery> for MessageDeliveryHandler {
    async fn handle(&self, ctx: &TaskContext, p: MessageDelivery) -> Result<(), JobError> {
        self.quota.check(p.tenant_id, ctx.now).await?;

        let text = template::render(&p.body, &p.variables);
        let (credential, token) = open_credential(
            self.credentials.as_ref(),
            &self.vault,
            p.credential_id,
            p.tenant_id,
            p.channel,
        )
        .await?;

        let message = OutboundMessage {
            channel: p.channel,
            account_id: credential.account_id.clone(),
            recipient: p.recipient.clone(),
            text,
        };

        let receipt = match self.client.send(&message, &token).await {
            Ok(receipt) => receipt,
            Err(failure) => {
                if failure.kind == FailureKind::Auth {
                    tracing::warn!(
                        task_id = %ctx.task_id,
                        credential_id = %credential.id,
                        "token rejected, marking credential expired"
                    );
                    if let Err(e) = self
                        .credentials
                        .mark_status(credential.id, TokenStatus::Expired)
                        .await
                    {
                        tracing::error!(credential_id = %credential.id, error = %e, "failed to mark credential expired");
                    }
                }
                return Err(failure.into());
            }
        };

        let entry = DeliveryLog {
            id: self.ids.generate_log_id(),
            tenant_id: p.tenant_id,
            channel: p.channel,
            recipient: p.recipient,
            status: DeliveryStatus::Success,
            message: message.text,
            message_id: receipt.message_id,
            error: None,
            source: p.source,
            task_id: ctx.task_id,
            attempt: ctx.attempt,
            created_at: ctx.now,
        };
        // Already sent: a failed log write must not trigger a resend.
        if let Err(e) = self.logs.append(entry).await {
            tracing::error!(task_id = %ctx.task_id, error = %e, "delivery log write failed");
        }
        Ok(())
    }
}

//! Handlers - タスク種別ごとの処理
//!
//! # 学習ポイント
//! - ジェネリック trait (`Handler<P>`)：ペイロードの型ごとに別の Handler
//! - `HandlerSet::dispatch` は `TaskPayload` を網羅的に match するので、
//!   種別を追加して Handler を書き忘れるとコンパイルエラーになる
//!
//! Handler は `JobError` を返すだけで、リトライ方針は決めない（Decider の仕事）。

mod broadcast;
mod cleanup;
mod message;
mod sequence;

pub use broadcast::BroadcastHandler;
pub use cleanup::CleanupHandler;
pub use message::MessageDeliveryHandler;
pub use sequence::SequenceStepHandler;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    BroadcastRun, Channel, Cleanup, CredentialId, CredentialRecord, JobError, MessageDelivery,
    SequenceStep, TaskId, TaskPayload, TenantId,
};
use crate::ports::CredentialStore;
use crate::vault::{CredentialVault, SecretToken};

/// What a handler knows about the execution it is part of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    pub task_id: TaskId,
    /// 1-based number of this execution.
    pub attempt: u32,
    pub now: DateTime<Utc>,
}

/// Handler は型付きペイロードを処理する
///
/// # ジェネリクスによる型安全性
/// - `Handler<MessageDelivery>` は `MessageDelivery` しか受け取れない
#[async_trait]
pub trait Handler<P: Send + 'static>: Send + Sync {
    async fn handle(&self, ctx: &TaskContext, payload: P) -> Result<(), JobError>;
}

/// One handler per task kind.
#[derive(Clone)]
pub struct HandlerSet {
    pub message: Arc<dyn Handler<MessageDelivery>>,
    pub sequence: Arc<dyn Handler<SequenceStep>>,
    pub broadcast: Arc<dyn Handler<BroadcastRun>>,
    pub cleanup: Arc<dyn Handler<Cleanup>>,
}

impl HandlerSet {
    pub async fn dispatch(&self, ctx: &TaskContext, payload: TaskPayload) -> Result<(), JobError> {
        match payload {
            TaskPayload::MessageDelivery(p) => self.message.handle(ctx, p).await,
            TaskPayload::SequenceStep(p) => self.sequence.handle(ctx, p).await,
            TaskPayload::Broadcast(p) => self.broadcast.handle(ctx, p).await,
            TaskPayload::Cleanup(p) => self.cleanup.handle(ctx, p).await,
        }
    }
}

/// Loads a credential and decrypts its token. Anything short of a valid,
/// decryptable `channel` credential owned by `tenant` is a credential error.
pub(crate) async fn open_credential(
    store: &dyn CredentialStore,
    vault: &CredentialVault,
    id: CredentialId,
    tenant: TenantId,
    channel: Channel,
) -> Result<(CredentialRecord, SecretToken), JobError> {
    let record = store
        .get(id)
        .await?
        .ok_or_else(|| JobError::credential(format!("credential {id} not found")))?;
    if record.tenant_id != tenant {
        return Err(JobError::credential(format!(
            "credential {id} does not belong to tenant {tenant}"
        )));
    }
    if record.channel != channel {
        return Err(JobError::credential(format!(
            "credential {id} is for {}, not {channel}",
            record.channel
        )));
    }
    if !record.is_usable() {
        return Err(JobError::credential(format!(
            "credential {id} is {:?}",
            record.token_status
        )));
    }
    let token = vault
        .decrypt(&record.secret)
        .map_err(|e| JobError::credential(format!("credential {id}: {e}")))?;
    Ok((record, token))
}

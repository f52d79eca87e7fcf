use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use herald_core::app::AppBuilder;
use herald_core::config::HeraldConfig;
use herald_core::delivery::GraphMessagingApi;
use herald_core::domain::{
    Channel, CredentialId, MessageDelivery, Subscription, SubscriptionStatus, TaskPayload,
    TenantId,
};
use herald_core::impls::{InMemoryRecords, InMemoryTaskStore, LogEmailSender};
use herald_core::telemetry;
use herald_core::vault::{CredentialVault, KeyRing, NewCredential, SecretToken, VaultKey};

/// デモ用の環境変数（設定ファイルには載せない）
const DEMO_TOKEN_VAR: &str = "HERALD_DEMO_TOKEN";
const DEMO_ACCOUNT_VAR: &str = "HERALD_DEMO_ACCOUNT_ID";
const DEMO_RECIPIENT_VAR: &str = "HERALD_DEMO_RECIPIENT";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // (A) 設定とログ
    let config = HeraldConfig::load().context("loading configuration")?;
    telemetry::init(&config.telemetry);

    // (B) in-memory ストア + Graph API クライアントで組み立て
    let records = Arc::new(InMemoryRecords::new());
    let api = GraphMessagingApi::new(config.messaging.settings())
        .context("building the Graph API client")?;

    let mut builder = AppBuilder::new(config.clone())
        .task_store(Arc::new(InMemoryTaskStore::new()))
        .with_in_memory_records(records.clone())
        .messaging_api(Arc::new(api))
        .email_sender(Arc::new(LogEmailSender));
    if config.vault.current_key.is_none() {
        tracing::warn!("no vault key configured, using a throwaway key for this run");
        builder = builder.vault(Arc::new(CredentialVault::new(KeyRing::new(
            VaultKey::generate(),
        ))));
    }
    let app = builder.build().context("wiring the application")?;

    // (C) デモ用テナントと資格情報
    let tenant = TenantId::generate();
    records
        .put_subscription(Subscription {
            tenant_id: tenant,
            plan: "creator".into(),
            status: SubscriptionStatus::Active,
        })
        .await;
    let credential = app
        .credentials()
        .store_token(NewCredential {
            id: CredentialId::generate(),
            tenant_id: tenant,
            channel: Channel::Instagram,
            account_id: std::env::var(DEMO_ACCOUNT_VAR).unwrap_or_else(|_| "me".into()),
            token: SecretToken::new(
                std::env::var(DEMO_TOKEN_VAR).unwrap_or_else(|_| "demo-token".into()),
            ),
            expires_at: Some(chrono::Utc::now() + chrono::Duration::days(60)),
        })
        .await
        .context("storing the demo credential")?;
    tracing::info!(tenant_id = %tenant, credential_id = %credential.id, "demo tenant ready");

    // (D) タスク投入：定期 cleanup と、指定があればデモメッセージ
    let cleanup = app.schedule_cleanup().await?;
    tracing::info!(task_id = %cleanup.id, "cleanup scheduled");

    if let Ok(recipient) = std::env::var(DEMO_RECIPIENT_VAR) {
        let mut variables = BTreeMap::new();
        variables.insert("firstName".to_string(), "there".to_string());
        let task = app
            .enqueue(TaskPayload::MessageDelivery(MessageDelivery {
                tenant_id: tenant,
                credential_id: credential.id,
                channel: Channel::Instagram,
                recipient,
                body: "Hi {{firstName}}, thanks for reaching out!".into(),
                variables,
                source: Some("cli-demo".into()),
                rule_id: None,
            }))
            .await?;
        tracing::info!(task_id = %task.id, "demo message enqueued");
    }

    // (E) Ctrl-C まで poller を回す
    let poller = app.spawn_poller();
    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested, waiting for the current tick");
    poller.shutdown_and_join().await;

    let counts = app.queue_counts().await?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    println!(
        "{}",
        serde_json::to_string_pretty(&app.breaker_snapshot())?
    );
    Ok(())
}

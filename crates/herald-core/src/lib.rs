//! herald-core
//!
//! Asynchronous delivery queue for outbound messaging: persisted task records,
//! retries with exponential backoff, a circuit breaker in front of the
//! messaging API, per-tenant monthly quotas and encrypted channel credentials.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, payload, decision, errors, credential, plan, ...）
//! - **ports**: 抽象化レイヤー（TaskStore, レコード系ストア, MessagingApi, EmailSender, Clock）
//! - **impls**: 実装（InMemoryTaskStore, InMemoryRecords など開発・テスト用）
//! - **vault**: 資格情報の暗号化（AES-256-GCM, 旧 CBC の読み取り）
//! - **delivery**: サーキットブレーカーと外部 API クライアント
//! - **quota**: プランごとの月間上限チェック
//! - **handlers**: タスク種別ごとの処理
//! - **app**: builder, processor, poller
//! - **config / telemetry**: 設定読み込みとログ初期化

pub mod app;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod impls;
pub mod ports;
pub mod quota;
pub mod telemetry;
pub mod template;
pub mod vault;

#[cfg(test)]
pub(crate) mod testkit;

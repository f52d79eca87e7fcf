//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: タスクレコードの正本（単一プロセス用）
//! - **InMemoryRecords**: 資格情報・プラン・配信ログ・シーケンス・ブロードキャスト
//! - **LogEmailSender**: メールを送らずログに出すだけ
//!
//! HTTP の `MessagingApi` 実装は `delivery::graph` にあります。

pub mod log_email;
pub mod memory_records;
pub mod memory_store;

// 主要な型を再エクスポート
pub use self::log_email::LogEmailSender;
pub use self::memory_records::InMemoryRecords;
pub use self::memory_store::InMemoryTaskStore;

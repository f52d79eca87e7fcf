//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（DB、メッセージング API、メール配信など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! 開発・テスト用の実装は `impls` にあります。

pub mod clock;
pub mod id_generator;
pub mod messaging;
pub mod records;
pub mod task_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::messaging::{
    ApiResponse, EmailError, EmailReceipt, EmailSender, MessagingApi, OutboundMessage,
    TransportError,
};
pub use self::records::{
    BroadcastStore, CredentialStore, DeliveryLogStore, PlanStore, PlatformSettings,
    SequenceStore,
};
pub use self::task_store::{ClaimCriteria, TaskStore};

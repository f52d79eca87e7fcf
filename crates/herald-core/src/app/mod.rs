//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: ワイヤリングと運用向けの操作
//! - **JobProcessor**: claim → dispatch → decide → persist
//! - **Poller**: 期限の来たタスクを定期的に拾うループ

pub mod builder;
pub mod poller;
pub mod processor;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::poller::{Poller, PollerHandle, PollerSettings, TickReport};
pub use self::processor::{JobProcessor, KILL_SWITCH_REASON, ProcessError, ProcessorParts};

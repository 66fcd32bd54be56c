//! 核心服务 / Core services
//!
//! 幂等门、已读聚合、在线与输入状态、事件扇出、消息生命周期
//! Idempotency gate, read aggregation, presence/typing, event fan-out,
//! message lifecycle

pub mod events;
pub mod idempotency;
pub mod message;
pub mod presence;
pub mod receipts;
pub mod typing;

pub use events::EventRouter;
pub use idempotency::{Admission, IdempotencyGate, TokenState};
pub use message::MessageService;
pub use presence::{PresenceStatus, PresenceTracker};
pub use receipts::ReadReceiptAggregator;
pub use typing::TypingTracker;

//! 已读回执聚合 / Read-receipt aggregation
//!
//! 状态机：`delivered → read`，终态，删除消息不回退。
//! 规则：除作者外的全部现任成员都已读时消息才算read。
//! State machine: `delivered → read`, terminal; deleting never resets.
//! Rule: a message is read once every current member except the author has
//! read it, in group and direct chats alike.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{ChatEvent, ChatId, MessageId, MessageRecord, MessageStatus, UserId};
use crate::repo::{ChatStore, ChatUnitOfWork, DurableResult};

use super::EventRouter;

pub struct ReadReceiptAggregator {
    durable: Arc<dyn ChatStore>,
    router: Arc<EventRouter>,
}

impl ReadReceiptAggregator {
    pub fn new(durable: Arc<dyn ChatStore>, router: Arc<EventRouter>) -> Self {
        Self { durable, router }
    }

    /// 把会话中他人撰写且未读的消息全部标记为已读，返回触达的消息ID
    /// Mark every unread message authored by others in the chat; returns the
    /// touched message ids
    ///
    /// 标记与聚合在同一事务内；提交后才扇出，扇出失败不重跑事务
    /// Marks and aggregation share one transaction; fan-out runs after commit
    /// and a fan-out failure never re-runs the transaction
    pub async fn mark_read(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> DurableResult<Vec<MessageId>> {
        let mut uow = self.durable.begin().await?;
        let outcome = aggregate(uow.as_mut(), chat_id, user_id).await;
        let (touched, transitioned) = match outcome {
            Ok(result) => result,
            Err(e) => {
                let _ = uow.rollback().await;
                return Err(e);
            }
        };
        uow.commit().await?;

        if !touched.is_empty() {
            // 已读状态此刻已持久；接收者名单取不到就放弃这次提示
            // Read state is durable by now; if recipients cannot be resolved
            // this low-latency hint is simply skipped
            match self.durable.chat_participants(chat_id).await {
                Ok(recipients) => {
                    self.router
                        .publish(&ChatEvent::message_read(chat_id, user_id, &touched), &recipients)
                        .await;
                    for message in &transitioned {
                        self.router
                            .publish(&ChatEvent::message_updated(message), &recipients)
                            .await;
                    }
                }
                Err(e) => warn!("skipping read fan-out for chat {}: {}", chat_id, e),
            }
        }
        Ok(touched)
    }
}

/// 事务内聚合 / Aggregation inside the transaction
async fn aggregate(
    uow: &mut dyn ChatUnitOfWork,
    chat_id: ChatId,
    user_id: UserId,
) -> DurableResult<(Vec<MessageId>, Vec<MessageRecord>)> {
    let touched = uow.unread_message_ids(chat_id, user_id).await?;
    for &message_id in &touched {
        // 唯一约束把并发重复变成空操作 / the unique constraint turns races into no-ops
        uow.create_read_mark(message_id, user_id).await?;
    }

    let mut transitioned = Vec::new();
    for &message_id in &touched {
        let Some(message) = uow.get_message(message_id).await? else {
            continue;
        };
        if message.status == MessageStatus::Read {
            continue;
        }
        // 成员名单每轮重新取：expectedReads随成员变动而变化，禁止缓存快照
        // Membership is re-fetched every round: expectedReads moves with
        // membership churn, snapshots are forbidden
        let participants = uow.chat_participants(chat_id).await?;
        let author_is_member = message
            .author_id
            .map(|author| participants.contains(&author))
            .unwrap_or(false);
        let expected = if author_is_member {
            participants.len().saturating_sub(1)
        } else {
            participants.len()
        };
        if expected == 0 {
            continue;
        }
        let count = uow.read_mark_count(message_id).await? as usize;
        if count >= expected && uow.set_message_status(message_id, MessageStatus::Read).await? {
            let mut message = message;
            message.status = MessageStatus::Read;
            transitioned.push(message);
        }
    }
    debug!(
        "📖 chat {} reader {}: {} marked, {} transitioned",
        chat_id,
        user_id,
        touched.len(),
        transitioned.len()
    );
    Ok((touched, transitioned))
}

//! 占位消息协调
//!
//! 发送前乐观插入一条"思考中"的助手占位消息；第一个携带内容的
//! 事件到来时，原子地完成三件事：删掉占位、删掉列表里其他内容为空
//! 的助手消息（清理此前失败尝试留下的残渣）、在占位原来的位置插入
//! 真实消息。之后的更新一律按稳定 id 修改真实消息。
//!
//! 所有操作都是 id 键控的纯列表手术，不依赖下标，即使列表在挂起点
//! 之间被改写也保持正确。

use crate::models::Message;

/// 插入助手占位消息，返回其 id
pub fn insert_placeholder(messages: &mut Vec<Message>) -> String {
    let placeholder = Message::placeholder();
    let id = placeholder.id.clone();
    messages.push(placeholder);
    id
}

/// 用真实助手消息替换占位
///
/// 占位和其他空助手消息一并移除，真实消息插入占位原先的位置；
/// 占位已不在列表时追加到末尾。
pub fn promote_placeholder(messages: &mut Vec<Message>, placeholder_id: &str, real: Message) {
    let placeholder_idx = messages.iter().position(|m| m.id == placeholder_id);

    // 待删集合：占位本身 + 其他空的助手消息
    let doomed: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.id == placeholder_id || m.is_empty_assistant())
        .map(|(i, _)| i)
        .collect();

    // 插入点 = 占位位置减去它前面被删掉的条数
    let insert_at = match placeholder_idx {
        Some(idx) => idx - doomed.iter().filter(|&&d| d < idx).count(),
        None => messages.len() - doomed.len(),
    };

    let mut keep = Vec::with_capacity(messages.len());
    for (i, msg) in messages.drain(..).enumerate() {
        if !doomed.contains(&i) {
            keep.push(msg);
        }
    }
    *messages = keep;

    let insert_at = insert_at.min(messages.len());
    messages.insert(insert_at, real);
}

/// 按 id 移除消息；不存在时为 no-op
pub fn remove_message(messages: &mut Vec<Message>, id: &str) {
    messages.retain(|m| m.id != id);
}

/// 按 id 就地修改消息；返回是否命中
pub fn update_message<F>(messages: &mut [Message], id: &str, mutate: F) -> bool
where
    F: FnOnce(&mut Message),
{
    match messages.iter_mut().find(|m| m.id == id) {
        Some(msg) => {
            mutate(msg);
            true
        }
        None => false,
    }
}

// ============================================================================
// 测试模块
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;

    #[test]
    fn test_insert_placeholder_is_pending() {
        let mut messages = vec![Message::user("oi")];
        let id = insert_placeholder(&mut messages);
        assert_eq!(messages.len(), 2);
        let ph = messages.iter().find(|m| m.id == id).unwrap();
        assert!(ph.pending);
    }

    #[test]
    fn test_promote_replaces_in_place() {
        let mut messages = vec![Message::user("primeira")];
        let ph_id = insert_placeholder(&mut messages);
        messages.push(Message::user("segunda"));

        let real = Message::assistant(Some("ops-large"), false);
        let real_id = real.id.clone();
        promote_placeholder(&mut messages, &ph_id, real);

        assert_eq!(messages.len(), 3);
        // 真实消息占据占位原先的位置（两条用户消息之间）
        assert_eq!(messages[1].id, real_id);
        assert!(!messages.iter().any(|m| m.id == ph_id));
    }

    #[test]
    fn test_promote_drops_other_empty_assistants() {
        let mut messages = vec![Message::user("oi")];
        // 此前失败尝试留下的空助手消息
        messages.push(Message::assistant(None, false));
        let ph_id = insert_placeholder(&mut messages);

        let real = Message::assistant(None, false);
        let real_id = real.id.clone();
        promote_placeholder(&mut messages, &ph_id, real);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].id, real_id);
    }

    #[test]
    fn test_promote_missing_placeholder_appends() {
        let mut messages = vec![Message::user("oi")];
        let real = Message::assistant(None, false);
        let real_id = real.id.clone();
        promote_placeholder(&mut messages, "inexistente", real);
        assert_eq!(messages.last().unwrap().id, real_id);
    }

    #[test]
    fn test_update_message_by_id() {
        let mut messages = vec![Message::user("oi")];
        let id = messages[0].id.clone();
        assert!(update_message(&mut messages, &id, |m| {
            m.content.push_str(" de novo")
        }));
        assert_eq!(messages[0].content, "oi de novo");
        assert!(!update_message(&mut messages, "ghost", |_| {}));
    }

    #[test]
    fn test_remove_message_noop_for_unknown() {
        let mut messages = vec![Message::user("oi")];
        remove_message(&mut messages, "ghost");
        assert_eq!(messages.len(), 1);
    }
}

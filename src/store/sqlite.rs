//! SQLite 存储实现
//!
//! 单连接加互斥锁。列表类字段（附件、制品 id）存 JSON 文本列，
//! 时间戳统一 RFC3339 字符串。消息排序依赖 rowid，更新走
//! `ON CONFLICT DO UPDATE` 以保持插入顺序不变。

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::{SessionMessageStore, StoreError};
use crate::models::{Artifact, ArtifactSource, ArtifactType, Message, MessageRole, Session};

/// SQLite 会话存储
pub struct SqliteMessageStore {
    conn: Mutex<Connection>,
}

impl SqliteMessageStore {
    /// 打开（必要时创建）数据库文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("[STORE] 数据库已打开: {}", path.display());
        Ok(store)
    }

    /// 内存数据库（测试用）
    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id           TEXT PRIMARY KEY,
                session_id   TEXT NOT NULL,
                role         TEXT NOT NULL,
                content      TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                model        TEXT,
                web_search   INTEGER NOT NULL DEFAULT 0,
                edited_at    TEXT,
                attachments  TEXT NOT NULL DEFAULT '[]',
                artifact_ids TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS artifacts (
                id            TEXT PRIMARY KEY,
                session_id    TEXT NOT NULL,
                message_id    TEXT NOT NULL,
                artifact_type TEXT NOT NULL,
                title         TEXT NOT NULL,
                content       TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                source        TEXT NOT NULL,
                intent        TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
            CREATE INDEX IF NOT EXISTS idx_artifacts_session ON artifacts(session_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SessionMessageStore for SqliteMessageStore {
    fn upsert_session(&self, session: &Session) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sessions (id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET title = ?2, updated_at = ?4",
            params![
                session.id,
                session.title,
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let conn = self.lock();
        let row: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT id, title, created_at, updated_at FROM sessions WHERE id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        match row {
            Some((id, title, created_at, updated_at)) => Ok(Some(Session {
                id,
                title,
                created_at: parse_ts(&created_at)?,
                updated_at: parse_ts(&updated_at)?,
            })),
            None => Ok(None),
        }
    }

    fn touch_session(&self, session_id: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), session_id],
        )?;
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, updated_at FROM sessions ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut sessions = Vec::with_capacity(rows.len());
        for (id, title, created_at, updated_at) in rows {
            sessions.push(Session {
                id,
                title,
                created_at: parse_ts(&created_at)?,
                updated_at: parse_ts(&updated_at)?,
            });
        }
        Ok(sessions)
    }

    fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute("DELETE FROM artifacts WHERE session_id = ?1", params![session_id])?;
        conn.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(())
    }

    fn save_message(&self, session_id: &str, message: &Message) -> Result<(), StoreError> {
        let attachments = serde_json::to_string(&message.attachments)?;
        let artifact_ids = serde_json::to_string(&message.artifact_ids)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO messages
                 (id, session_id, role, content, created_at, model, web_search,
                  edited_at, attachments, artifact_ids)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 content = ?4, model = ?6, web_search = ?7,
                 edited_at = ?8, attachments = ?9, artifact_ids = ?10",
            params![
                message.id,
                session_id,
                message.role.as_str(),
                message.content,
                message.created_at.to_rfc3339(),
                message.model,
                message.web_search as i64,
                message.edited_at.map(|t| t.to_rfc3339()),
                attachments,
                artifact_ids,
            ],
        )?;
        Ok(())
    }

    fn delete_message(&self, session_id: &str, message_id: &str) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM messages WHERE session_id = ?1 AND id = ?2",
            params![session_id, message_id],
        )?;
        conn.execute(
            "DELETE FROM artifacts WHERE session_id = ?1 AND message_id = ?2",
            params![session_id, message_id],
        )?;
        Ok(())
    }

    fn load_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, role, content, created_at, model, web_search,
                    edited_at, attachments, artifact_ids
             FROM messages WHERE session_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut messages = Vec::with_capacity(rows.len());
        for (id, role, content, created_at, model, web_search, edited_at, attachments, artifact_ids) in
            rows
        {
            messages.push(Message {
                id,
                role: parse_role(&role)?,
                content,
                created_at: parse_ts(&created_at)?,
                model,
                web_search: web_search != 0,
                edited_at: edited_at.as_deref().map(parse_ts).transpose()?,
                attachments: serde_json::from_str(&attachments)?,
                artifact_ids: serde_json::from_str(&artifact_ids)?,
                pending: false,
            });
        }
        Ok(messages)
    }

    fn save_artifact(&self, artifact: &Artifact) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO artifacts
                 (id, session_id, message_id, artifact_type, title, content,
                  created_at, source, intent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 title = ?5, content = ?6, source = ?8, intent = ?9",
            params![
                artifact.id,
                artifact.session_id,
                artifact.message_id,
                artifact.artifact_type.as_str(),
                artifact.title,
                artifact.content,
                artifact.created_at.to_rfc3339(),
                artifact.source.as_str(),
                artifact.intent,
            ],
        )?;
        Ok(())
    }

    fn load_artifacts(&self, session_id: &str) -> Result<Vec<Artifact>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, message_id, artifact_type, title, content, created_at, source, intent
             FROM artifacts WHERE session_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut artifacts = Vec::with_capacity(rows.len());
        for (id, message_id, artifact_type, title, content, created_at, source, intent) in rows {
            artifacts.push(Artifact {
                id,
                session_id: session_id.to_string(),
                message_id,
                artifact_type: ArtifactType::parse(&artifact_type)
                    .ok_or_else(|| StoreError::Corrupt(format!("未知制品类型: {}", artifact_type)))?,
                title,
                content,
                created_at: parse_ts(&created_at)?,
                source: ArtifactSource::parse(&source)
                    .ok_or_else(|| StoreError::Corrupt(format!("未知制品来源: {}", source)))?,
                intent,
            });
        }
        Ok(artifacts)
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("非法时间戳 {}: {}", s, e)))
}

fn parse_role(s: &str) -> Result<MessageRole, StoreError> {
    match s {
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        other => Err(StoreError::Corrupt(format!("未知消息角色: {}", other))),
    }
}

// ============================================================================
// 测试模块
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_roundtrip_and_ordering() {
        let store = SqliteMessageStore::in_memory().unwrap();
        let mut a = Session::new("primeira");
        let b = Session::new("segunda");
        store.upsert_session(&a).unwrap();
        store.upsert_session(&b).unwrap();

        // a 被触摸后应排到最前
        a.updated_at = Utc::now() + chrono::Duration::seconds(5);
        store.upsert_session(&a).unwrap();

        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, a.id);
        assert_eq!(sessions[0].title, "primeira");
    }

    #[test]
    fn test_message_roundtrip_preserves_fields() {
        let store = SqliteMessageStore::in_memory().unwrap();
        let session = Session::new("t");
        store.upsert_session(&session).unwrap();

        let user = Message::user("o que houve?");
        let mut assistant = Message::assistant(Some("ops-large"), true);
        assistant.content = "Olá!".to_string();
        assistant.artifact_ids.push("a1".to_string());

        store.save_message(&session.id, &user).unwrap();
        store.save_message(&session.id, &assistant).unwrap();

        let loaded = store.load_messages(&session.id).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].role, MessageRole::User);
        assert_eq!(loaded[1].content, "Olá!");
        assert_eq!(loaded[1].model.as_deref(), Some("ops-large"));
        assert!(loaded[1].web_search);
        assert_eq!(loaded[1].artifact_ids, vec!["a1".to_string()]);
        assert!(!loaded[1].pending);
    }

    #[test]
    fn test_message_update_keeps_position() {
        let store = SqliteMessageStore::in_memory().unwrap();
        let session = Session::new("t");
        store.upsert_session(&session).unwrap();

        let first = Message::user("um");
        let second = Message::user("dois");
        store.save_message(&session.id, &first).unwrap();
        store.save_message(&session.id, &second).unwrap();

        let mut edited = first.clone();
        edited.content = "um editado".to_string();
        edited.edited_at = Some(Utc::now());
        store.save_message(&session.id, &edited).unwrap();

        let loaded = store.load_messages(&session.id).unwrap();
        assert_eq!(loaded[0].content, "um editado");
        assert!(loaded[0].edited_at.is_some());
        assert_eq!(loaded[1].content, "dois");
    }

    #[test]
    fn test_artifact_roundtrip() {
        let store = SqliteMessageStore::in_memory().unwrap();
        let artifact = Artifact {
            id: "a1".to_string(),
            session_id: "s1".to_string(),
            message_id: "m1".to_string(),
            artifact_type: ArtifactType::RcaAnalysis,
            title: "Análise de Causa Raiz".to_string(),
            content: "## Causa\nDisco cheio.".to_string(),
            created_at: Utc::now(),
            source: ArtifactSource::Llm,
            intent: Some("diagnose".to_string()),
        };
        store.save_artifact(&artifact).unwrap();

        let loaded = store.load_artifacts("s1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].artifact_type, ArtifactType::RcaAnalysis);
        assert_eq!(loaded[0].source, ArtifactSource::Llm);
        assert_eq!(loaded[0].intent.as_deref(), Some("diagnose"));
    }

    #[test]
    fn test_delete_session_cascades() {
        let store = SqliteMessageStore::in_memory().unwrap();
        let session = Session::new("t");
        store.upsert_session(&session).unwrap();
        store
            .save_message(&session.id, &Message::user("oi"))
            .unwrap();

        store.delete_session(&session.id).unwrap();
        assert!(store.get_session(&session.id).unwrap().is_none());
        assert!(store.load_messages(&session.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_message_removes_its_artifacts() {
        let store = SqliteMessageStore::in_memory().unwrap();
        let msg = Message::user("oi");
        store.save_message("s1", &msg).unwrap();
        store
            .save_artifact(&Artifact {
                id: "a1".to_string(),
                session_id: "s1".to_string(),
                message_id: msg.id.clone(),
                artifact_type: ArtifactType::Report,
                title: "r".to_string(),
                content: "c".to_string(),
                created_at: Utc::now(),
                source: ArtifactSource::RuleBased,
                intent: None,
            })
            .unwrap();

        store.delete_message("s1", &msg.id).unwrap();
        assert!(store.load_messages("s1").unwrap().is_empty());
        assert!(store.load_artifacts("s1").unwrap().is_empty());
    }
}

// SQLite persistence layer for users, agents, conversations, messages and
// reports.

use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::model::{
    format_timestamp, new_id, now, parse_timestamp, Agent, Conversation, ConversationStatus,
    ConversationUpdate, Message, MessageRole, NewMessage, NewReport, NewUser, Report, User,
};
use crate::persona::Persona;
use crate::realtime::{ChangeEvent, Changefeed, ConversationSubscription, MessageSubscription};

const USER_COLUMNS: &str =
    "id, email, full_name, role, department, avatar_url, is_active, last_login_at, created_at";
const AGENT_COLUMNS: &str =
    "id, agent_type, name, description, system_prompt, capabilities, is_active";
const CONVERSATION_COLUMNS: &str =
    "id, user_id, title, status, metadata, started_at, ended_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, conversation_id, agent_id, role, content, metadata, confidence_score, created_at";
const REPORT_COLUMNS: &str =
    "id, user_id, conversation_id, title, report_type, status, metadata, generated_at";

/// SQLite-backed store. Every successful write is also published on the
/// attached [`Changefeed`].
pub struct Database {
    conn: Mutex<Connection>,
    feed: Changefeed,
}

impl Database {
    /// Open (or create) a SQLite database at `path`, ensure all tables exist
    /// and seed the agent catalogue. Pass `":memory:"` for an ephemeral
    /// in-memory database (useful for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id            TEXT PRIMARY KEY,
                email         TEXT NOT NULL UNIQUE,
                full_name     TEXT NOT NULL,
                role          TEXT NOT NULL,
                department    TEXT,
                avatar_url    TEXT,
                is_active     INTEGER NOT NULL DEFAULT 1,
                last_login_at TEXT,
                created_at    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agents (
                id            TEXT PRIMARY KEY,
                agent_type    TEXT NOT NULL UNIQUE
                              CHECK (agent_type IN ('CFO', 'CTO', 'CMO', 'COO', 'CHRO')),
                name          TEXT NOT NULL,
                description   TEXT,
                system_prompt TEXT NOT NULL,
                capabilities  TEXT NOT NULL DEFAULT '[]',
                is_active     INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id         TEXT PRIMARY KEY,
                user_id    TEXT NOT NULL REFERENCES users(id),
                title      TEXT NOT NULL,
                status     TEXT NOT NULL DEFAULT 'active'
                           CHECK (status IN ('active', 'ended', 'archived')),
                metadata   TEXT,
                started_at TEXT NOT NULL,
                ended_at   TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                agent_id         TEXT REFERENCES agents(id),
                role             TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
                content          TEXT NOT NULL,
                metadata         TEXT,
                confidence_score REAL,
                created_at       TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reports (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id),
                conversation_id TEXT REFERENCES conversations(id),
                title           TEXT NOT NULL,
                report_type     TEXT NOT NULL,
                status          TEXT NOT NULL,
                metadata        TEXT,
                generated_at    TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_user
                ON conversations(user_id, updated_at);
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_reports_user
                ON reports(user_id, generated_at);
            ",
        )
        .context("failed to create database schema")?;

        Self::seed_agents(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            feed: Changefeed::default(),
        })
    }

    /// Insert one row per persona. Existing rows (matched on `agent_type`)
    /// are left alone so local edits survive restarts.
    fn seed_agents(conn: &Connection) -> Result<()> {
        for persona in Persona::ALL {
            let capabilities = serde_json::to_string(persona.capabilities())
                .context("failed to serialize agent capabilities")?;
            conn.execute(
                "INSERT OR IGNORE INTO agents
                    (id, agent_type, name, description, system_prompt, capabilities, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
                params![
                    new_id(),
                    persona.as_str(),
                    persona.display_name(),
                    persona.role_line(),
                    persona.chat_prompt(),
                    capabilities,
                ],
            )
            .with_context(|| format!("failed to seed agent {persona}"))?;
        }
        Ok(())
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Changefeed
    // ------------------------------------------------------------------

    /// Stream of messages inserted into `conversation_id` from now on.
    pub fn subscribe_messages(&self, conversation_id: &str) -> MessageSubscription {
        self.feed.subscribe_messages(conversation_id)
    }

    /// Stream of conversation inserts/updates for `user_id` from now on.
    pub fn subscribe_conversations(&self, user_id: &str) -> ConversationSubscription {
        self.feed.subscribe_conversations(user_id)
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        let user = User {
            id: new_id(),
            email: new.email.clone(),
            full_name: new.full_name.clone(),
            role: new.role.clone(),
            department: new.department.clone(),
            avatar_url: None,
            is_active: true,
            last_login_at: None,
            created_at: now(),
        };
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (id, email, full_name, role, department, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                user.id,
                user.email,
                user.full_name,
                user.role,
                user.department,
                format_timestamp(&user.created_at),
            ],
        )
        .with_context(|| format!("failed to create user {}", user.email))?;
        Ok(user)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .context("failed to query user by id")
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![email],
            user_from_row,
        )
        .optional()
        .context("failed to query user by email")
    }

    /// Return the user with `new.email`, creating it when absent.
    pub fn ensure_user(&self, new: &NewUser) -> Result<User> {
        if let Some(user) = self.get_user_by_email(&new.email)? {
            return Ok(user);
        }
        debug!(email = %new.email, "creating user");
        self.create_user(new)
    }

    pub fn update_user_last_login(&self, id: &str) -> Result<()> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE users SET last_login_at = ?2 WHERE id = ?1",
                params![id, format_timestamp(&now())],
            )
            .context("failed to update last login")?;
        if changed == 0 {
            bail!("user {id} not found");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    /// Active agents in catalogue order.
    pub fn list_agents(&self) -> Result<Vec<Agent>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents WHERE is_active = 1
                 ORDER BY CASE agent_type
                    WHEN 'CFO' THEN 0 WHEN 'CTO' THEN 1 WHEN 'CMO' THEN 2
                    WHEN 'COO' THEN 3 ELSE 4 END"
            ))
            .context("failed to prepare list_agents query")?;
        let agents = stmt
            .query_map([], agent_from_row)
            .context("failed to query agents")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map agent rows")?;
        Ok(agents)
    }

    /// Active agent row for a persona tag (case-insensitive).
    pub fn get_agent_by_type(&self, tag: &str) -> Result<Option<Agent>> {
        let Some(persona) = Persona::from_tag(tag) else {
            return Ok(None);
        };
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_type = ?1 AND is_active = 1"),
            params![persona.as_str()],
            agent_from_row,
        )
        .optional()
        .context("failed to query agent by type")
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// A user's conversations, most recently updated first.
    pub fn list_conversations(&self, user_id: &str, limit: usize) -> Result<Vec<Conversation>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE user_id = ?1 ORDER BY updated_at DESC, rowid DESC LIMIT ?2"
            ))
            .context("failed to prepare list_conversations query")?;
        let conversations = stmt
            .query_map(params![user_id, limit as i64], conversation_from_row)
            .context("failed to query conversations")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map conversation rows")?;
        Ok(conversations)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn();
        Self::load_conversation(&conn, id)
    }

    fn load_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>> {
        conn.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            params![id],
            conversation_from_row,
        )
        .optional()
        .context("failed to query conversation")
    }

    /// Start a new active conversation for `user_id`.
    pub fn create_conversation(&self, user_id: &str, title: &str) -> Result<Conversation> {
        let started = now();
        let conversation = Conversation {
            id: new_id(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            status: ConversationStatus::Active,
            metadata: None,
            started_at: started,
            ended_at: None,
            updated_at: started,
        };
        {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO conversations (id, user_id, title, status, started_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    conversation.id,
                    conversation.user_id,
                    conversation.title,
                    conversation.status.as_str(),
                    format_timestamp(&started),
                    format_timestamp(&started),
                ],
            )
            .context("failed to create conversation")?;
        }
        self.feed
            .publish(ChangeEvent::ConversationInserted(conversation.clone()));
        Ok(conversation)
    }

    /// Apply `update` to a conversation and bump `updated_at`. Returns the
    /// updated row; errors if no conversation has this id.
    pub fn update_conversation(&self, id: &str, update: &ConversationUpdate) -> Result<Conversation> {
        let metadata = update
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize conversation metadata")?;

        let conversation = {
            let conn = self.conn();
            let changed = conn
                .execute(
                    "UPDATE conversations SET
                        title      = COALESCE(?2, title),
                        status     = COALESCE(?3, status),
                        ended_at   = COALESCE(?4, ended_at),
                        metadata   = COALESCE(?5, metadata),
                        updated_at = ?6
                     WHERE id = ?1",
                    params![
                        id,
                        update.title,
                        update.status.map(|s| s.as_str()),
                        update.ended_at.as_ref().map(format_timestamp),
                        metadata,
                        format_timestamp(&now()),
                    ],
                )
                .context("failed to update conversation")?;
            if changed == 0 {
                bail!("conversation {id} not found");
            }
            Self::load_conversation(&conn, id)?
                .with_context(|| format!("conversation {id} vanished after update"))?
        };

        self.feed
            .publish(ChangeEvent::ConversationUpdated(conversation.clone()));
        Ok(conversation)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Messages of a conversation in the order they were written.
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC"
            ))
            .context("failed to prepare list_messages query")?;
        let messages = stmt
            .query_map(params![conversation_id], message_from_row)
            .context("failed to query messages")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map message rows")?;
        Ok(messages)
    }

    pub fn create_message(&self, new: &NewMessage) -> Result<Message> {
        let message = Message {
            id: new_id(),
            conversation_id: new.conversation_id.clone(),
            agent_id: new.agent_id.clone(),
            role: new.role,
            content: new.content.clone(),
            metadata: new.metadata.clone(),
            confidence_score: new.confidence_score,
            created_at: now(),
        };
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize message metadata")?;
        {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO messages
                    (id, conversation_id, agent_id, role, content, metadata, confidence_score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    message.id,
                    message.conversation_id,
                    message.agent_id,
                    message.role.as_str(),
                    message.content,
                    metadata,
                    message.confidence_score,
                    format_timestamp(&message.created_at),
                ],
            )
            .context("failed to create message")?;
        }
        self.feed.publish(ChangeEvent::MessageInserted(message.clone()));
        Ok(message)
    }

    // ------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------

    /// A user's reports, newest first.
    pub fn list_reports(&self, user_id: &str, limit: usize) -> Result<Vec<Report>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REPORT_COLUMNS} FROM reports
                 WHERE user_id = ?1 ORDER BY generated_at DESC, rowid DESC LIMIT ?2"
            ))
            .context("failed to prepare list_reports query")?;
        let reports = stmt
            .query_map(params![user_id, limit as i64], report_from_row)
            .context("failed to query reports")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map report rows")?;
        Ok(reports)
    }

    pub fn get_report(&self, id: &str) -> Result<Option<Report>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"),
            params![id],
            report_from_row,
        )
        .optional()
        .context("failed to query report")
    }

    pub fn create_report(&self, user_id: &str, new: &NewReport) -> Result<Report> {
        let report = Report {
            id: new_id(),
            user_id: user_id.to_string(),
            conversation_id: new.conversation_id.clone(),
            title: new.title.clone(),
            report_type: new.report_type.clone(),
            status: new.status.clone(),
            metadata: new.metadata.clone(),
            generated_at: now(),
        };
        let metadata = report
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize report metadata")?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO reports
                (id, user_id, conversation_id, title, report_type, status, metadata, generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                report.id,
                report.user_id,
                report.conversation_id,
                report.title,
                report.report_type,
                report.status,
                metadata,
                format_timestamp(&report.generated_at),
            ],
        )
        .context("failed to create report")?;
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| conversion_error(idx, format!("bad timestamp {raw:?}")))
}

fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, format!("bad timestamp {raw:?}"))),
        None => Ok(None),
    }
}

fn json_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(idx, e.to_string())))
        .transpose()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        role: row.get(3)?,
        department: row.get(4)?,
        avatar_url: row.get(5)?,
        is_active: row.get(6)?,
        last_login_at: optional_timestamp_at(row, 7)?,
        created_at: timestamp_at(row, 8)?,
    })
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let capabilities_json: String = row.get(5)?;
    let capabilities = serde_json::from_str::<Vec<String>>(&capabilities_json)
        .map_err(|e| conversion_error(5, e.to_string()))?;
    Ok(Agent {
        id: row.get(0)?,
        agent_type: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        system_prompt: row.get(4)?,
        capabilities,
        is_active: row.get(6)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(3)?;
    let status = ConversationStatus::parse(&status)
        .ok_or_else(|| conversion_error(3, format!("unknown conversation status {status:?}")))?;
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        status,
        metadata: json_at(row, 4)?,
        started_at: timestamp_at(row, 5)?,
        ended_at: optional_timestamp_at(row, 6)?,
        updated_at: timestamp_at(row, 7)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(3)?;
    let role = MessageRole::parse(&role)
        .ok_or_else(|| conversion_error(3, format!("unknown message role {role:?}")))?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        agent_id: row.get(2)?,
        role,
        content: row.get(4)?,
        metadata: json_at(row, 5)?,
        confidence_score: row.get(6)?,
        created_at: timestamp_at(row, 7)?,
    })
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<Report> {
    Ok(Report {
        id: row.get(0)?,
        user_id: row.get(1)?,
        conversation_id: row.get(2)?,
        title: row.get(3)?,
        report_type: row.get(4)?,
        status: row.get(5)?,
        metadata: json_at(row, 6)?,
        generated_at: timestamp_at(row, 7)?,
    })
}

//! Session lifecycle and per-conversation chat history.
//!
//! A session advances Unconnected → Connected → SchemaLoaded →
//! ContextReady, with the Generating phase entered for the duration of
//! each generation call. Reconnecting swaps the live connection without
//! rolling the phase back; already-loaded schema context stays valid
//! until the next schema load overwrites it.

use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::connection::WarehouseConnection;
use crate::models::{ChatTurn, DbKind, SessionPhase};

pub struct Session {
    phase: SessionPhase,
    connection: Option<Box<dyn WarehouseConnection>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Unconnected,
            connection: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Install a live connection. Advances Unconnected sessions to
    /// Connected; later phases are kept.
    pub fn connected(&mut self, connection: Box<dyn WarehouseConnection>) {
        self.connection = Some(connection);
        if self.phase < SessionPhase::Connected {
            self.phase = SessionPhase::Connected;
        }
    }

    pub fn schema_loaded(&mut self) {
        if self.phase < SessionPhase::SchemaLoaded {
            self.phase = SessionPhase::SchemaLoaded;
        }
    }

    pub fn context_ready(&mut self) {
        if self.phase < SessionPhase::ContextReady {
            self.phase = SessionPhase::ContextReady;
        }
    }

    pub fn begin_generation(&mut self) {
        self.phase = SessionPhase::Generating;
    }

    pub fn end_generation(&mut self) {
        if self.phase == SessionPhase::Generating {
            self.phase = SessionPhase::ContextReady;
        }
    }

    /// The live connection and its kind, or the gate error shown to
    /// callers that skipped the connect step.
    pub fn require_connection(&self) -> Result<(&dyn WarehouseConnection, DbKind)> {
        match &self.connection {
            Some(conn) => Ok((conn.as_ref(), conn.kind())),
            None => bail!("Database connection not established. Please connect to database first."),
        }
    }

    pub fn require_schema_loaded(&self) -> Result<()> {
        if self.phase >= SessionPhase::SchemaLoaded {
            Ok(())
        } else {
            bail!("Database schema not loaded. Please load schema first.")
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Chat history keyed by conversation id. Conversations never see each
/// other's turns.
#[derive(Default)]
pub struct ChatStore {
    conversations: HashMap<String, Vec<ChatTurn>>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, conversation_id: &str) -> &[ChatTurn] {
        self.conversations
            .get(conversation_id)
            .map(|turns| turns.as_slice())
            .unwrap_or(&[])
    }

    /// Record one question/answer exchange at the end of a
    /// conversation.
    pub fn append_exchange(&mut self, conversation_id: &str, question: &str, answer: &str) {
        let turns = self
            .conversations
            .entry(conversation_id.to_string())
            .or_default();
        turns.push(ChatTurn::user(question));
        turns.push(ChatTurn::assistant(answer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{connect, PostgresCredentials, WarehouseCredentials};

    fn dummy_connection() -> Box<dyn WarehouseConnection> {
        connect(WarehouseCredentials::Postgres(PostgresCredentials {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "u".to_string(),
            password: "p".to_string(),
            dbname: "d".to_string(),
        }))
    }

    #[test]
    fn test_phases_advance_in_order() {
        let mut session = Session::new();
        assert_eq!(session.phase(), SessionPhase::Unconnected);

        session.connected(dummy_connection());
        assert_eq!(session.phase(), SessionPhase::Connected);

        session.schema_loaded();
        assert_eq!(session.phase(), SessionPhase::SchemaLoaded);

        session.context_ready();
        assert_eq!(session.phase(), SessionPhase::ContextReady);

        session.begin_generation();
        assert_eq!(session.phase(), SessionPhase::Generating);

        session.end_generation();
        assert_eq!(session.phase(), SessionPhase::ContextReady);
    }

    #[test]
    fn test_reconnect_keeps_phase() {
        let mut session = Session::new();
        session.connected(dummy_connection());
        session.schema_loaded();

        session.connected(dummy_connection());
        assert_eq!(session.phase(), SessionPhase::SchemaLoaded);
    }

    #[test]
    fn test_connection_gate_message() {
        let session = Session::new();
        let err = session.require_connection().map(|_| ()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Database connection not established. Please connect to database first."
        );
    }

    #[test]
    fn test_schema_gate_message() {
        let mut session = Session::new();
        session.connected(dummy_connection());
        let err = session.require_schema_loaded().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Database schema not loaded. Please load schema first."
        );

        session.schema_loaded();
        assert!(session.require_schema_loaded().is_ok());
    }

    #[test]
    fn test_execute_allowed_once_connected() {
        let mut session = Session::new();
        session.connected(dummy_connection());

        let (conn, kind) = session.require_connection().unwrap();
        assert_eq!(kind, DbKind::Postgres);
        assert_eq!(conn.kind(), DbKind::Postgres);
    }

    #[test]
    fn test_chat_store_isolates_conversations() {
        let mut chats = ChatStore::new();
        chats.append_exchange("a", "first question", "SELECT 1");
        chats.append_exchange("b", "other question", "SELECT 2");
        chats.append_exchange("a", "follow-up", "SELECT 3");

        let a = chats.history("a");
        assert_eq!(a.len(), 4);
        assert_eq!(a[0].content, "first question");
        assert_eq!(a[3].content, "SELECT 3");

        let b = chats.history("b");
        assert_eq!(b.len(), 2);
        assert_eq!(b[1].content, "SELECT 2");

        assert!(chats.history("unseen").is_empty());
    }
}

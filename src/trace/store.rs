use crate::interpreter::Outcome;
use rusqlite::{params, Connection, Result as SqliteResult};

/// Persistent record of sandbox sessions and their execution turns, one row
/// per `execute` call: the code that ran, the outcome kind, and the
/// observation or submitted value.
pub struct TraceStore {
    conn: Connection,
}

impl TraceStore {
    pub fn new(db_path: &str) -> SqliteResult<Self> {
        // Expand ~ to home directory
        let expanded = if db_path.starts_with('~') {
            if let Some(home) = dirs::home_dir() {
                db_path.replacen('~', &home.display().to_string(), 1)
            } else {
                db_path.to_string()
            }
        } else {
            db_path.to_string()
        };

        // Create parent directory if needed
        if let Some(parent) = std::path::Path::new(&expanded).parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(&expanded)?;
        let store = Self { conn };
        store.init_tables()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> SqliteResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                code TEXT NOT NULL,
                kind TEXT NOT NULL,
                output TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );",
        )?;
        Ok(())
    }

    pub fn create_session(&self, id: &str) -> SqliteResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO sessions (id, created_at, updated_at) VALUES (?1, ?2, ?3)",
            params![id, now, now],
        )?;
        Ok(())
    }

    pub fn record_turn(
        &self,
        session_id: &str,
        code: &str,
        kind: &str,
        output: &str,
    ) -> SqliteResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO turns (session_id, code, kind, output, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, code, kind, output, now],
        )?;
        // Update session timestamp
        self.conn.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![now, session_id],
        )?;
        Ok(())
    }

    /// Record one turn straight from its outcome.
    pub fn record_outcome(
        &self,
        session_id: &str,
        code: &str,
        outcome: &Outcome,
    ) -> SqliteResult<()> {
        let (kind, output) = match outcome {
            Outcome::NoOutput => ("no_output", String::new()),
            Outcome::Output(text) => ("output", text.clone()),
            Outcome::Final(value) => ("final", value.to_string()),
        };
        self.record_turn(session_id, code, kind, &output)
    }

    /// Turns of one session, oldest first: (code, kind, output).
    pub fn load_turns(&self, session_id: &str) -> SqliteResult<Vec<(String, String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT code, kind, output FROM turns
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        rows.collect()
    }

    /// All sessions, most recently updated first: (id, updated_at, turn count).
    pub fn list_sessions(&self) -> SqliteResult<Vec<(String, String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.updated_at, COUNT(t.id)
             FROM sessions s LEFT JOIN turns t ON t.session_id = s.id
             GROUP BY s.id ORDER BY s.updated_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        rows.collect()
    }

    pub fn latest_session_id(&self) -> SqliteResult<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM sessions ORDER BY updated_at DESC LIMIT 1")?;
        let mut rows = stmt.query([])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    /// Delete every recorded session and turn.
    pub fn clear(&self) -> SqliteResult<()> {
        self.conn.execute_batch("DELETE FROM turns; DELETE FROM sessions;")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_session_and_record_turns() {
        let store = TraceStore::in_memory().unwrap();
        store.create_session("sess-1").unwrap();
        store
            .record_turn("sess-1", "print('hi')", "output", "hi\n")
            .unwrap();
        store.record_turn("sess-1", "x = 1", "no_output", "").unwrap();

        let turns = store.load_turns("sess-1").unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].0, "print('hi')");
        assert_eq!(turns[0].1, "output");
        assert_eq!(turns[0].2, "hi\n");
        assert_eq!(turns[1].1, "no_output");
    }

    #[test]
    fn test_record_outcome_kinds() {
        let store = TraceStore::in_memory().unwrap();
        store.create_session("sess-kinds").unwrap();
        store
            .record_outcome("sess-kinds", "x = 1", &Outcome::NoOutput)
            .unwrap();
        store
            .record_outcome(
                "sess-kinds",
                "print('hi')",
                &Outcome::Output("hi\n".to_string()),
            )
            .unwrap();
        store
            .record_outcome("sess-kinds", "SUBMIT(30)", &Outcome::Final(json!(30)))
            .unwrap();

        let turns = store.load_turns("sess-kinds").unwrap();
        assert_eq!(turns[0].1, "no_output");
        assert_eq!(turns[1].1, "output");
        assert_eq!(turns[2].1, "final");
        assert_eq!(turns[2].2, "30");
    }

    #[test]
    fn test_latest_session() {
        let store = TraceStore::in_memory().unwrap();
        assert!(store.latest_session_id().unwrap().is_none());

        store.create_session("sess-a").unwrap();
        store.create_session("sess-b").unwrap();
        store.record_turn("sess-a", "pass", "no_output", "").unwrap();

        let latest = store.latest_session_id().unwrap().unwrap();
        assert_eq!(latest, "sess-a");
    }

    #[test]
    fn test_list_sessions_with_counts() {
        let store = TraceStore::in_memory().unwrap();
        store.create_session("busy").unwrap();
        store.create_session("idle").unwrap();
        for i in 0..3 {
            store
                .record_turn("busy", &format!("step_{}", i), "no_output", "")
                .unwrap();
        }

        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        let busy = sessions.iter().find(|s| s.0 == "busy").unwrap();
        assert_eq!(busy.2, 3);
        let idle = sessions.iter().find(|s| s.0 == "idle").unwrap();
        assert_eq!(idle.2, 0);
    }

    #[test]
    fn test_clear_removes_everything() {
        let store = TraceStore::in_memory().unwrap();
        store.create_session("doomed").unwrap();
        store.record_turn("doomed", "pass", "no_output", "").unwrap();

        store.clear().unwrap();
        assert!(store.list_sessions().unwrap().is_empty());
        assert!(store.load_turns("doomed").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_session_id_fails() {
        let store = TraceStore::in_memory().unwrap();
        store.create_session("dup").unwrap();
        assert!(store.create_session("dup").is_err());
    }

    #[test]
    fn test_turn_ordering_preserved() {
        let store = TraceStore::in_memory().unwrap();
        store.create_session("order").unwrap();
        for i in 0..10 {
            store
                .record_turn("order", &format!("code_{}", i), "no_output", "")
                .unwrap();
        }
        let turns = store.load_turns("order").unwrap();
        assert_eq!(turns.len(), 10);
        for (i, turn) in turns.iter().enumerate() {
            assert_eq!(turn.0, format!("code_{}", i));
        }
    }

    #[test]
    fn test_special_characters_in_code_and_output() {
        let store = TraceStore::in_memory().unwrap();
        store.create_session("special").unwrap();
        let code = "print('\\'quoted\\' \"json\" \\n 日本語 🦀')";
        let output = "'quoted' \"json\" \n 日本語 🦀\n";
        store.record_turn("special", code, "output", output).unwrap();

        let turns = store.load_turns("special").unwrap();
        assert_eq!(turns[0].0, code);
        assert_eq!(turns[0].2, output);
    }

    #[test]
    fn test_file_based_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.db");
        let path = path.to_str().unwrap();

        {
            let store = TraceStore::new(path).unwrap();
            store.create_session("persist").unwrap();
            store
                .record_turn("persist", "print(1)", "output", "1\n")
                .unwrap();
        }

        // Re-open and verify data persists
        {
            let store = TraceStore::new(path).unwrap();
            let turns = store.load_turns("persist").unwrap();
            assert_eq!(turns.len(), 1);
            assert_eq!(turns[0].2, "1\n");
        }
    }
}

//! SQLite chunk store with a BM25 full-text shadow.
//!
//! The primary `chunks` table is mirrored into an FTS5 virtual table by
//! triggers, so a row in one always has its counterpart in the other. A
//! `files` table mirrors the Merkle file map for diagnostic recovery.
//!
//! rusqlite::Connection is not Sync, so the connection sits behind an
//! `Arc<Mutex<_>>` and all access goes through `spawn_blocking`.

use rusqlite::params;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::task::spawn_blocking;

use crate::error::CodiiErr;
use crate::error::Result;
use crate::query::QueryProcessor;
use crate::types::CodeChunk;
use crate::types::StoredChunk;

/// A BM25 hit: the stored chunk plus its raw FTS5 score.
///
/// Lower raw scores are more relevant; rows come back already sorted
/// best-first.
#[derive(Debug, Clone)]
pub struct Bm25Match {
    pub chunk: StoredChunk,
    pub score: f64,
}

/// Thread-safe chunk store backed by one SQLite file.
pub struct ChunkStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    processor: QueryProcessor,
}

impl ChunkStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path_buf = path.to_path_buf();
        let conn = Connection::open(path).map_err(|e| CodiiErr::store_error(&path_buf, e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| CodiiErr::store_error(&path_buf, format!("schema init failed: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path_buf,
            processor: QueryProcessor::default(),
        })
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a read closure on the blocking pool.
    async fn query<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, &Path) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();

        spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "Connection mutex poisoned, recovering");
                poisoned.into_inner()
            });
            f(&guard, &path)
        })
        .await
        .map_err(|e| CodiiErr::store_error(&self.path, format!("spawn_blocking failed: {e}")))?
    }

    /// Run a write closure inside a transaction on the blocking pool.
    async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, &Path) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();

        spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "Connection mutex poisoned, recovering");
                let inner = poisoned.into_inner();
                if !inner.is_autocommit() {
                    // An interrupted transaction may still be open.
                    if let Err(e) = inner.execute_batch("ROLLBACK") {
                        tracing::error!(path = %path.display(), error = %e, "Rollback after poisoning failed");
                    }
                }
                inner
            });

            let tx = guard
                .transaction()
                .map_err(|e| CodiiErr::store_error(&path, format!("transaction start failed: {e}")))?;
            let result = f(&tx, &path)?;
            tx.commit()
                .map_err(|e| CodiiErr::store_error(&path, format!("commit failed: {e}")))?;
            Ok(result)
        })
        .await
        .map_err(|e| CodiiErr::store_error(&self.path, format!("spawn_blocking failed: {e}")))?
    }

    /// Insert one chunk, returning its assigned id.
    pub async fn insert_chunk(&self, chunk: CodeChunk) -> Result<i64> {
        self.transaction(move |conn, path| {
            insert_chunk_row(conn, path, &chunk)?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Insert chunks atomically, returning their assigned ids in insertion
    /// order.
    ///
    /// Ids are strictly monotonic and contiguous over the batch; returning
    /// them removes any reliance on "last N rowids" lookups.
    pub async fn insert_chunks_batch(&self, chunks: Vec<CodeChunk>) -> Result<Vec<i64>> {
        self.transaction(move |conn, path| {
            let mut ids = Vec::with_capacity(chunks.len());
            for chunk in &chunks {
                insert_chunk_row(conn, path, chunk)?;
                ids.push(conn.last_insert_rowid());
            }
            Ok(ids)
        })
        .await
    }

    /// BM25 search over the FTS5 shadow.
    ///
    /// The raw query is run through the query processor first, so malformed
    /// FTS syntax never reaches the parser; an empty processed expression
    /// returns no results. `path_substring` restricts hits to chunks whose
    /// path contains it.
    pub async fn search_bm25(
        &self,
        query_text: &str,
        limit: usize,
        path_substring: Option<String>,
    ) -> Result<Vec<Bm25Match>> {
        let processed = self.processor.process(query_text);
        if processed.fts_query.is_empty() {
            return Ok(Vec::new());
        }
        let fts_query = processed.fts_query;

        self.query(move |conn, path| {
            let mut sql = String::from(
                "SELECT c.id, c.content, c.path, c.start_line, c.end_line, c.language, c.chunk_type, \
                        bm25(chunks_fts) AS score \
                 FROM chunks_fts \
                 JOIN chunks c ON chunks_fts.rowid = c.id \
                 WHERE chunks_fts MATCH ?1",
            );
            if path_substring.is_some() {
                sql.push_str(" AND c.path LIKE ?3");
            }
            sql.push_str(" ORDER BY score LIMIT ?2");

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| CodiiErr::store_error(path, e))?;

            let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Bm25Match> {
                Ok(Bm25Match {
                    chunk: StoredChunk {
                        id: row.get(0)?,
                        chunk: CodeChunk {
                            content: row.get(1)?,
                            path: row.get(2)?,
                            start_line: row.get(3)?,
                            end_line: row.get(4)?,
                            language: row.get(5)?,
                            chunk_type: row.get(6)?,
                            name: None,
                        },
                    },
                    score: row.get(7)?,
                })
            };

            let rows = if let Some(substring) = path_substring {
                let pattern = format!("%{substring}%");
                stmt.query_map(params![fts_query, limit as i64, pattern], map_row)
            } else {
                stmt.query_map(params![fts_query, limit as i64], map_row)
            }
            .map_err(|e| CodiiErr::store_error(path, e))?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| CodiiErr::store_error(path, e))
        })
        .await
    }

    /// Fetch a chunk by id.
    pub async fn get_chunk_by_id(&self, chunk_id: i64) -> Result<Option<StoredChunk>> {
        self.query(move |conn, path| {
            conn.query_row(
                "SELECT id, content, path, start_line, end_line, language, chunk_type \
                 FROM chunks WHERE id = ?1",
                params![chunk_id],
                |row| {
                    Ok(StoredChunk {
                        id: row.get(0)?,
                        chunk: CodeChunk {
                            content: row.get(1)?,
                            path: row.get(2)?,
                            start_line: row.get(3)?,
                            end_line: row.get(4)?,
                            language: row.get(5)?,
                            chunk_type: row.get(6)?,
                            name: None,
                        },
                    })
                },
            )
            .optional()
            .map_err(|e| CodiiErr::store_error(path, e))
        })
        .await
    }

    /// Ids of all chunks owned by one file.
    pub async fn get_chunk_ids_by_path(&self, file_path: &str) -> Result<Vec<i64>> {
        let file_path = file_path.to_string();
        self.query(move |conn, path| {
            let mut stmt = conn
                .prepare("SELECT id FROM chunks WHERE path = ?1")
                .map_err(|e| CodiiErr::store_error(path, e))?;
            let rows = stmt
                .query_map(params![file_path], |row| row.get(0))
                .map_err(|e| CodiiErr::store_error(path, e))?;
            rows.collect::<rusqlite::Result<Vec<i64>>>()
                .map_err(|e| CodiiErr::store_error(path, e))
        })
        .await
    }

    /// Delete all chunks for one file. The FTS shadow rows go with them via
    /// the delete trigger. Returns the number of rows removed.
    pub async fn delete_chunks_by_path(&self, file_path: &str) -> Result<usize> {
        let file_path = file_path.to_string();
        self.transaction(move |conn, path| {
            conn.execute("DELETE FROM chunks WHERE path = ?1", params![file_path])
                .map_err(|e| CodiiErr::store_error(path, e))
        })
        .await
    }

    /// Delete every chunk. Returns the number of rows removed.
    pub async fn clear_all_chunks(&self) -> Result<usize> {
        self.transaction(move |conn, path| {
            conn.execute("DELETE FROM chunks", [])
                .map_err(|e| CodiiErr::store_error(path, e))
        })
        .await
    }

    /// Insert or update a file-hash mirror row.
    pub async fn upsert_file_hash(&self, file_path: &str, hash: &str) -> Result<()> {
        let file_path = file_path.to_string();
        let hash = hash.to_string();
        self.transaction(move |conn, path| {
            conn.execute(
                "INSERT OR REPLACE INTO files (path, hash, last_modified) \
                 VALUES (?1, ?2, CURRENT_TIMESTAMP)",
                params![file_path, hash],
            )
            .map_err(|e| CodiiErr::store_error(path, e))?;
            Ok(())
        })
        .await
    }

    /// Stored hash for a file, if any.
    pub async fn get_file_hash(&self, file_path: &str) -> Result<Option<String>> {
        let file_path = file_path.to_string();
        self.query(move |conn, path| {
            conn.query_row(
                "SELECT hash FROM files WHERE path = ?1",
                params![file_path],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CodiiErr::store_error(path, e))
        })
        .await
    }

    /// The whole file-hash mirror.
    pub async fn get_all_file_hashes(&self) -> Result<HashMap<String, String>> {
        self.query(move |conn, path| {
            let mut stmt = conn
                .prepare("SELECT path, hash FROM files")
                .map_err(|e| CodiiErr::store_error(path, e))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| CodiiErr::store_error(path, e))?;
            rows.collect::<rusqlite::Result<HashMap<String, String>>>()
                .map_err(|e| CodiiErr::store_error(path, e))
        })
        .await
    }

    /// Drop one file-hash mirror row.
    pub async fn delete_file_hash(&self, file_path: &str) -> Result<()> {
        let file_path = file_path.to_string();
        self.transaction(move |conn, path| {
            conn.execute("DELETE FROM files WHERE path = ?1", params![file_path])
                .map_err(|e| CodiiErr::store_error(path, e))?;
            Ok(())
        })
        .await
    }

    /// Drop the whole file-hash mirror.
    pub async fn clear_all_file_hashes(&self) -> Result<()> {
        self.transaction(move |conn, path| {
            conn.execute("DELETE FROM files", [])
                .map_err(|e| CodiiErr::store_error(path, e))?;
            Ok(())
        })
        .await
    }

    /// Total number of stored chunks.
    pub async fn chunk_count(&self) -> Result<usize> {
        self.query(move |conn, path| {
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(|e| CodiiErr::store_error(path, e))
        })
        .await
    }

    /// Number of rows in the file-hash mirror.
    pub async fn file_count(&self) -> Result<usize> {
        self.query(move |conn, path| {
            conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(|e| CodiiErr::store_error(path, e))
        })
        .await
    }
}

fn insert_chunk_row(conn: &Connection, path: &Path, chunk: &CodeChunk) -> Result<()> {
    conn.execute(
        "INSERT INTO chunks (content, path, start_line, end_line, language, chunk_type) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            chunk.content,
            chunk.path,
            chunk.start_line,
            chunk.end_line,
            chunk.language,
            chunk.chunk_type,
        ],
    )
    .map_err(|e| CodiiErr::store_error(path, e))?;
    Ok(())
}

/// Chunk store schema.
///
/// The FTS5 shadow uses external content (`content='chunks'`) so text is
/// stored once; the three triggers keep it in lockstep with the primary
/// table on insert, delete and update.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    path TEXT NOT NULL,
    start_line INTEGER,
    end_line INTEGER,
    language TEXT,
    chunk_type TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path);

CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    hash TEXT NOT NULL,
    last_modified TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    path,
    language,
    content='chunks',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, content, path, language)
    VALUES (new.id, new.content, new.path, new.language);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content, path, language)
    VALUES ('delete', old.id, old.content, old.path, old.language);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content, path, language)
    VALUES ('delete', old.id, old.content, old.path, old.language);
    INSERT INTO chunks_fts(rowid, content, path, language)
    VALUES (new.id, new.content, new.path, new.language);
END;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_chunk(content: &str, path: &str) -> CodeChunk {
        CodeChunk {
            content: content.to_string(),
            path: path.to_string(),
            start_line: 1,
            end_line: 3,
            language: "python".to_string(),
            chunk_type: "function".to_string(),
            name: None,
        }
    }

    async fn open_store() -> (tempfile::TempDir, ChunkStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(&dir.path().join("chunks.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn insert_returns_monotonic_contiguous_ids() {
        let (_dir, store) = open_store().await;
        let chunks = vec![
            make_chunk("def alpha(): pass", "/repo/a.py"),
            make_chunk("def beta(): pass", "/repo/a.py"),
            make_chunk("def gamma(): pass", "/repo/b.py"),
        ];
        let ids = store.insert_chunks_batch(chunks).await.unwrap();

        assert_eq!(ids.len(), 3);
        for pair in ids.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
    }

    #[tokio::test]
    async fn bm25_search_finds_inserted_content() {
        let (_dir, store) = open_store().await;
        store
            .insert_chunks_batch(vec![
                make_chunk("def page_table_walk(): traverse()", "/repo/mmu.py"),
                make_chunk("def unrelated(): nothing()", "/repo/other.py"),
            ])
            .await
            .unwrap();

        let hits = store.search_bm25("page table walk", 10, None).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk.chunk.path, "/repo/mmu.py");
    }

    #[tokio::test]
    async fn path_substring_restricts_results() {
        let (_dir, store) = open_store().await;
        store
            .insert_chunks_batch(vec![
                make_chunk("def shared_token(): one()", "/repo/src/a.py"),
                make_chunk("def shared_token(): two()", "/repo/tests/b.py"),
            ])
            .await
            .unwrap();

        let hits = store
            .search_bm25("shared_token", 10, Some("tests".to_string()))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.chunk.path.contains("tests"));
    }

    #[tokio::test]
    async fn malformed_query_does_not_error() {
        let (_dir, store) = open_store().await;
        store
            .insert_chunks_batch(vec![make_chunk("def safe(): ok()", "/repo/s.py")])
            .await
            .unwrap();

        // FTS5 syntax characters are stripped by the preprocessor.
        let hits = store
            .search_bm25("\"safe\" AND (rogue) -minus | pipe*", 10, None)
            .await
            .unwrap();
        assert!(hits.iter().any(|h| h.chunk.chunk.path == "/repo/s.py"));
    }

    #[tokio::test]
    async fn empty_query_returns_no_results() {
        let (_dir, store) = open_store().await;
        store
            .insert_chunks_batch(vec![make_chunk("def any(): pass", "/repo/a.py")])
            .await
            .unwrap();
        assert!(store.search_bm25("   ", 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_by_path_evicts_fts_shadow() {
        let (_dir, store) = open_store().await;
        store
            .insert_chunks_batch(vec![
                make_chunk("def doomed_symbol(): x()", "/repo/dead.py"),
                make_chunk("def doomed_symbol(): y()", "/repo/alive.py"),
            ])
            .await
            .unwrap();

        let removed = store.delete_chunks_by_path("/repo/dead.py").await.unwrap();
        assert_eq!(removed, 1);

        let hits = store.search_bm25("doomed_symbol", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.chunk.path, "/repo/alive.py");
        assert!(store
            .get_chunk_ids_by_path("/repo/dead.py")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn clear_all_chunks_empties_store() {
        let (_dir, store) = open_store().await;
        store
            .insert_chunks_batch(vec![
                make_chunk("def a(): pass", "/repo/a.py"),
                make_chunk("def b(): pass", "/repo/b.py"),
            ])
            .await
            .unwrap();

        let removed = store.clear_all_chunks().await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.chunk_count().await.unwrap(), 0);
        assert!(store.search_bm25("pass", 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_chunk_by_id_roundtrips() {
        let (_dir, store) = open_store().await;
        let ids = store
            .insert_chunks_batch(vec![make_chunk("def lookup(): pass", "/repo/l.py")])
            .await
            .unwrap();

        let stored = store.get_chunk_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.id, ids[0]);
        assert_eq!(stored.chunk.content, "def lookup(): pass");
        assert!(store.get_chunk_by_id(999_999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_hash_mirror_upserts_and_lists() {
        let (_dir, store) = open_store().await;
        store.upsert_file_hash("/repo/a.py", "hash1").await.unwrap();
        store.upsert_file_hash("/repo/a.py", "hash2").await.unwrap();
        store.upsert_file_hash("/repo/b.py", "hash3").await.unwrap();

        assert_eq!(
            store.get_file_hash("/repo/a.py").await.unwrap().as_deref(),
            Some("hash2")
        );
        let all = store.get_all_file_hashes().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.file_count().await.unwrap(), 2);

        store.delete_file_hash("/repo/a.py").await.unwrap();
        assert!(store.get_file_hash("/repo/a.py").await.unwrap().is_none());
    }
}

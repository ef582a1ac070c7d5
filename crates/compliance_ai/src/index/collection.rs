use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use compliance_core::db;
use compliance_core::domain::{CorpusType, Document};
use compliance_core::error::AppError;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use super::similarity::{cosine_similarity, decode_vector, encode_vector, l2_norm};
use super::{CollectionStats, CorpusFilter, RetrievalHit, StoredDocument};
use crate::chunking::Chunk;

const META_DIMS: &str = "dims";
const META_MODEL: &str = "model";

fn index_err(corpus: CorpusType, message: &str, err: impl std::fmt::Display) -> AppError {
    AppError::new("INDEX_UNAVAILABLE", message).with_details(format!("corpus={corpus}; err={err}"))
}

fn dims_mismatch(corpus: CorpusType, stored: usize, got: usize) -> AppError {
    AppError::new(
        "CONFIG_EMBEDDING_DIMS_MISMATCH",
        "Embedding dimension does not match the collection",
    )
    .with_details(format!("corpus={corpus}; stored={stored}; got={got}"))
}

/// One corpus's chunk store. Every public call takes the connection lock for its own duration
/// only, so readers observe a document's old chunk-set or its new one, never a mix.
pub struct Collection {
    corpus: CorpusType,
    conn: Mutex<Connection>,
}

struct ScoredRow {
    seq: i64,
    hit: RetrievalHit,
}

impl Collection {
    pub fn open(corpus: CorpusType, path: &Path) -> Result<Self, AppError> {
        let mut conn = db::open(path)
            .map_err(|e| index_err(corpus, "Failed to open collection", e))?;
        db::migrate(&mut conn).map_err(|e| index_err(corpus, "Failed to migrate collection", e))?;
        Ok(Self {
            corpus,
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory(corpus: CorpusType) -> Result<Self, AppError> {
        let mut conn =
            db::open_in_memory().map_err(|e| index_err(corpus, "Failed to open collection", e))?;
        db::migrate(&mut conn).map_err(|e| index_err(corpus, "Failed to migrate collection", e))?;
        Ok(Self {
            corpus,
            conn: Mutex::new(conn),
        })
    }

    pub fn corpus(&self) -> CorpusType {
        self.corpus
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.conn
            .lock()
            .map_err(|e| index_err(self.corpus, "Collection lock poisoned", e))
    }

    pub fn dims(&self) -> Result<Option<usize>, AppError> {
        let conn = self.lock()?;
        read_dims(&conn, self.corpus)
    }

    /// Insert or replace one chunk by id. A replaced row keeps its original insertion order.
    pub fn upsert(&self, chunk: &Chunk, vector: &[f32], model: &str) -> Result<(), AppError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| index_err(self.corpus, "Failed to start upsert transaction", e))?;
        ensure_dims(&tx, self.corpus, vector.len(), model)?;
        write_chunk(&tx, self.corpus, chunk, vector)?;
        tx.commit()
            .map_err(|e| index_err(self.corpus, "Failed to commit upsert", e))
    }

    pub fn delete_by_document(&self, document_id: &str) -> Result<usize, AppError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| index_err(self.corpus, "Failed to start delete transaction", e))?;
        let removed = tx
            .execute("DELETE FROM chunks WHERE document_id = ?1", [document_id])
            .map_err(|e| index_err(self.corpus, "Failed to delete document chunks", e))?;
        tx.execute("DELETE FROM documents WHERE document_id = ?1", [document_id])
            .map_err(|e| index_err(self.corpus, "Failed to delete document row", e))?;
        tx.commit()
            .map_err(|e| index_err(self.corpus, "Failed to commit delete", e))?;
        Ok(removed)
    }

    /// Swap a document's whole chunk-set and its document row in one transaction.
    pub fn replace_document(
        &self,
        stored: &StoredDocument,
        chunks: &[(Chunk, Vec<f32>)],
        model: &str,
    ) -> Result<(), AppError> {
        let doc = &stored.document;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| index_err(self.corpus, "Failed to start replace transaction", e))?;

        if let Some((_, first)) = chunks.first() {
            ensure_dims(&tx, self.corpus, first.len(), model)?;
        }
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", [&doc.document_id])
            .map_err(|e| index_err(self.corpus, "Failed to delete previous chunks", e))?;
        for (chunk, vector) in chunks {
            write_chunk(&tx, self.corpus, chunk, vector)?;
        }

        let page_starts = serde_json::to_string(&stored.page_starts)
            .map_err(|e| index_err(self.corpus, "Failed to encode page starts", e))?;
        tx.execute(
            r#"
            INSERT INTO documents(
              document_id, corpus, filename, content_sha256, content, ingested_at,
              page_count, chunk_count, category, version, page_starts
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(document_id) DO UPDATE SET
              corpus = excluded.corpus,
              filename = excluded.filename,
              content_sha256 = excluded.content_sha256,
              content = excluded.content,
              ingested_at = excluded.ingested_at,
              page_count = excluded.page_count,
              chunk_count = excluded.chunk_count,
              category = excluded.category,
              version = excluded.version,
              page_starts = excluded.page_starts
            "#,
            params![
                doc.document_id,
                doc.corpus.as_str(),
                doc.filename,
                doc.content_sha256,
                stored.content,
                doc.ingested_at,
                i64::from(doc.page_count),
                i64::from(doc.chunk_count),
                doc.category,
                doc.version,
                page_starts,
            ],
        )
        .map_err(|e| index_err(self.corpus, "Failed to write document row", e))?;

        tx.commit()
            .map_err(|e| index_err(self.corpus, "Failed to commit replace", e))?;
        debug!(
            corpus = %self.corpus,
            document_id = %doc.document_id,
            chunks = chunks.len(),
            "replaced document chunk-set"
        );
        Ok(())
    }

    /// Cosine search. Hits below `score_floor` are dropped; the rest are sorted by score
    /// descending with insertion order breaking ties, then truncated to `k`.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        score_floor: f32,
        filter: &CorpusFilter,
    ) -> Result<Vec<RetrievalHit>, AppError> {
        let qnorm = l2_norm(query);
        if qnorm == 0.0 {
            return Err(AppError::new(
                "MODEL_EMBEDDINGS_FAILED",
                "Query embedding norm is zero",
            ));
        }

        let mut scored: Vec<ScoredRow> = Vec::new();
        {
            let conn = self.lock()?;
            let Some(dims) = read_dims(&conn, self.corpus)? else {
                return Ok(Vec::new());
            };
            if query.len() != dims {
                return Err(dims_mismatch(self.corpus, dims, query.len()));
            }

            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT c.seq, c.chunk_id, c.document_id, c.ordinal, c.page, c.criteria,
                           c.text, c.vector, d.category
                    FROM chunks c
                    LEFT JOIN documents d ON d.document_id = c.document_id
                    ORDER BY c.seq ASC
                    "#,
                )
                .map_err(|e| index_err(self.corpus, "Failed to prepare search", e))?;
            let mut rows = stmt
                .query([])
                .map_err(|e| index_err(self.corpus, "Failed to run search", e))?;

            while let Some(row) = rows
                .next()
                .map_err(|e| index_err(self.corpus, "Failed to read search row", e))?
            {
                let read = |e: rusqlite::Error| index_err(self.corpus, "Failed to decode search row", e);
                let seq: i64 = row.get(0).map_err(read)?;
                let chunk_id: String = row.get(1).map_err(read)?;
                let document_id: String = row.get(2).map_err(read)?;
                let category: Option<String> = row.get(8).map_err(read)?;
                let criteria_json: String = row.get(5).map_err(read)?;
                let criteria: Vec<String> = serde_json::from_str(&criteria_json)
                    .map_err(|e| index_err(self.corpus, "Stored criteria are corrupt", e))?;

                if !filter.admits(&document_id, category.as_deref(), &criteria) {
                    continue;
                }

                let blob: Vec<u8> = row.get(7).map_err(read)?;
                let vector = decode_vector(&blob).ok_or_else(|| {
                    AppError::new("INDEX_CORRUPT", "Stored vector is not packed f32")
                        .with_details(format!("corpus={}; chunk_id={chunk_id}", self.corpus))
                })?;
                if vector.len() != dims {
                    return Err(AppError::new("INDEX_CORRUPT", "Stored vector dims mismatch")
                        .with_details(format!(
                            "corpus={}; chunk_id={chunk_id}; expected={dims}; got={}",
                            self.corpus,
                            vector.len()
                        )));
                }
                let vnorm = l2_norm(&vector);
                if vnorm == 0.0 {
                    continue;
                }
                let score = cosine_similarity(query, &vector, qnorm, vnorm);
                if score.is_nan() || score < score_floor {
                    continue;
                }

                let ordinal: i64 = row.get(3).map_err(read)?;
                let page: i64 = row.get(4).map_err(read)?;
                let text: String = row.get(6).map_err(read)?;
                scored.push(ScoredRow {
                    seq,
                    hit: RetrievalHit {
                        chunk_id,
                        document_id,
                        corpus: self.corpus,
                        ordinal: ordinal.clamp(0, i64::from(u32::MAX)) as u32,
                        page: page.clamp(0, i64::from(u32::MAX)) as u32,
                        criteria,
                        text,
                        score,
                        rank: 0,
                    },
                });
            }
        }

        scored.sort_by(|a, b| {
            b.hit
                .score
                .partial_cmp(&a.hit.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(i, row)| RetrievalHit {
                rank: i + 1,
                ..row.hit
            })
            .collect())
    }

    pub fn document(&self, document_id: &str) -> Result<Option<Document>, AppError> {
        Ok(self.stored_document(document_id)?.map(|s| s.document))
    }

    pub fn stored_document(&self, document_id: &str) -> Result<Option<StoredDocument>, AppError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r#"
                SELECT document_id, filename, content_sha256, content, ingested_at,
                       page_count, chunk_count, category, version, page_starts
                FROM documents WHERE document_id = ?1
                "#,
                [document_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| index_err(self.corpus, "Failed to read document row", e))?;

        let Some((id, filename, sha, content, ingested_at, pages, chunks, category, version, starts)) =
            row
        else {
            return Ok(None);
        };
        let page_starts: Vec<usize> = serde_json::from_str(&starts)
            .map_err(|e| index_err(self.corpus, "Stored page starts are corrupt", e))?;

        Ok(Some(StoredDocument {
            document: Document {
                document_id: id,
                corpus: self.corpus,
                filename,
                content_sha256: sha,
                ingested_at,
                page_count: pages.clamp(0, i64::from(u32::MAX)) as u32,
                chunk_count: chunks.clamp(0, i64::from(u32::MAX)) as u32,
                category,
                version,
            },
            content,
            page_starts,
        }))
    }

    pub fn chunk_ids_for_document(&self, document_id: &str) -> Result<Vec<String>, AppError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT chunk_id FROM chunks WHERE document_id = ?1 ORDER BY ordinal ASC")
            .map_err(|e| index_err(self.corpus, "Failed to prepare chunk listing", e))?;
        let rows = stmt
            .query_map([document_id], |row| row.get::<_, String>(0))
            .map_err(|e| index_err(self.corpus, "Failed to list chunks", e))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(|e| index_err(self.corpus, "Failed to read chunk id", e))?);
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<CollectionStats, AppError> {
        let conn = self.lock()?;
        let chunk_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| index_err(self.corpus, "Failed to count chunks", e))?;
        let (document_count, last_ingested_at): (i64, Option<String>) = conn
            .query_row("SELECT COUNT(*), MAX(ingested_at) FROM documents", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(|e| index_err(self.corpus, "Failed to count documents", e))?;
        let model = read_meta(&conn, self.corpus, META_MODEL)?;
        Ok(CollectionStats {
            corpus: self.corpus,
            chunk_count: chunk_count.max(0) as u64,
            document_count: document_count.max(0) as u64,
            last_ingested_at,
            dims: read_dims(&conn, self.corpus)?,
            model,
        })
    }
}

fn read_meta(conn: &Connection, corpus: CorpusType, key: &str) -> Result<Option<String>, AppError> {
    conn.query_row(
        "SELECT value FROM collection_meta WHERE key = ?1",
        [key],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(|e| index_err(corpus, "Failed to read collection metadata", e))
}

fn read_dims(conn: &Connection, corpus: CorpusType) -> Result<Option<usize>, AppError> {
    match read_meta(conn, corpus, META_DIMS)? {
        None => Ok(None),
        Some(raw) => raw.parse::<usize>().map(Some).map_err(|e| {
            AppError::new("INDEX_CORRUPT", "Stored collection dims are not a number")
                .with_details(format!("corpus={corpus}; value={raw}; err={e}"))
        }),
    }
}

/// First write fixes the collection's dimension; later writes must match it.
fn ensure_dims(tx: &Transaction<'_>, corpus: CorpusType, dims: usize, model: &str) -> Result<(), AppError> {
    match read_dims(tx, corpus)? {
        Some(stored) if stored != dims => return Err(dims_mismatch(corpus, stored, dims)),
        Some(_) => {}
        None => {
            tx.execute(
                "INSERT INTO collection_meta(key, value) VALUES (?1, ?2)",
                params![META_DIMS, dims.to_string()],
            )
            .map_err(|e| index_err(corpus, "Failed to record collection dims", e))?;
        }
    }
    tx.execute(
        "INSERT INTO collection_meta(key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![META_MODEL, model],
    )
    .map_err(|e| index_err(corpus, "Failed to record collection model", e))?;
    Ok(())
}

fn write_chunk(tx: &Transaction<'_>, corpus: CorpusType, chunk: &Chunk, vector: &[f32]) -> Result<(), AppError> {
    if let Some(stored) = read_dims(tx, corpus)? {
        if stored != vector.len() {
            return Err(dims_mismatch(corpus, stored, vector.len()));
        }
    }
    let criteria = serde_json::to_string(&chunk.criteria)
        .map_err(|e| index_err(corpus, "Failed to encode criteria", e))?;
    tx.execute(
        r#"
        INSERT INTO chunks(
          chunk_id, document_id, ordinal, text, text_sha256, char_len,
          start_offset, end_offset, page, criteria, vector
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(chunk_id) DO UPDATE SET
          document_id = excluded.document_id,
          ordinal = excluded.ordinal,
          text = excluded.text,
          text_sha256 = excluded.text_sha256,
          char_len = excluded.char_len,
          start_offset = excluded.start_offset,
          end_offset = excluded.end_offset,
          page = excluded.page,
          criteria = excluded.criteria,
          vector = excluded.vector
        "#,
        params![
            chunk.chunk_id,
            chunk.document_id,
            i64::from(chunk.ordinal),
            chunk.text,
            chunk.text_sha256,
            chunk.char_len as i64,
            chunk.start_offset as i64,
            chunk.end_offset as i64,
            i64::from(chunk.page),
            criteria,
            encode_vector(vector),
        ],
    )
    .map_err(|e| index_err(corpus, "Failed to write chunk", e))?;
    Ok(())
}

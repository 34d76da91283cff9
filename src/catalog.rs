use std::collections::HashMap;

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::analysis::{FileRecord, Representation, RepresentationType};
use crate::error::{AnalysisError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS file (
    id                 BIGSERIAL PRIMARY KEY,
    filename           TEXT NOT NULL,
    sha256             TEXT NOT NULL,
    parsing_successful BOOLEAN NOT NULL DEFAULT FALSE,
    UNIQUE (sha256, filename)
);
CREATE TABLE IF NOT EXISTS representation (
    id      BIGSERIAL PRIMARY KEY,
    type    TEXT NOT NULL,
    data    BYTEA NOT NULL,
    file_id BIGINT NOT NULL REFERENCES file(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_representation_file ON representation(file_id);
CREATE INDEX IF NOT EXISTS idx_file_sha256 ON file(sha256);
"#;

/// Content-addressed store of file records and their representation blobs.
#[derive(Clone)]
pub struct Catalog {
    pool: PgPool,
}

impl Catalog {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the two tables when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// All rows sharing a content hash (several filenames may share one).
    pub async fn find_by_sha256(&self, sha256: &str) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query("SELECT id, filename, sha256, parsing_successful FROM file WHERE sha256 = $1 ORDER BY id")
            .bind(sha256)
            .fetch_all(&self.pool)
            .await?;
        let mut records: Vec<FileRecord> = rows.iter().map(file_from_row).collect();
        self.load_representations(&mut records).await?;
        Ok(records)
    }

    pub async fn find_by_sha256_and_filename(
        &self,
        sha256: &str,
        filename: &str,
    ) -> Result<Option<FileRecord>> {
        let row = sqlx::query("SELECT id, filename, sha256, parsing_successful FROM file WHERE sha256 = $1 AND filename = $2")
            .bind(sha256)
            .bind(filename)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let mut records = vec![file_from_row(&row)];
        self.load_representations(&mut records).await?;
        Ok(records.pop())
    }

    /// The full catalog snapshot in insertion order, representations loaded.
    pub async fn find_all(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query("SELECT id, filename, sha256, parsing_successful FROM file ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut records: Vec<FileRecord> = rows.iter().map(file_from_row).collect();
        self.load_representations(&mut records).await?;
        Ok(records)
    }

    /// Persists a record and all its representations in one transaction.
    /// On return the record has an id.
    pub async fn save(&self, record: &mut FileRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO file (filename, sha256, parsing_successful) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&record.filename)
        .bind(&record.sha256)
        .bind(record.parsing_successful)
        .fetch_one(&mut *tx)
        .await?;
        let file_id: i64 = row.get("id");

        for representation in &mut record.representations {
            let rep_row = sqlx::query(
                "INSERT INTO representation (type, data, file_id) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(representation.kind.as_str())
            .bind(&representation.data)
            .bind(file_id)
            .fetch_one(&mut *tx)
            .await?;
            representation.id = Some(rep_row.get("id"));
        }
        tx.commit().await?;
        record.id = Some(file_id);
        Ok(())
    }

    /// Replaces the given representations on an existing file row, in one
    /// transaction. A kind with no stored row yet is inserted instead.
    pub async fn replace_representations(
        &self,
        file_id: i64,
        representations: &[Representation],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for representation in representations {
            let updated = sqlx::query(
                "UPDATE representation SET data = $1 WHERE file_id = $2 AND type = $3",
            )
            .bind(&representation.data)
            .bind(file_id)
            .bind(representation.kind.as_str())
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                sqlx::query(
                    "INSERT INTO representation (type, data, file_id) VALUES ($1, $2, $3)",
                )
                .bind(representation.kind.as_str())
                .bind(&representation.data)
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_representations(&self, records: &mut [FileRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = records.iter().filter_map(|r| r.id).collect();
        let rows = sqlx::query(
            "SELECT id, type, data, file_id FROM representation WHERE file_id = ANY($1) ORDER BY id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_file: HashMap<i64, Vec<Representation>> = HashMap::new();
        for row in rows {
            let type_name: String = row.get("type");
            let kind = RepresentationType::from_str(&type_name).ok_or_else(|| {
                AnalysisError::InvalidEncoding(format!("unknown representation type {type_name}"))
            })?;
            by_file.entry(row.get("file_id")).or_default().push(Representation {
                id: Some(row.get("id")),
                kind,
                data: row.get("data"),
            });
        }
        for record in records {
            if let Some(id) = record.id {
                record.representations = by_file.remove(&id).unwrap_or_default();
            }
        }
        Ok(())
    }
}

fn file_from_row(row: &PgRow) -> FileRecord {
    FileRecord {
        id: Some(row.get("id")),
        filename: row.get("filename"),
        sha256: row.get("sha256"),
        parsing_successful: row.get("parsing_successful"),
        representations: Vec::new(),
    }
}

use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use std::path::Path;
use studyloop_core::{
    repo::CardStore, CoreError, Flashcard, FlashcardEdit, FlashcardId, NewFlashcard, OwnerId,
    ReviewRecord, ReviewState, Score, SubjectProgress, SubjectProgressId,
};
use tracing::info;

const CARD_COLUMNS: &str = "id,owner_id,discipline,subject,question,answer,ease_factor,\
    repetitions,current_interval,next_review_date,last_reviewed_at,revision,created_at,updated_at";

const SUBJECT_COLUMNS: &str =
    "id,owner_id,discipline,subject,last_study_date,next_review_date,created_at,updated_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| CoreError::storage("sqlite connect", e))?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!(path = %path.as_ref().display(), "sqlite store opened");
        Ok(store)
    }

    /// Private in-memory database. A single long-lived connection keeps it alive.
    pub async fn open_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CoreError::storage("sqlite connect", e))?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        const STMT: &str = r#"
        CREATE TABLE IF NOT EXISTS flashcards (
          id                TEXT PRIMARY KEY,
          owner_id          TEXT NOT NULL,
          discipline        TEXT NOT NULL,
          subject           TEXT NOT NULL,
          question          TEXT NOT NULL,
          answer            TEXT NOT NULL,
          ease_factor       REAL    NOT NULL DEFAULT 2.5,
          repetitions       INTEGER NOT NULL DEFAULT 0,
          current_interval  INTEGER NOT NULL DEFAULT 0,
          next_review_date  TEXT    NOT NULL,
          last_reviewed_at  TEXT,
          revision          INTEGER NOT NULL DEFAULT 0,
          created_at        TEXT NOT NULL,
          updated_at        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS review_log (
          id                 TEXT PRIMARY KEY,
          flashcard_id       TEXT NOT NULL,
          owner_id           TEXT NOT NULL,
          score              INTEGER NOT NULL,
          reviewed_at        TEXT NOT NULL,
          interval_applied   INTEGER NOT NULL,
          ease_factor_after  REAL NOT NULL,
          FOREIGN KEY(flashcard_id) REFERENCES flashcards(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS subject_progress (
          id                TEXT PRIMARY KEY,
          owner_id          TEXT NOT NULL,
          discipline        TEXT NOT NULL,
          subject           TEXT NOT NULL,
          last_study_date   TEXT NOT NULL,
          next_review_date  TEXT NOT NULL,
          created_at        TEXT NOT NULL,
          updated_at        TEXT NOT NULL,
          UNIQUE(owner_id, discipline, subject)
        );

        CREATE INDEX IF NOT EXISTS idx_flashcards_owner_due ON flashcards (owner_id, next_review_date);
        CREATE INDEX IF NOT EXISTS idx_subject_progress_owner_due ON subject_progress (owner_id, next_review_date);
        CREATE INDEX IF NOT EXISTS idx_review_log_card_time ON review_log (flashcard_id, reviewed_at);
        "#;

        // Execute statements one by one for compatibility.
        for chunk in STMT.split(';') {
            let sql = chunk.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::storage("sqlite schema", e))?;
        }
        Ok(())
    }

    async fn fetch_owned(&self, owner: OwnerId, id: FlashcardId) -> Result<Flashcard, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM flashcards WHERE id=? AND owner_id=?"
        ))
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::storage("read flashcard", e))?;
        row_into_card(row.ok_or(CoreError::NotFound("flashcard"))?)
    }

    async fn fetch_subject(&self, owner: OwnerId, id: SubjectProgressId) -> Result<SubjectProgress, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM subject_progress WHERE id=? AND owner_id=?"
        ))
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::storage("read subject progress", e))?;
        row_into_subject(row.ok_or(CoreError::NotFound("subject progress"))?)
    }
}

#[async_trait::async_trait]
impl CardStore for SqliteStore {
    async fn create_card(
        &self,
        owner: OwnerId,
        input: NewFlashcard,
        now: DateTime<Utc>,
    ) -> Result<Flashcard, CoreError> {
        // Stored timestamps keep microseconds.
        let card = Flashcard::new(owner, input, now.trunc_subsecs(6))?;
        sqlx::query(&format!(
            "INSERT INTO flashcards ({CARD_COLUMNS}) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)"
        ))
        .bind(card.id.to_string())
        .bind(card.owner_id.to_string())
        .bind(&card.discipline)
        .bind(&card.subject)
        .bind(&card.question)
        .bind(&card.answer)
        .bind(card.review.ease_factor)
        .bind(i64::from(card.review.repetitions))
        .bind(i64::from(card.review.current_interval))
        .bind(date_to_str(card.review.next_review_date))
        .bind(card.review.last_reviewed_at.map(dt_to_str))
        .bind(revision_to_i(card.revision)?)
        .bind(dt_to_str(card.created_at))
        .bind(dt_to_str(card.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::storage("insert flashcard", e))?;
        Ok(card)
    }

    async fn get_card(&self, owner: OwnerId, id: FlashcardId) -> Result<Flashcard, CoreError> {
        self.fetch_owned(owner, id).await
    }

    async fn list_cards(&self, owner: OwnerId) -> Result<Vec<Flashcard>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM flashcards WHERE owner_id=? \
             ORDER BY next_review_date ASC, created_at ASC"
        ))
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("list flashcards", e))?;
        rows.into_iter().map(row_into_card).collect()
    }

    async fn list_due(&self, owner: OwnerId, today: NaiveDate) -> Result<Vec<Flashcard>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM flashcards WHERE owner_id=? AND next_review_date<=? \
             ORDER BY next_review_date ASC, created_at ASC"
        ))
        .bind(owner.to_string())
        .bind(date_to_str(today))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("list due flashcards", e))?;
        rows.into_iter().map(row_into_card).collect()
    }

    async fn update_card(
        &self,
        owner: OwnerId,
        id: FlashcardId,
        edit: FlashcardEdit,
        now: DateTime<Utc>,
    ) -> Result<Flashcard, CoreError> {
        let mut card = self.fetch_owned(owner, id).await?;
        card.apply_edit(edit, now)?;
        // Content columns only; review columns belong to commit_review.
        let res = sqlx::query(
            r#"
            UPDATE flashcards SET discipline=?, subject=?, question=?, answer=?, updated_at=?
            WHERE id=? AND owner_id=?
            "#,
        )
        .bind(&card.discipline)
        .bind(&card.subject)
        .bind(&card.question)
        .bind(&card.answer)
        .bind(dt_to_str(card.updated_at))
        .bind(id.to_string())
        .bind(owner.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::storage("update flashcard", e))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("flashcard"));
        }
        self.fetch_owned(owner, id).await
    }

    async fn delete_card(&self, owner: OwnerId, id: FlashcardId) -> Result<(), CoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::storage("tx", e))?;
        sqlx::query("DELETE FROM review_log WHERE flashcard_id=? AND owner_id=?")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::storage("delete review log", e))?;
        let res = sqlx::query("DELETE FROM flashcards WHERE id=? AND owner_id=?")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::storage("delete flashcard", e))?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("flashcard"));
        }
        tx.commit()
            .await
            .map_err(|e| CoreError::storage("tx commit", e))
    }

    async fn commit_review(
        &self,
        owner: OwnerId,
        id: FlashcardId,
        expected_revision: u64,
        next: &ReviewState,
        record: &ReviewRecord,
    ) -> Result<Flashcard, CoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::storage("tx", e))?;

        let res = sqlx::query(
            r#"
            UPDATE flashcards SET
              ease_factor=?, repetitions=?, current_interval=?, next_review_date=?,
              last_reviewed_at=?, revision=revision+1, updated_at=?
            WHERE id=? AND owner_id=? AND revision=?
            "#,
        )
        .bind(next.ease_factor)
        .bind(i64::from(next.repetitions))
        .bind(i64::from(next.current_interval))
        .bind(date_to_str(next.next_review_date))
        .bind(next.last_reviewed_at.map(dt_to_str))
        .bind(dt_to_str(record.reviewed_at))
        .bind(id.to_string())
        .bind(owner.to_string())
        .bind(revision_to_i(expected_revision)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::storage("commit review", e))?;

        if res.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM flashcards WHERE id=? AND owner_id=? LIMIT 1")
                .bind(id.to_string())
                .bind(owner.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| CoreError::storage("read flashcard", e))?
                .is_some();
            tx.rollback().await.ok();
            return Err(if exists {
                CoreError::Conflict("flashcard was reviewed concurrently")
            } else {
                CoreError::NotFound("flashcard")
            });
        }

        sqlx::query(
            r#"INSERT INTO review_log
                 (id,flashcard_id,owner_id,score,reviewed_at,interval_applied,ease_factor_after)
               VALUES (?,?,?,?,?,?,?)"#,
        )
        .bind(record.id.to_string())
        .bind(record.flashcard_id.to_string())
        .bind(record.owner_id.to_string())
        .bind(i64::from(record.score.value()))
        .bind(dt_to_str(record.reviewed_at))
        .bind(i64::from(record.interval_applied))
        .bind(record.ease_factor_after)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::storage("insert review log", e))?;

        let row = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM flashcards WHERE id=? AND owner_id=?"
        ))
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CoreError::storage("read flashcard", e))?;
        let card = row_into_card(row)?;

        tx.commit()
            .await
            .map_err(|e| CoreError::storage("tx commit", e))?;
        Ok(card)
    }

    async fn list_reviews(&self, owner: OwnerId, id: FlashcardId) -> Result<Vec<ReviewRecord>, CoreError> {
        self.fetch_owned(owner, id).await?;
        let rows = sqlx::query(
            r#"SELECT id,flashcard_id,owner_id,score,reviewed_at,interval_applied,ease_factor_after
               FROM review_log WHERE flashcard_id=? AND owner_id=? ORDER BY reviewed_at ASC"#,
        )
        .bind(id.to_string())
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("list review log", e))?;
        rows.into_iter().map(row_into_record).collect()
    }

    async fn upsert_subject_progress(&self, progress: SubjectProgress) -> Result<SubjectProgress, CoreError> {
        sqlx::query(&format!(
            "INSERT INTO subject_progress ({SUBJECT_COLUMNS}) VALUES (?,?,?,?,?,?,?,?) \
             ON CONFLICT(owner_id, discipline, subject) DO UPDATE SET \
               last_study_date=excluded.last_study_date, \
               next_review_date=excluded.next_review_date, \
               updated_at=excluded.updated_at"
        ))
        .bind(progress.id.to_string())
        .bind(progress.owner_id.to_string())
        .bind(&progress.discipline)
        .bind(&progress.subject)
        .bind(date_to_str(progress.last_study_date))
        .bind(date_to_str(progress.next_review_date))
        .bind(dt_to_str(progress.created_at))
        .bind(dt_to_str(progress.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::storage("upsert subject progress", e))?;

        let row = sqlx::query(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM subject_progress \
             WHERE owner_id=? AND discipline=? AND subject=?"
        ))
        .bind(progress.owner_id.to_string())
        .bind(&progress.discipline)
        .bind(&progress.subject)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::storage("read subject progress", e))?;
        row_into_subject(row)
    }

    async fn list_subjects_due(&self, owner: OwnerId, today: NaiveDate) -> Result<Vec<SubjectProgress>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM subject_progress WHERE owner_id=? AND next_review_date<=? \
             ORDER BY next_review_date ASC, discipline ASC, subject ASC"
        ))
        .bind(owner.to_string())
        .bind(date_to_str(today))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("list due subjects", e))?;
        rows.into_iter().map(row_into_subject).collect()
    }

    async fn mark_subject_reviewed(
        &self,
        owner: OwnerId,
        id: SubjectProgressId,
        studied_on: NaiveDate,
        next_review: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<SubjectProgress, CoreError> {
        let res = sqlx::query(
            "UPDATE subject_progress SET last_study_date=?, next_review_date=?, updated_at=? \
             WHERE id=? AND owner_id=?",
        )
        .bind(date_to_str(studied_on))
        .bind(date_to_str(next_review))
        .bind(dt_to_str(now))
        .bind(id.to_string())
        .bind(owner.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::storage("mark subject reviewed", e))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("subject progress"));
        }
        self.fetch_subject(owner, id).await
    }
}

// ===== Helpers =====
fn uuid_from_str(s: String) -> Result<uuid::Uuid, CoreError> {
    uuid::Uuid::parse_str(&s).map_err(|_| CoreError::invalid(format!("bad uuid {s:?}")))
}

// Fixed-width timestamps so text ordering matches time ordering.
fn dt_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn dt_from_str(s: String) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_rfc3339(&s)
        .map_err(|_| CoreError::invalid(format!("bad timestamp {s:?}")))
        .map(|dt| dt.with_timezone(&Utc))
}

fn date_to_str(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn date_from_str(s: String) -> Result<NaiveDate, CoreError> {
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| CoreError::invalid(format!("bad date {s:?}")))
}

fn count_from_i(field: &str, v: i64) -> Result<u32, CoreError> {
    u32::try_from(v).map_err(|_| CoreError::invalid(format!("{field} out of range: {v}")))
}

fn revision_to_i(rev: u64) -> Result<i64, CoreError> {
    i64::try_from(rev).map_err(|_| CoreError::invalid("revision out of range"))
}

fn row_into_card(row: SqliteRow) -> Result<Flashcard, CoreError> {
    Ok(Flashcard {
        id: uuid_from_str(row.get("id"))?,
        owner_id: uuid_from_str(row.get("owner_id"))?,
        discipline: row.get("discipline"),
        subject: row.get("subject"),
        question: row.get("question"),
        answer: row.get("answer"),
        review: ReviewState {
            ease_factor: row.get("ease_factor"),
            repetitions: count_from_i("repetitions", row.get("repetitions"))?,
            current_interval: count_from_i("current_interval", row.get("current_interval"))?,
            next_review_date: date_from_str(row.get("next_review_date"))?,
            last_reviewed_at: row
                .get::<Option<String>, _>("last_reviewed_at")
                .map(dt_from_str)
                .transpose()?,
        },
        revision: u64::try_from(row.get::<i64, _>("revision"))
            .map_err(|_| CoreError::invalid("negative revision"))?,
        created_at: dt_from_str(row.get("created_at"))?,
        updated_at: dt_from_str(row.get("updated_at"))?,
    })
}

fn row_into_record(row: SqliteRow) -> Result<ReviewRecord, CoreError> {
    Ok(ReviewRecord {
        id: uuid_from_str(row.get("id"))?,
        flashcard_id: uuid_from_str(row.get("flashcard_id"))?,
        owner_id: uuid_from_str(row.get("owner_id"))?,
        score: Score::new(row.get::<i64, _>("score"))?,
        reviewed_at: dt_from_str(row.get("reviewed_at"))?,
        interval_applied: count_from_i("interval_applied", row.get("interval_applied"))?,
        ease_factor_after: row.get("ease_factor_after"),
    })
}

fn row_into_subject(row: SqliteRow) -> Result<SubjectProgress, CoreError> {
    Ok(SubjectProgress {
        id: uuid_from_str(row.get("id"))?,
        owner_id: uuid_from_str(row.get("owner_id"))?,
        discipline: row.get("discipline"),
        subject: row.get("subject"),
        last_study_date: date_from_str(row.get("last_study_date"))?,
        next_review_date: date_from_str(row.get("next_review_date"))?,
        created_at: dt_from_str(row.get("created_at"))?,
        updated_at: dt_from_str(row.get("updated_at"))?,
    })
}

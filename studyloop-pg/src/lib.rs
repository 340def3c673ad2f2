use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Row,
};
use studyloop_core::{
    repo::CardStore, CoreError, Flashcard, FlashcardEdit, FlashcardId, NewFlashcard, OwnerId,
    ReviewRecord, ReviewState, Score, SubjectProgress, SubjectProgressId,
};
use tracing::info;

const CARD_COLUMNS: &str = "id,owner_id,discipline,subject,question,answer,ease_factor,\
    repetitions,current_interval,next_review_date,last_reviewed_at,revision,created_at,updated_at";

const SUBJECT_COLUMNS: &str =
    "id,owner_id,discipline,subject,last_study_date,next_review_date,created_at,updated_at";

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| CoreError::storage("pg connect", e))?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!("postgres store connected");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        const STMT: &str = r#"
        CREATE TABLE IF NOT EXISTS flashcards (
          id                uuid PRIMARY KEY,
          owner_id          uuid NOT NULL,
          discipline        text NOT NULL,
          subject           text NOT NULL,
          question          text NOT NULL,
          answer            text NOT NULL,
          ease_factor       double precision NOT NULL DEFAULT 2.5 CHECK (ease_factor >= 1.3),
          repetitions       integer NOT NULL DEFAULT 0 CHECK (repetitions >= 0),
          current_interval  integer NOT NULL DEFAULT 0 CHECK (current_interval >= 0),
          next_review_date  date NOT NULL,
          last_reviewed_at  timestamptz,
          revision          bigint NOT NULL DEFAULT 0,
          created_at        timestamptz NOT NULL,
          updated_at        timestamptz NOT NULL
        );

        CREATE TABLE IF NOT EXISTS review_log (
          id                 uuid PRIMARY KEY,
          flashcard_id       uuid NOT NULL REFERENCES flashcards(id) ON DELETE CASCADE,
          owner_id           uuid NOT NULL,
          score              smallint NOT NULL CHECK (score BETWEEN 0 AND 5),
          reviewed_at        timestamptz NOT NULL,
          interval_applied   integer NOT NULL,
          ease_factor_after  double precision NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subject_progress (
          id                uuid PRIMARY KEY,
          owner_id          uuid NOT NULL,
          discipline        text NOT NULL,
          subject           text NOT NULL,
          last_study_date   date NOT NULL,
          next_review_date  date NOT NULL,
          created_at        timestamptz NOT NULL,
          updated_at        timestamptz NOT NULL,
          UNIQUE (owner_id, discipline, subject)
        );

        CREATE INDEX IF NOT EXISTS idx_flashcards_owner_due ON flashcards (owner_id, next_review_date);
        CREATE INDEX IF NOT EXISTS idx_subject_progress_owner_due ON subject_progress (owner_id, next_review_date);
        CREATE INDEX IF NOT EXISTS idx_review_log_card_time ON review_log (flashcard_id, reviewed_at);
        "#;

        for chunk in STMT.split(';') {
            let sql = chunk.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::storage("pg schema", e))?;
        }
        Ok(())
    }

    async fn fetch_owned(&self, owner: OwnerId, id: FlashcardId) -> Result<Flashcard, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM flashcards WHERE id=$1 AND owner_id=$2"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg read flashcard", e))?;
        row_into_card(row.ok_or(CoreError::NotFound("flashcard"))?)
    }
}

#[async_trait::async_trait]
impl CardStore for PostgresStore {
    async fn create_card(
        &self,
        owner: OwnerId,
        input: NewFlashcard,
        now: DateTime<Utc>,
    ) -> Result<Flashcard, CoreError> {
        // timestamptz keeps microseconds.
        let card = Flashcard::new(owner, input, now.trunc_subsecs(6))?;
        sqlx::query(&format!(
            "INSERT INTO flashcards ({CARD_COLUMNS}) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)"
        ))
        .bind(card.id)
        .bind(card.owner_id)
        .bind(&card.discipline)
        .bind(&card.subject)
        .bind(&card.question)
        .bind(&card.answer)
        .bind(card.review.ease_factor)
        .bind(count_to_i(card.review.repetitions)?)
        .bind(count_to_i(card.review.current_interval)?)
        .bind(card.review.next_review_date)
        .bind(card.review.last_reviewed_at)
        .bind(revision_to_i(card.revision)?)
        .bind(card.created_at)
        .bind(card.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg insert flashcard", e))?;
        Ok(card)
    }

    async fn get_card(&self, owner: OwnerId, id: FlashcardId) -> Result<Flashcard, CoreError> {
        self.fetch_owned(owner, id).await
    }

    async fn list_cards(&self, owner: OwnerId) -> Result<Vec<Flashcard>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM flashcards WHERE owner_id=$1 \
             ORDER BY next_review_date ASC, created_at ASC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg list flashcards", e))?;
        rows.into_iter().map(row_into_card).collect()
    }

    async fn list_due(&self, owner: OwnerId, today: NaiveDate) -> Result<Vec<Flashcard>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM flashcards WHERE owner_id=$1 AND next_review_date<=$2 \
             ORDER BY next_review_date ASC, created_at ASC"
        ))
        .bind(owner)
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg list due flashcards", e))?;
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
        let row = sqlx::query(&format!(
            "UPDATE flashcards SET discipline=$1, subject=$2, question=$3, answer=$4, updated_at=$5 \
             WHERE id=$6 AND owner_id=$7 RETURNING {CARD_COLUMNS}"
        ))
        .bind(&card.discipline)
        .bind(&card.subject)
        .bind(&card.question)
        .bind(&card.answer)
        .bind(card.updated_at)
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg update flashcard", e))?;
        row_into_card(row.ok_or(CoreError::NotFound("flashcard"))?)
    }

    async fn delete_card(&self, owner: OwnerId, id: FlashcardId) -> Result<(), CoreError> {
        // review_log rows go with the card via ON DELETE CASCADE
        let res = sqlx::query("DELETE FROM flashcards WHERE id=$1 AND owner_id=$2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::storage("pg delete flashcard", e))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("flashcard"));
        }
        Ok(())
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
            .map_err(|e| CoreError::storage("pg tx", e))?;

        let row = sqlx::query(&format!(
            "UPDATE flashcards SET ease_factor=$1, repetitions=$2, current_interval=$3, \
               next_review_date=$4, last_reviewed_at=$5, revision=revision+1, updated_at=$6 \
             WHERE id=$7 AND owner_id=$8 AND revision=$9 RETURNING {CARD_COLUMNS}"
        ))
        .bind(next.ease_factor)
        .bind(count_to_i(next.repetitions)?)
        .bind(count_to_i(next.current_interval)?)
        .bind(next.next_review_date)
        .bind(next.last_reviewed_at)
        .bind(record.reviewed_at)
        .bind(id)
        .bind(owner)
        .bind(revision_to_i(expected_revision)?)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CoreError::storage("pg commit review", e))?;

        let Some(row) = row else {
            let exists = sqlx::query_scalar::<_, i32>(
                "SELECT 1 FROM flashcards WHERE id=$1 AND owner_id=$2 LIMIT 1",
            )
            .bind(id)
            .bind(owner)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| CoreError::storage("pg read flashcard", e))?
            .is_some();
            tx.rollback().await.ok();
            return Err(if exists {
                CoreError::Conflict("flashcard was reviewed concurrently")
            } else {
                CoreError::NotFound("flashcard")
            });
        };
        let card = row_into_card(row)?;

        sqlx::query(
            r#"INSERT INTO review_log
                 (id,flashcard_id,owner_id,score,reviewed_at,interval_applied,ease_factor_after)
               VALUES ($1,$2,$3,$4,$5,$6,$7)"#,
        )
        .bind(record.id)
        .bind(record.flashcard_id)
        .bind(record.owner_id)
        .bind(i16::from(record.score.value()))
        .bind(record.reviewed_at)
        .bind(count_to_i(record.interval_applied)?)
        .bind(record.ease_factor_after)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::storage("pg insert review log", e))?;

        tx.commit()
            .await
            .map_err(|e| CoreError::storage("pg tx commit", e))?;
        Ok(card)
    }

    async fn list_reviews(&self, owner: OwnerId, id: FlashcardId) -> Result<Vec<ReviewRecord>, CoreError> {
        self.fetch_owned(owner, id).await?;
        let rows = sqlx::query(
            r#"SELECT id,flashcard_id,owner_id,score,reviewed_at,interval_applied,ease_factor_after
               FROM review_log WHERE flashcard_id=$1 AND owner_id=$2 ORDER BY reviewed_at ASC"#,
        )
        .bind(id)
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg list review log", e))?;
        rows.into_iter().map(row_into_record).collect()
    }

    async fn upsert_subject_progress(&self, progress: SubjectProgress) -> Result<SubjectProgress, CoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO subject_progress ({SUBJECT_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8) \
             ON CONFLICT (owner_id, discipline, subject) DO UPDATE SET \
               last_study_date=EXCLUDED.last_study_date, \
               next_review_date=EXCLUDED.next_review_date, \
               updated_at=EXCLUDED.updated_at \
             RETURNING {SUBJECT_COLUMNS}"
        ))
        .bind(progress.id)
        .bind(progress.owner_id)
        .bind(&progress.discipline)
        .bind(&progress.subject)
        .bind(progress.last_study_date)
        .bind(progress.next_review_date)
        .bind(progress.created_at)
        .bind(progress.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg upsert subject progress", e))?;
        Ok(row_into_subject(row))
    }

    async fn list_subjects_due(&self, owner: OwnerId, today: NaiveDate) -> Result<Vec<SubjectProgress>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM subject_progress WHERE owner_id=$1 AND next_review_date<=$2 \
             ORDER BY next_review_date ASC, discipline ASC, subject ASC"
        ))
        .bind(owner)
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg list due subjects", e))?;
        Ok(rows.into_iter().map(row_into_subject).collect())
    }

    async fn mark_subject_reviewed(
        &self,
        owner: OwnerId,
        id: SubjectProgressId,
        studied_on: NaiveDate,
        next_review: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<SubjectProgress, CoreError> {
        let row = sqlx::query(&format!(
            "UPDATE subject_progress SET last_study_date=$1, next_review_date=$2, updated_at=$3 \
             WHERE id=$4 AND owner_id=$5 RETURNING {SUBJECT_COLUMNS}"
        ))
        .bind(studied_on)
        .bind(next_review)
        .bind(now)
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::storage("pg mark subject reviewed", e))?;
        row.map(row_into_subject)
            .ok_or(CoreError::NotFound("subject progress"))
    }
}

// ===== Helpers =====
fn count_to_i(v: u32) -> Result<i32, CoreError> {
    i32::try_from(v).map_err(|_| CoreError::invalid(format!("value out of range: {v}")))
}

fn count_from_i(field: &str, v: i32) -> Result<u32, CoreError> {
    u32::try_from(v).map_err(|_| CoreError::invalid(format!("{field} out of range: {v}")))
}

fn revision_to_i(rev: u64) -> Result<i64, CoreError> {
    i64::try_from(rev).map_err(|_| CoreError::invalid("revision out of range"))
}

fn row_into_card(row: PgRow) -> Result<Flashcard, CoreError> {
    Ok(Flashcard {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        discipline: row.get("discipline"),
        subject: row.get("subject"),
        question: row.get("question"),
        answer: row.get("answer"),
        review: ReviewState {
            ease_factor: row.get("ease_factor"),
            repetitions: count_from_i("repetitions", row.get("repetitions"))?,
            current_interval: count_from_i("current_interval", row.get("current_interval"))?,
            next_review_date: row.get("next_review_date"),
            last_reviewed_at: row.get("last_reviewed_at"),
        },
        revision: u64::try_from(row.get::<i64, _>("revision"))
            .map_err(|_| CoreError::invalid("negative revision"))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_into_record(row: PgRow) -> Result<ReviewRecord, CoreError> {
    Ok(ReviewRecord {
        id: row.get("id"),
        flashcard_id: row.get("flashcard_id"),
        owner_id: row.get("owner_id"),
        score: Score::new(i64::from(row.get::<i16, _>("score")))?,
        reviewed_at: row.get("reviewed_at"),
        interval_applied: count_from_i("interval_applied", row.get("interval_applied"))?,
        ease_factor_after: row.get("ease_factor_after"),
    })
}

fn row_into_subject(row: PgRow) -> SubjectProgress {
    SubjectProgress {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        discipline: row.get("discipline"),
        subject: row.get("subject"),
        last_study_date: row.get("last_study_date"),
        next_review_date: row.get("next_review_date"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use chrono::NaiveDate;

use crate::{
    compute_next_review_state, next_subject_review, CardStore, Clock, CoreError, Flashcard,
    FlashcardEdit, FlashcardId, NewFlashcard, OwnerId, ReviewRecord, ReviewState, Score,
    SubjectProgress, SubjectProgressId,
};

/// Result of one review event.
#[derive(Clone, Debug, Serialize)]
pub struct ReviewReceipt {
    pub flashcard: Flashcard,
    pub previous: ReviewState,
    pub record: ReviewRecord,
}

/// Glue between callers, the scheduler and a [`CardStore`].
#[derive(Clone)]
pub struct ReviewService {
    store: Arc<dyn CardStore>,
    clock: Arc<dyn Clock>,
}

impl ReviewService {
    pub fn new(store: Arc<dyn CardStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Records a review: read the card, schedule it, write it back only if
    /// nobody else did in between. A stale write surfaces as `Conflict` and
    /// is not retried, so one event moves the card at most once.
    pub async fn review(
        &self,
        owner: OwnerId,
        id: FlashcardId,
        score: Score,
    ) -> Result<ReviewReceipt, CoreError> {
        let now = self.clock.now();
        let card = self.store.get_card(owner, id).await?;
        let next = compute_next_review_state(&card.review, score, now)?;
        let record = ReviewRecord::new(&card, score, &next, now);

        let updated = match self
            .store
            .commit_review(owner, id, card.revision, &next, &record)
            .await
        {
            Ok(c) => c,
            Err(e @ CoreError::Conflict(_)) => {
                warn!(flashcard = %id, revision = card.revision, "stale review rejected");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        info!(
            flashcard = %id,
            score = score.value(),
            repetitions = updated.review.repetitions,
            interval = updated.review.current_interval,
            next_review = %updated.review.next_review_date,
            "flashcard reviewed"
        );

        Ok(ReviewReceipt {
            flashcard: updated,
            previous: card.review,
            record,
        })
    }

    pub async fn due_cards(&self, owner: OwnerId) -> Result<Vec<Flashcard>, CoreError> {
        let today = self.clock.now().date_naive();
        let cards = self.store.list_due(owner, today).await?;
        debug!(owner = %owner, %today, due = cards.len(), "listed due flashcards");
        Ok(cards)
    }

    pub async fn create_card(&self, owner: OwnerId, input: NewFlashcard) -> Result<Flashcard, CoreError> {
        let card = self.store.create_card(owner, input, self.clock.now()).await?;
        info!(flashcard = %card.id, owner = %owner, "flashcard created");
        Ok(card)
    }

    pub async fn update_card(
        &self,
        owner: OwnerId,
        id: FlashcardId,
        edit: FlashcardEdit,
    ) -> Result<Flashcard, CoreError> {
        if edit.is_empty() {
            return Err(CoreError::invalid("nothing to update"));
        }
        self.store.update_card(owner, id, edit, self.clock.now()).await
    }

    pub async fn delete_card(&self, owner: OwnerId, id: FlashcardId) -> Result<(), CoreError> {
        self.store.delete_card(owner, id).await?;
        info!(flashcard = %id, owner = %owner, "flashcard deleted");
        Ok(())
    }

    pub async fn get_card(&self, owner: OwnerId, id: FlashcardId) -> Result<Flashcard, CoreError> {
        self.store.get_card(owner, id).await
    }

    pub async fn list_cards(&self, owner: OwnerId) -> Result<Vec<Flashcard>, CoreError> {
        self.store.list_cards(owner).await
    }

    pub async fn history(&self, owner: OwnerId, id: FlashcardId) -> Result<Vec<ReviewRecord>, CoreError> {
        self.store.list_reviews(owner, id).await
    }

    /// Records that a subject was studied on `studied_on` (today when absent)
    /// and schedules its next subject review a week from today.
    pub async fn record_study(
        &self,
        owner: OwnerId,
        discipline: &str,
        subject: &str,
        studied_on: Option<NaiveDate>,
    ) -> Result<SubjectProgress, CoreError> {
        let now = self.clock.now();
        let studied_on = studied_on.unwrap_or_else(|| now.date_naive());
        let progress = SubjectProgress::new(owner, discipline, subject, studied_on, now)?;
        let stored = self.store.upsert_subject_progress(progress).await?;
        info!(
            subject_progress = %stored.id,
            discipline = %stored.discipline,
            subject = %stored.subject,
            next_review = %stored.next_review_date,
            "subject progress recorded"
        );
        Ok(stored)
    }

    pub async fn subjects_due(&self, owner: OwnerId) -> Result<Vec<SubjectProgress>, CoreError> {
        let today = self.clock.now().date_naive();
        let subjects = self.store.list_subjects_due(owner, today).await?;
        debug!(owner = %owner, %today, due = subjects.len(), "listed due subjects");
        Ok(subjects)
    }

    pub async fn mark_subject_reviewed(
        &self,
        owner: OwnerId,
        id: SubjectProgressId,
    ) -> Result<SubjectProgress, CoreError> {
        let now = self.clock.now();
        let next = next_subject_review(now)?;
        let p = self
            .store
            .mark_subject_reviewed(owner, id, now.date_naive(), next, now)
            .await?;
        info!(subject_progress = %id, next_review = %p.next_review_date, "subject reviewed");
        Ok(p)
    }
}

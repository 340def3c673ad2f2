use crate::{
    CoreError, Flashcard, FlashcardEdit, FlashcardId, NewFlashcard, OwnerId, ReviewRecord,
    ReviewState, SubjectProgress, SubjectProgressId,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

pub mod memory;

/// Persistence for flashcards. Every call is scoped to one owner; a card
/// owned by someone else behaves as missing.
#[async_trait]
pub trait CardStore: Send + Sync {
    async fn create_card(
        &self,
        owner: OwnerId,
        input: NewFlashcard,
        now: DateTime<Utc>,
    ) -> Result<Flashcard, CoreError>;

    async fn get_card(&self, owner: OwnerId, id: FlashcardId) -> Result<Flashcard, CoreError>;

    /// All cards of `owner`, earliest next review first.
    async fn list_cards(&self, owner: OwnerId) -> Result<Vec<Flashcard>, CoreError>;

    /// Cards of `owner` with `next_review_date <= today`, earliest first.
    async fn list_due(&self, owner: OwnerId, today: NaiveDate) -> Result<Vec<Flashcard>, CoreError>;

    async fn update_card(
        &self,
        owner: OwnerId,
        id: FlashcardId,
        edit: FlashcardEdit,
        now: DateTime<Utc>,
    ) -> Result<Flashcard, CoreError>;

    async fn delete_card(&self, owner: OwnerId, id: FlashcardId) -> Result<(), CoreError>;

    /// Stores `next` and appends `record` in one step, provided the card is
    /// still at `expected_revision`. Fails with `Conflict` otherwise.
    async fn commit_review(
        &self,
        owner: OwnerId,
        id: FlashcardId,
        expected_revision: u64,
        next: &ReviewState,
        record: &ReviewRecord,
    ) -> Result<Flashcard, CoreError>;

    async fn list_reviews(&self, owner: OwnerId, id: FlashcardId) -> Result<Vec<ReviewRecord>, CoreError>;

    /// Inserts `progress`, or when `(owner, discipline, subject)` already has
    /// a row, overwrites its two dates and keeps its id.
    async fn upsert_subject_progress(&self, progress: SubjectProgress) -> Result<SubjectProgress, CoreError>;

    /// Subjects of `owner` with `next_review_date <= today`, earliest first.
    async fn list_subjects_due(&self, owner: OwnerId, today: NaiveDate) -> Result<Vec<SubjectProgress>, CoreError>;

    async fn mark_subject_reviewed(
        &self,
        owner: OwnerId,
        id: SubjectProgressId,
        studied_on: NaiveDate,
        next_review: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<SubjectProgress, CoreError>;
}

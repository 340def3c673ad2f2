use crate::{
    filters::{filter_due, sort_for_review, sort_subjects_for_review},
    CoreError, Flashcard, FlashcardEdit, FlashcardId, NewFlashcard, OwnerId, ReviewRecord,
    ReviewState, SubjectProgress, SubjectProgressId,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct Tables {
    cards: HashMap<FlashcardId, Flashcard>,
    reviews: HashMap<FlashcardId, Vec<ReviewRecord>>,
    subjects: HashMap<SubjectProgressId, SubjectProgress>,
}

/// Volatile store; one lock covers every table so a commit is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn owned<'a>(
    cards: &'a HashMap<FlashcardId, Flashcard>,
    owner: OwnerId,
    id: FlashcardId,
) -> Option<&'a Flashcard> {
    cards.get(&id).filter(|c| c.owner_id == owner)
}

#[async_trait]
impl crate::repo::CardStore for MemoryStore {
    async fn create_card(
        &self,
        owner: OwnerId,
        input: NewFlashcard,
        now: DateTime<Utc>,
    ) -> Result<Flashcard, CoreError> {
        let card = Flashcard::new(owner, input, now)?;
        self.tables.write().cards.insert(card.id, card.clone());
        Ok(card)
    }

    async fn get_card(&self, owner: OwnerId, id: FlashcardId) -> Result<Flashcard, CoreError> {
        owned(&self.tables.read().cards, owner, id)
            .cloned()
            .ok_or(CoreError::NotFound("flashcard"))
    }

    async fn list_cards(&self, owner: OwnerId) -> Result<Vec<Flashcard>, CoreError> {
        let mut v: Vec<Flashcard> = self
            .tables
            .read()
            .cards
            .values()
            .filter(|c| c.owner_id == owner)
            .cloned()
            .collect();
        sort_for_review(&mut v);
        Ok(v)
    }

    async fn list_due(&self, owner: OwnerId, today: NaiveDate) -> Result<Vec<Flashcard>, CoreError> {
        let cards = self.list_cards(owner).await?;
        Ok(filter_due(&cards, today))
    }

    async fn update_card(
        &self,
        owner: OwnerId,
        id: FlashcardId,
        edit: FlashcardEdit,
        now: DateTime<Utc>,
    ) -> Result<Flashcard, CoreError> {
        let mut t = self.tables.write();
        let Some(card) = t.cards.get_mut(&id).filter(|c| c.owner_id == owner) else {
            return Err(CoreError::NotFound("flashcard"));
        };
        card.apply_edit(edit, now)?;
        Ok(card.clone())
    }

    async fn delete_card(&self, owner: OwnerId, id: FlashcardId) -> Result<(), CoreError> {
        let mut t = self.tables.write();
        if owned(&t.cards, owner, id).is_none() {
            return Err(CoreError::NotFound("flashcard"));
        }
        t.cards.remove(&id);
        t.reviews.remove(&id);
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
        let mut t = self.tables.write();
        let Some(card) = t.cards.get_mut(&id).filter(|c| c.owner_id == owner) else {
            return Err(CoreError::NotFound("flashcard"));
        };
        if card.revision != expected_revision {
            return Err(CoreError::Conflict("flashcard was reviewed concurrently"));
        }
        card.review = next.clone();
        card.revision += 1;
        card.updated_at = record.reviewed_at;
        let updated = card.clone();
        t.reviews.entry(id).or_default().push(record.clone());
        Ok(updated)
    }

    async fn list_reviews(&self, owner: OwnerId, id: FlashcardId) -> Result<Vec<ReviewRecord>, CoreError> {
        let t = self.tables.read();
        if owned(&t.cards, owner, id).is_none() {
            return Err(CoreError::NotFound("flashcard"));
        }
        Ok(t.reviews.get(&id).cloned().unwrap_or_default())
    }

    async fn upsert_subject_progress(&self, progress: SubjectProgress) -> Result<SubjectProgress, CoreError> {
        let mut t = self.tables.write();
        let existing = t.subjects.values_mut().find(|p| {
            p.owner_id == progress.owner_id
                && p.discipline == progress.discipline
                && p.subject == progress.subject
        });
        if let Some(p) = existing {
            p.last_study_date = progress.last_study_date;
            p.next_review_date = progress.next_review_date;
            p.updated_at = progress.updated_at;
            return Ok(p.clone());
        }
        t.subjects.insert(progress.id, progress.clone());
        Ok(progress)
    }

    async fn list_subjects_due(&self, owner: OwnerId, today: NaiveDate) -> Result<Vec<SubjectProgress>, CoreError> {
        let mut v: Vec<SubjectProgress> = self
            .tables
            .read()
            .subjects
            .values()
            .filter(|p| p.owner_id == owner && p.is_due(today))
            .cloned()
            .collect();
        sort_subjects_for_review(&mut v);
        Ok(v)
    }

    async fn mark_subject_reviewed(
        &self,
        owner: OwnerId,
        id: SubjectProgressId,
        studied_on: NaiveDate,
        next_review: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<SubjectProgress, CoreError> {
        let mut t = self.tables.write();
        let Some(p) = t.subjects.get_mut(&id).filter(|p| p.owner_id == owner) else {
            return Err(CoreError::NotFound("subject progress"));
        };
        p.last_study_date = studied_on;
        p.next_review_date = next_review;
        p.updated_at = now;
        Ok(p.clone())
    }
}

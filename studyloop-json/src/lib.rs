use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use studyloop_core::{
    filters::{filter_due, sort_for_review, sort_subjects_for_review},
    repo::CardStore,
    CoreError, Flashcard, FlashcardEdit, FlashcardId, NewFlashcard, OwnerId, ReviewRecord,
    ReviewState, SubjectProgress, SubjectProgressId,
};
use tempfile::NamedTempFile;
use tokio::{sync::Mutex, task};
use tracing::{debug, info};

pub mod paths;

const FILE_VERSION: u32 = 1;

#[derive(Clone, Serialize, Deserialize)]
struct FileImage {
    version: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    flashcards: Vec<Flashcard>,
    reviews: Vec<ReviewRecord>,
    #[serde(default)]
    subjects: Vec<SubjectProgress>,
}

#[derive(Clone)]
struct State {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cards: HashMap<FlashcardId, Flashcard>,
    reviews: HashMap<FlashcardId, Vec<ReviewRecord>>,
    subjects: HashMap<SubjectProgressId, SubjectProgress>,
}

impl State {
    fn new_empty() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            cards: HashMap::new(),
            reviews: HashMap::new(),
            subjects: HashMap::new(),
        }
    }

    fn to_image(&self) -> FileImage {
        let mut flashcards: Vec<Flashcard> = self.cards.values().cloned().collect();
        flashcards.sort_by_key(|c| (c.created_at, c.id));
        let mut reviews: Vec<ReviewRecord> = self.reviews.values().flatten().cloned().collect();
        reviews.sort_by_key(|r| (r.reviewed_at, r.id));
        let mut subjects: Vec<SubjectProgress> = self.subjects.values().cloned().collect();
        subjects.sort_by_key(|p| (p.created_at, p.id));
        FileImage {
            version: FILE_VERSION,
            created_at: self.created_at,
            updated_at: self.updated_at,
            flashcards,
            reviews,
            subjects,
        }
    }

    fn from_image(img: FileImage) -> Self {
        let cards = img.flashcards.into_iter().map(|c| (c.id, c)).collect();
        let mut reviews: HashMap<FlashcardId, Vec<ReviewRecord>> = HashMap::new();
        for r in img.reviews {
            reviews.entry(r.flashcard_id).or_default().push(r);
        }
        Self {
            created_at: img.created_at,
            updated_at: img.updated_at,
            cards,
            reviews,
            subjects: img.subjects.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    fn owned_mut(&mut self, owner: OwnerId, id: FlashcardId) -> Result<&mut Flashcard, CoreError> {
        self.cards
            .get_mut(&id)
            .filter(|c| c.owner_id == owner)
            .ok_or(CoreError::NotFound("flashcard"))
    }

    fn owned(&self, owner: OwnerId, id: FlashcardId) -> Result<&Flashcard, CoreError> {
        self.cards
            .get(&id)
            .filter(|c| c.owner_id == owner)
            .ok_or(CoreError::NotFound("flashcard"))
    }
}

/// Whole-file JSON store. Writes go to a copy of the state which replaces the
/// live one only after the file has been persisted.
pub struct JsonStore {
    path: PathBuf,
    backups_dir: PathBuf,
    max_backups: usize,
    state: RwLock<State>,
    writer: Mutex<()>,
}

impl JsonStore {
    pub async fn open_default() -> Result<Self, CoreError> {
        let (file, backups) = paths::default_store_file();
        Self::open_with(file, backups, 10).await
    }

    pub async fn open_with(path: PathBuf, backups_dir: PathBuf, max_backups: usize) -> Result<Self, CoreError> {
        ensure_parent_dirs(&path)?;
        ensure_dir(&backups_dir)?;
        let max_backups = max_backups.max(1);
        let state = load_or_init(&path, &backups_dir, max_backups).await?;
        info!(path = %path.display(), cards = state.cards.len(), "json store opened");
        Ok(Self {
            path,
            backups_dir,
            max_backups,
            state: RwLock::new(state),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn mutate<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut State) -> Result<T, CoreError>,
    {
        let _guard = self.writer.lock().await;
        let mut next = self.state.read().clone();
        let out = f(&mut next)?;
        next.updated_at = Utc::now();

        let snapshot = next.to_image();
        let path = self.path.clone();
        let backups = self.backups_dir.clone();
        let keep = self.max_backups;
        task::spawn_blocking(move || write_with_backup(&path, &backups, keep, &snapshot))
            .await
            .map_err(|e| CoreError::storage("json write task", e))?
            .map_err(|e| CoreError::storage("json write", e))?;

        *self.state.write() = next;
        debug!(path = %self.path.display(), "json store saved");
        Ok(out)
    }
}

fn ensure_parent_dirs(path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    Ok(())
}

fn ensure_dir(path: &Path) -> Result<(), CoreError> {
    fs::create_dir_all(path).map_err(|e| CoreError::storage("create dir", e))
}

async fn load_or_init(path: &Path, backups_dir: &Path, keep: usize) -> Result<State, CoreError> {
    if path.exists() {
        let p = path.to_path_buf();
        let img: FileImage = task::spawn_blocking(move || {
            let buf = fs::read_to_string(&p)?;
            let v = serde_json::from_str::<FileImage>(&buf)?;
            Ok::<FileImage, std::io::Error>(v)
        })
        .await
        .map_err(|e| CoreError::storage("json read task", e))?
        .map_err(|e| CoreError::storage("json read", e))?;
        if img.version != FILE_VERSION {
            return Err(CoreError::Storage(format!(
                "unsupported store file version {}",
                img.version
            )));
        }
        Ok(State::from_image(img))
    } else {
        let st = State::new_empty();
        let img = st.to_image();
        write_with_backup(path, backups_dir, keep, &img).map_err(|e| CoreError::storage("json init", e))?;
        Ok(st)
    }
}

fn write_with_backup(path: &Path, backups_dir: &Path, max_backups: usize, img: &FileImage) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir_all(backups_dir)?;

    let json = serde_json::to_vec_pretty(img)?;
    let mut tmp = NamedTempFile::new_in(path.parent().unwrap_or_else(|| Path::new(".")))?;
    tmp.write_all(&json)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;

    // Backup rotation
    let ts = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
    let backup_path = backups_dir.join(format!("studyloop-{ts}.json"));
    let mut btmp = NamedTempFile::new_in(backups_dir)?;
    btmp.write_all(&json)?;
    btmp.flush()?;
    btmp.persist(&backup_path).map_err(|e| e.error)?;

    rotate_backups(backups_dir, max_backups)
}

fn rotate_backups(dir: &Path, keep: usize) -> Result<(), std::io::Error> {
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    entries.sort_by_key(|e| e.file_name());
    if entries.len() > keep {
        for e in &entries[0..entries.len() - keep] {
            let _ = fs::remove_file(e.path());
        }
    }
    Ok(())
}

#[async_trait]
impl CardStore for JsonStore {
    async fn create_card(
        &self,
        owner: OwnerId,
        input: NewFlashcard,
        now: DateTime<Utc>,
    ) -> Result<Flashcard, CoreError> {
        let card = Flashcard::new(owner, input, now)?;
        self.mutate(|s| {
            s.cards.insert(card.id, card.clone());
            Ok(())
        })
        .await?;
        Ok(card)
    }

    async fn get_card(&self, owner: OwnerId, id: FlashcardId) -> Result<Flashcard, CoreError> {
        self.state.read().owned(owner, id).cloned()
    }

    async fn list_cards(&self, owner: OwnerId) -> Result<Vec<Flashcard>, CoreError> {
        let mut v: Vec<Flashcard> = self
            .state
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
        self.mutate(|s| {
            let card = s.owned_mut(owner, id)?;
            card.apply_edit(edit, now)?;
            Ok(card.clone())
        })
        .await
    }

    async fn delete_card(&self, owner: OwnerId, id: FlashcardId) -> Result<(), CoreError> {
        self.mutate(|s| {
            s.owned(owner, id)?;
            s.cards.remove(&id);
            s.reviews.remove(&id);
            Ok(())
        })
        .await
    }

    async fn commit_review(
        &self,
        owner: OwnerId,
        id: FlashcardId,
        expected_revision: u64,
        next: &ReviewState,
        record: &ReviewRecord,
    ) -> Result<Flashcard, CoreError> {
        self.mutate(|s| {
            let card = s.owned_mut(owner, id)?;
            if card.revision != expected_revision {
                return Err(CoreError::Conflict("flashcard was reviewed concurrently"));
            }
            card.review = next.clone();
            card.revision += 1;
            card.updated_at = record.reviewed_at;
            let updated = card.clone();
            s.reviews.entry(id).or_default().push(record.clone());
            Ok(updated)
        })
        .await
    }

    async fn list_reviews(&self, owner: OwnerId, id: FlashcardId) -> Result<Vec<ReviewRecord>, CoreError> {
        let s = self.state.read();
        s.owned(owner, id)?;
        Ok(s.reviews.get(&id).cloned().unwrap_or_default())
    }

    async fn upsert_subject_progress(&self, progress: SubjectProgress) -> Result<SubjectProgress, CoreError> {
        self.mutate(|s| {
            let existing = s.subjects.values_mut().find(|p| {
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
            s.subjects.insert(progress.id, progress.clone());
            Ok(progress)
        })
        .await
    }

    async fn list_subjects_due(&self, owner: OwnerId, today: NaiveDate) -> Result<Vec<SubjectProgress>, CoreError> {
        let mut v: Vec<SubjectProgress> = self
            .state
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
        self.mutate(|s| {
            let p = s
                .subjects
                .get_mut(&id)
                .filter(|p| p.owner_id == owner)
                .ok_or(CoreError::NotFound("subject progress"))?;
            p.last_study_date = studied_on;
            p.next_review_date = next_review;
            p.updated_at = now;
            Ok(p.clone())
        })
        .await
    }
}

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::CoreError;

pub type FlashcardId = Uuid;
pub type OwnerId = Uuid;
pub type ReviewId = Uuid;
pub type SubjectProgressId = Uuid;

pub const EF_MIN: f64 = 1.3;
pub const EF_DEFAULT: f64 = 2.5;

pub const SCORE_MAX: u8 = 5;
/// Lowest score that counts as a successful recall.
pub const SCORE_PASS: u8 = 3;

/// Fixed gap between subject-level reviews.
pub const SUBJECT_REVIEW_DAYS: u64 = 7;

/// Recall quality for one review event, 0 (forgot) to 5 (perfect).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Score(u8);

impl Score {
    pub const AGAIN: Score = Score(0);
    pub const HARD: Score = Score(3);
    pub const GOOD: Score = Score(4);
    pub const EASY: Score = Score(5);

    pub fn new(value: i64) -> Result<Self, CoreError> {
        if (0..=SCORE_MAX as i64).contains(&value) {
            Ok(Score(value as u8))
        } else {
            Err(CoreError::invalid(format!(
                "score must be an integer in 0..={SCORE_MAX}, got {value}"
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 >= SCORE_PASS
    }
}

impl TryFrom<i64> for Score {
    type Error = CoreError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Score::new(value)
    }
}

impl TryFrom<f64> for Score {
    type Error = CoreError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value.fract() != 0.0 {
            return Err(CoreError::invalid(format!(
                "score must be an integer in 0..={SCORE_MAX}, got {value}"
            )));
        }
        Score::new(value as i64)
    }
}

impl TryFrom<&serde_json::Number> for Score {
    type Error = CoreError;

    fn try_from(value: &serde_json::Number) -> Result<Self, Self::Error> {
        if let Some(i) = value.as_i64() {
            Score::new(i)
        } else if let Some(f) = value.as_f64() {
            Score::try_from(f)
        } else {
            Err(CoreError::invalid(format!("score out of range: {value}")))
        }
    }
}

impl From<Score> for u8 {
    fn from(score: Score) -> u8 {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Score {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_lowercase();
        match t.as_str() {
            "again" | "a" => Ok(Score::AGAIN),
            "hard" | "h" => Ok(Score::HARD),
            "good" | "g" => Ok(Score::GOOD),
            "easy" | "e" => Ok(Score::EASY),
            _ => t
                .parse::<i64>()
                .map_err(|_| CoreError::invalid(format!("not a score: {s:?}")))
                .and_then(Score::new),
        }
    }
}

/// Scheduling state attached to every flashcard. Only the scheduler writes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewState {
    pub ease_factor: f64,
    pub repetitions: u32,
    pub current_interval: u32,
    pub next_review_date: NaiveDate,
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

impl ReviewState {
    /// Fresh state for a card created at `now`: due the same (UTC) day.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            ease_factor: EF_DEFAULT,
            repetitions: 0,
            current_interval: 0,
            next_review_date: now.date_naive(),
            last_reviewed_at: None,
        }
    }

    pub fn stage(&self) -> ReviewStage {
        ReviewStage::of(self)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStage {
    New,
    Learning,
    Mature,
}

impl ReviewStage {
    pub fn of(state: &ReviewState) -> Self {
        match state.repetitions {
            0 => ReviewStage::New,
            1 | 2 => ReviewStage::Learning,
            _ => ReviewStage::Mature,
        }
    }
}

impl fmt::Display for ReviewStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReviewStage::New => "new",
            ReviewStage::Learning => "learning",
            ReviewStage::Mature => "mature",
        };
        f.write_str(s)
    }
}

impl FromStr for ReviewStage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "new" => Ok(ReviewStage::New),
            "learning" => Ok(ReviewStage::Learning),
            "mature" => Ok(ReviewStage::Mature),
            _ => Err(CoreError::invalid(format!("not a stage: {s:?}"))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Flashcard {
    pub id: FlashcardId,
    pub owner_id: OwnerId,
    pub discipline: String,
    pub subject: String,
    pub question: String,
    pub answer: String,

    #[serde(flatten)]
    pub review: ReviewState,
    /// Bumped by every committed review; guards against lost updates.
    pub revision: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flashcard {
    pub fn new(owner_id: OwnerId, input: NewFlashcard, now: DateTime<Utc>) -> Result<Self, CoreError> {
        input.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            discipline: input.discipline.trim().to_string(),
            subject: input.subject.trim().to_string(),
            question: input.question.trim().to_string(),
            answer: input.answer.trim().to_string(),
            review: ReviewState::new(now),
            revision: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a content edit. Review fields are left alone.
    pub fn apply_edit(&mut self, edit: FlashcardEdit, now: DateTime<Utc>) -> Result<(), CoreError> {
        edit.validate()?;
        if let Some(d) = edit.discipline {
            self.discipline = d.trim().to_string();
        }
        if let Some(s) = edit.subject {
            self.subject = s.trim().to_string();
        }
        if let Some(q) = edit.question {
            self.question = q.trim().to_string();
        }
        if let Some(a) = edit.answer {
            self.answer = a.trim().to_string();
        }
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewFlashcard {
    pub discipline: String,
    pub subject: String,
    pub question: String,
    pub answer: String,
}

impl NewFlashcard {
    pub fn validate(&self) -> Result<(), CoreError> {
        require_text("discipline", &self.discipline)?;
        require_text("subject", &self.subject)?;
        require_text("question", &self.question)?;
        require_text("answer", &self.answer)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlashcardEdit {
    pub discipline: Option<String>,
    pub subject: Option<String>,
    pub question: Option<String>,
    pub answer: Option<String>,
}

impl FlashcardEdit {
    pub fn is_empty(&self) -> bool {
        self.discipline.is_none()
            && self.subject.is_none()
            && self.question.is_none()
            && self.answer.is_none()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        for (field, value) in [
            ("discipline", &self.discipline),
            ("subject", &self.subject),
            ("question", &self.question),
            ("answer", &self.answer),
        ] {
            if let Some(v) = value {
                require_text(field, v)?;
            }
        }
        Ok(())
    }
}

fn require_text(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        Err(CoreError::invalid(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReviewRecord {
    pub id: ReviewId,
    pub flashcard_id: FlashcardId,
    pub owner_id: OwnerId,
    pub score: Score,
    pub reviewed_at: DateTime<Utc>,
    pub interval_applied: u32,
    pub ease_factor_after: f64,
}

impl ReviewRecord {
    pub fn new(card: &Flashcard, score: Score, next: &ReviewState, reviewed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            flashcard_id: card.id,
            owner_id: card.owner_id,
            score,
            reviewed_at,
            interval_applied: next.current_interval,
            ease_factor_after: next.ease_factor,
        }
    }
}

/// Per-subject study reminder. One row per (owner, discipline, subject); it
/// comes due a fixed number of days after the subject was last studied and
/// is independent of flashcard scheduling.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubjectProgress {
    pub id: SubjectProgressId,
    pub owner_id: OwnerId,
    pub discipline: String,
    pub subject: String,
    pub last_study_date: NaiveDate,
    pub next_review_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubjectProgress {
    pub fn new(
        owner_id: OwnerId,
        discipline: &str,
        subject: &str,
        studied_on: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        require_text("discipline", discipline)?;
        require_text("subject", subject)?;
        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            discipline: discipline.trim().to_string(),
            subject: subject.trim().to_string(),
            last_study_date: studied_on,
            next_review_date: next_subject_review(now)?,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.next_review_date <= today
    }
}

/// Next subject review: `SUBJECT_REVIEW_DAYS` after the UTC date of `now`.
pub fn next_subject_review(now: DateTime<Utc>) -> Result<NaiveDate, CoreError> {
    now.date_naive()
        .checked_add_days(Days::new(SUBJECT_REVIEW_DAYS))
        .ok_or_else(|| CoreError::invalid("subject review date out of range"))
}

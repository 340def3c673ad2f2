use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use studyloop_core::{CoreError, Flashcard, ReviewRecord, ReviewStage, ReviewState, Score};

#[derive(Serialize)]
pub struct CardOut {
    #[serde(flatten)]
    pub card: Flashcard,
    pub stage: ReviewStage,
}

impl From<Flashcard> for CardOut {
    fn from(card: Flashcard) -> Self {
        let stage = card.review.stage();
        Self { card, stage }
    }
}

#[derive(Deserialize)]
pub struct ReviewIn {
    /// Raw JSON so every malformed outcome reaches validation.
    #[serde(default)]
    pub outcome: Value,
}

impl ReviewIn {
    pub fn score(&self) -> Result<Score, CoreError> {
        match &self.outcome {
            Value::Number(n) => Score::try_from(n),
            Value::Null => Err(CoreError::invalid("outcome is required")),
            other => Err(CoreError::invalid(format!(
                "outcome must be an integer score, got {other}"
            ))),
        }
    }
}

#[derive(Serialize)]
pub struct ReviewOut {
    pub success: bool,
    pub message: String,
    pub state: ReviewState,
    pub stage: ReviewStage,
    pub record: ReviewRecord,
}

#[derive(Serialize, Deserialize)]
pub struct MessageOut {
    pub success: bool,
    pub message: String,
}

impl MessageOut {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

#[derive(Deserialize, Default)]
pub struct ListQuery {
    pub discipline: Option<String>,
    pub subject: Option<String>,
    pub q: Option<String>,
    pub stage: Option<ReviewStage>,
}

#[derive(Deserialize)]
pub struct StudyIn {
    pub discipline: String,
    pub subject: String,
    /// Defaults to today.
    #[serde(default)]
    pub studied_on: Option<NaiveDate>,
}

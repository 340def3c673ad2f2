use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use studyloop_core::{
    filters::{filter_by_discipline, filter_by_stage, filter_by_subject, filter_by_text},
    FlashcardEdit, FlashcardId, NewFlashcard, OwnerId, ReviewRecord, ReviewService,
    SubjectProgress, SubjectProgressId,
};

use crate::api::dto::{CardOut, ListQuery, MessageOut, ReviewIn, ReviewOut, StudyIn};
use crate::api::error::ApiError;
use crate::api::extract::{ApiJson, ApiPath, ApiQuery};

#[derive(Clone)]
pub struct AppState {
    pub service: ReviewService,
}

type Shared = State<Arc<AppState>>;

pub async fn list_cards(
    State(st): Shared,
    ApiPath(owner): ApiPath<OwnerId>,
    ApiQuery(q): ApiQuery<ListQuery>,
) -> Result<Json<Vec<CardOut>>, ApiError> {
    let mut cards = st.service.list_cards(owner).await?;
    if let Some(d) = &q.discipline {
        cards = filter_by_discipline(&cards, d);
    }
    if let Some(s) = &q.subject {
        cards = filter_by_subject(&cards, s);
    }
    if let Some(text) = &q.q {
        cards = filter_by_text(&cards, text);
    }
    if let Some(stage) = q.stage {
        cards = filter_by_stage(&cards, stage);
    }
    Ok(Json(cards.into_iter().map(CardOut::from).collect()))
}

pub async fn create_card(
    State(st): Shared,
    ApiPath(owner): ApiPath<OwnerId>,
    ApiJson(body): ApiJson<NewFlashcard>,
) -> Result<(StatusCode, Json<CardOut>), ApiError> {
    let card = st.service.create_card(owner, body).await?;
    Ok((StatusCode::CREATED, Json(card.into())))
}

pub async fn due_cards(
    State(st): Shared,
    ApiPath(owner): ApiPath<OwnerId>,
) -> Result<Json<Vec<CardOut>>, ApiError> {
    let cards = st.service.due_cards(owner).await?;
    Ok(Json(cards.into_iter().map(CardOut::from).collect()))
}

pub async fn get_card(
    State(st): Shared,
    ApiPath((owner, id)): ApiPath<(OwnerId, FlashcardId)>,
) -> Result<Json<CardOut>, ApiError> {
    Ok(Json(st.service.get_card(owner, id).await?.into()))
}

pub async fn update_card(
    State(st): Shared,
    ApiPath((owner, id)): ApiPath<(OwnerId, FlashcardId)>,
    ApiJson(body): ApiJson<FlashcardEdit>,
) -> Result<Json<CardOut>, ApiError> {
    Ok(Json(st.service.update_card(owner, id, body).await?.into()))
}

pub async fn delete_card(
    State(st): Shared,
    ApiPath((owner, id)): ApiPath<(OwnerId, FlashcardId)>,
) -> Result<Json<MessageOut>, ApiError> {
    st.service.delete_card(owner, id).await?;
    Ok(Json(MessageOut::ok("flashcard deleted")))
}

pub async fn post_review(
    State(st): Shared,
    ApiPath((owner, id)): ApiPath<(OwnerId, FlashcardId)>,
    ApiJson(body): ApiJson<ReviewIn>,
) -> Result<Json<ReviewOut>, ApiError> {
    let score = body.score()?;
    let receipt = st.service.review(owner, id, score).await?;
    let state = receipt.flashcard.review;
    Ok(Json(ReviewOut {
        success: true,
        message: format!("next review on {}", state.next_review_date),
        stage: state.stage(),
        state,
        record: receipt.record,
    }))
}

pub async fn list_reviews(
    State(st): Shared,
    ApiPath((owner, id)): ApiPath<(OwnerId, FlashcardId)>,
) -> Result<Json<Vec<ReviewRecord>>, ApiError> {
    Ok(Json(st.service.history(owner, id).await?))
}

pub async fn record_study(
    State(st): Shared,
    ApiPath(owner): ApiPath<OwnerId>,
    ApiJson(body): ApiJson<StudyIn>,
) -> Result<Json<SubjectProgress>, ApiError> {
    let p = st
        .service
        .record_study(owner, &body.discipline, &body.subject, body.studied_on)
        .await?;
    Ok(Json(p))
}

pub async fn subjects_due(
    State(st): Shared,
    ApiPath(owner): ApiPath<OwnerId>,
) -> Result<Json<Vec<SubjectProgress>>, ApiError> {
    Ok(Json(st.service.subjects_due(owner).await?))
}

pub async fn mark_subject_reviewed(
    State(st): Shared,
    ApiPath((owner, id)): ApiPath<(OwnerId, SubjectProgressId)>,
) -> Result<Json<SubjectProgress>, ApiError> {
    Ok(Json(st.service.mark_subject_reviewed(owner, id).await?))
}

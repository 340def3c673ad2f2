use axum::{
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use studyloop_core::ReviewService;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::routes::{
    create_card, delete_card, due_cards, get_card, list_cards, list_reviews,
    mark_subject_reviewed, post_review, record_study, subjects_due, update_card, AppState,
};

pub fn router(service: ReviewService) -> Router {
    let state = Arc::new(AppState { service });

    Router::new()
        .route("/users/:owner/flashcards", get(list_cards).post(create_card))
        .route("/users/:owner/flashcards/due", get(due_cards))
        .route(
            "/users/:owner/flashcards/:id",
            get(get_card).patch(update_card).delete(delete_card),
        )
        .route("/users/:owner/flashcards/:id/review", post(post_review))
        .route("/users/:owner/flashcards/:id/reviews", get(list_reviews))
        .route("/users/:owner/subjects", post(record_study))
        .route("/users/:owner/subjects/due", get(subjects_due))
        .route("/users/:owner/subjects/:id/reviewed", post(mark_subject_reviewed))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(service: ReviewService, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(service);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "api listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

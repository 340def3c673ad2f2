use chrono::{NaiveDate, TimeZone, Utc};
use studyloop_core::{
    compute_next_review_state, CardStore, CoreError, NewFlashcard, ReviewRecord, Score,
    SubjectProgress,
};
use studyloop_json::JsonStore;
use uuid::Uuid;

fn input() -> NewFlashcard {
    NewFlashcard {
        discipline: "Português".into(),
        subject: "Crase".into(),
        question: "Crase antes de verbo?".into(),
        answer: "Nunca".into(),
    }
}

#[tokio::test]
async fn review_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("store.json");
    let backups = dir.path().join("backups");
    let owner = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();

    let (card_id, next) = {
        let store = JsonStore::open_with(file.clone(), backups.clone(), 3).await.unwrap();
        let card = store.create_card(owner, input(), now).await.unwrap();
        let next = compute_next_review_state(&card.review, Score::EASY, now).unwrap();
        let record = ReviewRecord::new(&card, Score::EASY, &next, now);
        let updated = store
            .commit_review(owner, card.id, 0, &next, &record)
            .await
            .unwrap();
        assert_eq!(updated.revision, 1);
        (card.id, next)
    };

    let store = JsonStore::open_with(file, backups.clone(), 3).await.unwrap();
    let card = store.get_card(owner, card_id).await.unwrap();
    assert_eq!(card.review, next);
    assert_eq!(card.revision, 1);
    assert_eq!(store.list_reviews(owner, card_id).await.unwrap().len(), 1);

    let kept = std::fs::read_dir(&backups).unwrap().count();
    assert!(kept >= 1 && kept <= 3);
}

#[tokio::test]
async fn stale_commit_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStore::open_with(dir.path().join("s.json"), dir.path().join("b"), 2)
        .await
        .unwrap();
    let owner = Uuid::new_v4();
    let now = Utc::now();
    let card = store.create_card(owner, input(), now).await.unwrap();
    let next = compute_next_review_state(&card.review, Score::GOOD, now).unwrap();

    store
        .commit_review(owner, card.id, 0, &next, &ReviewRecord::new(&card, Score::GOOD, &next, now))
        .await
        .unwrap();
    let err = store
        .commit_review(owner, card.id, 0, &next, &ReviewRecord::new(&card, Score::GOOD, &next, now))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    assert_eq!(store.list_reviews(owner, card.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn due_listing_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStore::open_with(dir.path().join("s.json"), dir.path().join("b"), 2)
        .await
        .unwrap();
    let owner = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    let card = store.create_card(owner, input(), now).await.unwrap();

    let today = now.date_naive();
    assert_eq!(store.list_due(owner, today).await.unwrap().len(), 1);
    assert!(store.list_due(Uuid::new_v4(), today).await.unwrap().is_empty());

    store.delete_card(owner, card.id).await.unwrap();
    assert!(store.list_due(owner, today).await.unwrap().is_empty());
    assert!(matches!(
        store.delete_card(owner, card.id).await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn subject_progress_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("store.json");
    let backups = dir.path().join("backups");
    let owner = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let studied = NaiveDate::from_ymd_opt(2024, 4, 30).unwrap();

    let id = {
        let store = JsonStore::open_with(file.clone(), backups.clone(), 3).await.unwrap();
        let first = SubjectProgress::new(owner, "Português", "Crase", studied, now).unwrap();
        let stored = store.upsert_subject_progress(first).await.unwrap();
        let again = SubjectProgress::new(owner, "Português", "Crase", now.date_naive(), now).unwrap();
        let merged = store.upsert_subject_progress(again).await.unwrap();
        assert_eq!(merged.id, stored.id);
        stored.id
    };

    let store = JsonStore::open_with(file, backups, 3).await.unwrap();
    let week = NaiveDate::from_ymd_opt(2024, 5, 8).unwrap();
    assert!(store.list_subjects_due(owner, week.pred_opt().unwrap()).await.unwrap().is_empty());
    let due = store.list_subjects_due(owner, week).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, id);
    assert_eq!(due[0].last_study_date, now.date_naive());
}

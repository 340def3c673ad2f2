use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use studyloop_core::{
    compute_next_review_state, CardStore, CoreError, FixedClock, FlashcardEdit, NewFlashcard,
    ReviewRecord, ReviewService, Score, SubjectProgress,
};
use studyloop_sqlite::SqliteStore;
use uuid::Uuid;

fn input(q: &str) -> NewFlashcard {
    NewFlashcard {
        discipline: "Raciocínio Lógico".into(),
        subject: "Proposições".into(),
        question: q.into(),
        answer: "V".into(),
    }
}

#[tokio::test]
async fn review_cycle_round_trips() {
    let store = Arc::new(SqliteStore::open_memory().await.unwrap());
    let owner = Uuid::new_v4();
    let day1 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
    let svc = ReviewService::new(store.clone(), Arc::new(FixedClock(day1)));

    let card = svc.create_card(owner, input("p ou ~p?")).await.unwrap();
    let first = svc.review(owner, card.id, Score::EASY).await.unwrap().flashcard;
    assert_eq!(first.review.repetitions, 1);
    assert_eq!(first.revision, 1);

    let day2 = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
    let svc = ReviewService::new(store.clone(), Arc::new(FixedClock(day2)));
    let second = svc.review(owner, card.id, Score::EASY).await.unwrap().flashcard;
    assert_eq!(second.review.repetitions, 2);
    assert_eq!(second.review.current_interval, 6);
    assert_eq!(
        second.review.next_review_date,
        NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
    );
    assert_eq!(second.review.last_reviewed_at, Some(day2));

    let stored = store.get_card(owner, card.id).await.unwrap();
    assert_eq!(stored, second);

    let log = store.list_reviews(owner, card.id).await.unwrap();
    assert_eq!(log.len(), 2);
    assert!(log[0].reviewed_at < log[1].reviewed_at);
}

#[tokio::test]
async fn conflict_and_missing_are_distinct() {
    let store = SqliteStore::open_memory().await.unwrap();
    let owner = Uuid::new_v4();
    let now = Utc::now();
    let card = store.create_card(owner, input("q"), now).await.unwrap();
    let next = compute_next_review_state(&card.review, Score::GOOD, now).unwrap();

    store
        .commit_review(owner, card.id, 0, &next, &ReviewRecord::new(&card, Score::GOOD, &next, now))
        .await
        .unwrap();
    let stale = store
        .commit_review(owner, card.id, 0, &next, &ReviewRecord::new(&card, Score::GOOD, &next, now))
        .await
        .unwrap_err();
    assert!(matches!(stale, CoreError::Conflict(_)));

    let missing = store
        .commit_review(Uuid::new_v4(), card.id, 1, &next, &ReviewRecord::new(&card, Score::GOOD, &next, now))
        .await
        .unwrap_err();
    assert!(matches!(missing, CoreError::NotFound(_)));
    assert_eq!(store.list_reviews(owner, card.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn due_filter_uses_calendar_date() {
    let store = SqliteStore::open_memory().await.unwrap();
    let owner = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 0).unwrap();
    let a = store.create_card(owner, input("a"), now).await.unwrap();
    let b = store.create_card(owner, input("b"), now).await.unwrap();

    let next = compute_next_review_state(&a.review, Score::GOOD, now).unwrap();
    store
        .commit_review(owner, a.id, 0, &next, &ReviewRecord::new(&a, Score::GOOD, &next, now))
        .await
        .unwrap();

    let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let due = store.list_due(owner, today).await.unwrap();
    assert_eq!(due.iter().map(|c| c.id).collect::<Vec<_>>(), vec![b.id]);

    let tomorrow = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
    let due = store.list_due(owner, tomorrow).await.unwrap();
    assert_eq!(due.iter().map(|c| c.id).collect::<Vec<_>>(), vec![b.id, a.id]);
}

#[tokio::test]
async fn edit_and_delete() {
    let store = SqliteStore::open_memory().await.unwrap();
    let owner = Uuid::new_v4();
    let now = Utc::now();
    let card = store.create_card(owner, input("old"), now).await.unwrap();

    let edit = FlashcardEdit {
        answer: Some("F".into()),
        ..Default::default()
    };
    let edited = store.update_card(owner, card.id, edit, now).await.unwrap();
    assert_eq!(edited.answer, "F");
    assert_eq!(edited.review, card.review);

    store.delete_card(owner, card.id).await.unwrap();
    assert!(matches!(store.get_card(owner, card.id).await, Err(CoreError::NotFound(_))));
}

#[tokio::test]
async fn created_card_matches_stored_row() {
    let store = SqliteStore::open_memory().await.unwrap();
    let owner = Uuid::new_v4();
    let now = Utc.timestamp_opt(1_700_000_000, 295_398_370).unwrap();

    let created = store.create_card(owner, input("q"), now).await.unwrap();
    let stored = store.get_card(owner, created.id).await.unwrap();
    assert_eq!(created, stored);
    assert_eq!(created.created_at.timestamp_subsec_nanos(), 295_398_000);
}

#[tokio::test]
async fn subject_progress_upsert_and_review() {
    let store = SqliteStore::open_memory().await.unwrap();
    let owner = Uuid::new_v4();
    let day1 = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();

    let first = SubjectProgress::new(owner, "Raciocínio Lógico", "Proposições", day1.date_naive(), day1)
        .unwrap();
    let stored = store.upsert_subject_progress(first).await.unwrap();
    assert_eq!(stored.next_review_date, NaiveDate::from_ymd_opt(2024, 6, 8).unwrap());

    let day3 = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
    let again = SubjectProgress::new(owner, "Raciocínio Lógico", "Proposições", day3.date_naive(), day3)
        .unwrap();
    let merged = store.upsert_subject_progress(again).await.unwrap();
    assert_eq!(merged.id, stored.id);
    assert_eq!(merged.last_study_date, day3.date_naive());
    assert_eq!(merged.next_review_date, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());

    let other = SubjectProgress::new(owner, "Raciocínio Lógico", "Conjuntos", day1.date_naive(), day1)
        .unwrap();
    let other = store.upsert_subject_progress(other).await.unwrap();

    let june10 = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
    let due = store.list_subjects_due(owner, june10).await.unwrap();
    assert_eq!(due.iter().map(|p| p.id).collect::<Vec<_>>(), vec![other.id, stored.id]);
    assert!(store.list_subjects_due(Uuid::new_v4(), june10).await.unwrap().is_empty());

    let next = NaiveDate::from_ymd_opt(2024, 6, 17).unwrap();
    let done = store
        .mark_subject_reviewed(owner, other.id, june10, next, day3)
        .await
        .unwrap();
    assert_eq!(done.last_study_date, june10);
    assert_eq!(done.next_review_date, next);

    let missing = store
        .mark_subject_reviewed(Uuid::new_v4(), other.id, june10, next, day3)
        .await
        .unwrap_err();
    assert!(matches!(missing, CoreError::NotFound(_)));
}

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use studyloop_core::{
    compute_next_review_state, filter_by_discipline, filter_by_stage, filter_by_text, filter_due,
    memory::MemoryStore, CardStore, CoreError, FixedClock, FlashcardEdit, NewFlashcard,
    ReviewRecord, ReviewService, ReviewStage, Score,
};
use uuid::Uuid;

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn card_input(q: &str) -> NewFlashcard {
    NewFlashcard {
        discipline: "Direito Constitucional".into(),
        subject: "Direitos fundamentais".into(),
        question: q.into(),
        answer: "art. 5".into(),
    }
}

fn service_at(store: Arc<MemoryStore>, now: DateTime<Utc>) -> ReviewService {
    ReviewService::new(store, Arc::new(FixedClock(now)))
}

#[tokio::test]
async fn review_persists_next_state_and_log() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let svc = service_at(store.clone(), at(2024, 1, 1));

    let card = svc.create_card(owner, card_input("habeas corpus?")).await.unwrap();
    assert_eq!(card.revision, 0);

    let receipt = svc.review(owner, card.id, Score::EASY).await.unwrap();
    assert_eq!(receipt.previous, card.review);
    assert_eq!(receipt.flashcard.review.repetitions, 1);
    assert_eq!(receipt.flashcard.review.current_interval, 1);
    assert_eq!(
        receipt.flashcard.review.next_review_date,
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    );
    assert_eq!(receipt.flashcard.revision, 1);

    let stored = store.get_card(owner, card.id).await.unwrap();
    assert_eq!(stored.review, receipt.flashcard.review);

    let log = svc.history(owner, card.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].score, Score::EASY);
    assert_eq!(log[0].interval_applied, 1);
}

#[tokio::test]
async fn stale_revision_is_a_conflict() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let now = at(2024, 1, 1);
    let card = store.create_card(owner, card_input("q"), now).await.unwrap();

    // Two callers read the same state.
    let next = compute_next_review_state(&card.review, Score::GOOD, now).unwrap();
    let first = ReviewRecord::new(&card, Score::GOOD, &next, now);
    let second = ReviewRecord::new(&card, Score::GOOD, &next, now);

    store
        .commit_review(owner, card.id, card.revision, &next, &first)
        .await
        .unwrap();
    let err = store
        .commit_review(owner, card.id, card.revision, &next, &second)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    let log = store.list_reviews(owner, card.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id, first.id);
}

#[tokio::test]
async fn other_owner_sees_nothing() {
    let store = Arc::new(MemoryStore::new());
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let svc = service_at(store, at(2024, 1, 1));
    let card = svc.create_card(alice, card_input("q")).await.unwrap();

    assert!(matches!(svc.get_card(bob, card.id).await, Err(CoreError::NotFound(_))));
    assert!(matches!(svc.review(bob, card.id, Score::GOOD).await, Err(CoreError::NotFound(_))));
    assert!(matches!(svc.delete_card(bob, card.id).await, Err(CoreError::NotFound(_))));
    assert!(svc.list_cards(bob).await.unwrap().is_empty());
    assert_eq!(svc.list_cards(alice).await.unwrap().len(), 1);
}

#[tokio::test]
async fn due_cards_respect_clock() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let day1 = service_at(store.clone(), at(2024, 1, 1));

    let a = day1.create_card(owner, card_input("a")).await.unwrap();
    let b = day1.create_card(owner, card_input("b")).await.unwrap();
    assert_eq!(day1.due_cards(owner).await.unwrap().len(), 2);

    day1.review(owner, a.id, Score::GOOD).await.unwrap();
    let due = day1.due_cards(owner).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, b.id);

    let day2 = service_at(store, at(2024, 1, 2));
    let due = day2.due_cards(owner).await.unwrap();
    assert_eq!(due.len(), 2);
    // b has been due since day 1, so it comes first.
    assert_eq!(due[0].id, b.id);
    assert_eq!(due[1].id, a.id);
}

#[tokio::test]
async fn edits_leave_review_state_alone() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let svc = service_at(store, at(2024, 1, 1));
    let card = svc.create_card(owner, card_input("old")).await.unwrap();
    let reviewed = svc.review(owner, card.id, Score::EASY).await.unwrap().flashcard;

    let edit = FlashcardEdit {
        question: Some("new question".into()),
        ..Default::default()
    };
    let edited = svc.update_card(owner, card.id, edit).await.unwrap();
    assert_eq!(edited.question, "new question");
    assert_eq!(edited.review, reviewed.review);
    assert_eq!(edited.revision, reviewed.revision);

    let blank = FlashcardEdit {
        answer: Some("   ".into()),
        ..Default::default()
    };
    assert!(matches!(
        svc.update_card(owner, card.id, blank).await,
        Err(CoreError::InvalidArgument(_))
    ));
    assert!(matches!(
        svc.update_card(owner, card.id, FlashcardEdit::default()).await,
        Err(CoreError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn delete_drops_history() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let svc = service_at(store.clone(), at(2024, 1, 1));
    let card = svc.create_card(owner, card_input("q")).await.unwrap();
    svc.review(owner, card.id, Score::AGAIN).await.unwrap();

    svc.delete_card(owner, card.id).await.unwrap();
    assert!(matches!(store.get_card(owner, card.id).await, Err(CoreError::NotFound(_))));
    assert!(matches!(svc.history(owner, card.id).await, Err(CoreError::NotFound(_))));
}

#[tokio::test]
async fn blank_fields_rejected_on_create() {
    let svc = service_at(Arc::new(MemoryStore::new()), at(2024, 1, 1));
    let mut input = card_input("q");
    input.subject = " ".into();
    assert!(matches!(
        svc.create_card(Uuid::new_v4(), input).await,
        Err(CoreError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn filters_over_listing() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let svc = service_at(store, at(2024, 1, 1));
    svc.create_card(owner, card_input("Quem julga ADI?")).await.unwrap();
    let mut other = card_input("Prazo prescricional?");
    other.discipline = "Direito Penal".into();
    svc.create_card(owner, other).await.unwrap();

    let all = svc.list_cards(owner).await.unwrap();
    assert_eq!(filter_by_discipline(&all, "direito penal").len(), 1);
    assert_eq!(filter_by_text(&all, "adi").len(), 1);
    assert_eq!(filter_by_text(&all, "").len(), 2);
}

#[tokio::test]
async fn stage_and_due_filters() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let svc = service_at(store, at(2024, 1, 1));
    let reviewed = svc.create_card(owner, card_input("a")).await.unwrap();
    svc.create_card(owner, card_input("b")).await.unwrap();
    svc.review(owner, reviewed.id, Score::GOOD).await.unwrap();

    let all = svc.list_cards(owner).await.unwrap();
    let learning = filter_by_stage(&all, ReviewStage::Learning);
    assert_eq!(learning.len(), 1);
    assert_eq!(learning[0].id, reviewed.id);
    assert_eq!(filter_by_stage(&all, ReviewStage::New).len(), 1);
    assert!(filter_by_stage(&all, ReviewStage::Mature).is_empty());

    assert_eq!(filter_due(&all, date(2024, 1, 1)).len(), 1);
    assert_eq!(filter_due(&all, date(2024, 1, 2)).len(), 2);
    assert_eq!("Learning".parse::<ReviewStage>().unwrap(), ReviewStage::Learning);
    assert!("done".parse::<ReviewStage>().is_err());
}

#[tokio::test]
async fn subject_reviews_come_due_after_a_week() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let svc = service_at(store.clone(), at(2024, 3, 1));

    let studied = svc
        .record_study(owner, " Direito Penal ", "Dosimetria", Some(date(2024, 2, 28)))
        .await
        .unwrap();
    assert_eq!(studied.discipline, "Direito Penal");
    assert_eq!(studied.last_study_date, date(2024, 2, 28));
    assert_eq!(studied.next_review_date, date(2024, 3, 8));
    assert!(svc.subjects_due(owner).await.unwrap().is_empty());

    let later = service_at(store.clone(), at(2024, 3, 8));
    let due = later.subjects_due(owner).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, studied.id);

    let done = later.mark_subject_reviewed(owner, studied.id).await.unwrap();
    assert_eq!(done.last_study_date, date(2024, 3, 8));
    assert_eq!(done.next_review_date, date(2024, 3, 15));
    assert!(later.subjects_due(owner).await.unwrap().is_empty());

    assert!(matches!(
        later.mark_subject_reviewed(Uuid::new_v4(), studied.id).await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn studying_again_reuses_the_subject_row() {
    let store = Arc::new(MemoryStore::new());
    let owner = Uuid::new_v4();
    let svc = service_at(store.clone(), at(2024, 3, 1));
    let first = svc.record_study(owner, "Português", "Crase", None).await.unwrap();
    assert_eq!(first.last_study_date, date(2024, 3, 1));

    let svc = service_at(store.clone(), at(2024, 3, 4));
    let second = svc.record_study(owner, "Português", "Crase", None).await.unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.next_review_date, date(2024, 3, 11));

    svc.record_study(owner, "Português", "Regência", None).await.unwrap();
    let due = service_at(store, at(2024, 3, 20)).subjects_due(owner).await.unwrap();
    assert_eq!(
        due.iter().map(|p| p.subject.as_str()).collect::<Vec<_>>(),
        vec!["Crase", "Regência"]
    );

    assert!(matches!(
        svc.record_study(owner, "Português", "  ", None).await,
        Err(CoreError::InvalidArgument(_))
    ));
}

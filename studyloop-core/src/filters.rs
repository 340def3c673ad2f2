use crate::{is_due, Flashcard, ReviewStage, SubjectProgress};
use chrono::NaiveDate;

pub fn filter_by_text(cards: &[Flashcard], query: &str) -> Vec<Flashcard> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return cards.to_vec();
    }
    cards
        .iter()
        .filter(|c| {
            c.question.to_lowercase().contains(&q)
                || c.answer.to_lowercase().contains(&q)
                || c.subject.to_lowercase().contains(&q)
        })
        .cloned()
        .collect()
}

pub fn filter_by_discipline(cards: &[Flashcard], discipline: &str) -> Vec<Flashcard> {
    let q = discipline.trim();
    cards
        .iter()
        .filter(|c| c.discipline.eq_ignore_ascii_case(q))
        .cloned()
        .collect()
}

pub fn filter_by_subject(cards: &[Flashcard], subject: &str) -> Vec<Flashcard> {
    let q = subject.trim();
    cards
        .iter()
        .filter(|c| c.subject.eq_ignore_ascii_case(q))
        .cloned()
        .collect()
}

pub fn filter_due(cards: &[Flashcard], today: NaiveDate) -> Vec<Flashcard> {
    cards
        .iter()
        .filter(|c| is_due(&c.review, today))
        .cloned()
        .collect()
}

pub fn filter_by_stage(cards: &[Flashcard], want: ReviewStage) -> Vec<Flashcard> {
    cards
        .iter()
        .filter(|c| c.review.stage() == want)
        .cloned()
        .collect()
}

/// Review order: earliest due date first, older cards break ties.
pub fn sort_for_review(cards: &mut [Flashcard]) {
    cards.sort_by_key(|c| (c.review.next_review_date, c.created_at));
}

pub fn sort_subjects_for_review(subjects: &mut [SubjectProgress]) {
    subjects.sort_by(|a, b| {
        (a.next_review_date, &a.discipline, &a.subject).cmp(&(b.next_review_date, &b.discipline, &b.subject))
    });
}

use crate::api::server as api_server;
use crate::cli::opts::*;

use anyhow::{anyhow, bail, Context, Result};
use std::io::{stdin, stdout, Write};
use std::sync::Arc;
use studyloop_core::{
    filters::{filter_by_discipline, filter_by_stage, filter_by_subject, filter_by_text},
    memory::MemoryStore,
    CardStore, CoreError, Flashcard, FlashcardEdit, NewFlashcard, OwnerId, ReviewService, Score,
    SubjectProgress, SystemClock,
};
use studyloop_json::paths::data_root;
use studyloop_json::JsonStore;
use studyloop_pg::PostgresStore;
use studyloop_sqlite::SqliteStore;
use tracing::info;
use uuid::Uuid;

pub async fn run_cli(args: Cli) -> Result<()> {
    let store = open_store(&args).await?;
    let service = ReviewService::new(store, Arc::new(SystemClock));
    let owner = args.owner;

    match args.cmd {
        Command::Api(api) => {
            let addr: std::net::SocketAddr = api.addr.parse()?;
            api_server::run(service, addr).await
        }
        Command::Card(cmd) => card_cmd(&service, owner, cmd).await,
        Command::Due => due_cmd(&service, owner).await,
        Command::Grade(cmd) => grade_cmd(&service, owner, cmd).await,
        Command::Review(cmd) => review_cmd(&service, owner, cmd).await,
        Command::Subject(cmd) => subject_cmd(&service, owner, cmd).await,
    }
}

pub async fn open_store(args: &Cli) -> Result<Arc<dyn CardStore>> {
    match args.store {
        StoreKind::Json => {
            let s = JsonStore::open_default().await?;
            Ok(Arc::new(s))
        }
        StoreKind::Sqlite => {
            let p = args
                .db_path
                .clone()
                .unwrap_or_else(|| data_root().join("studyloop.sqlite3"));
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let s = SqliteStore::open_file(&p).await?;
            Ok(Arc::new(s))
        }
        StoreKind::Pg => {
            let url = args
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow!("--database-url (or STUDYLOOP_DATABASE_URL) is required for --store pg"))?;
            let s = PostgresStore::connect(url).await?;
            Ok(Arc::new(s))
        }
        StoreKind::Memory => {
            info!("using volatile in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn card_cmd(service: &ReviewService, owner: OwnerId, cmd: CardCmd) -> Result<()> {
    match cmd {
        CardCmd::Add(a) => {
            let input = NewFlashcard {
                discipline: a.discipline,
                subject: a.subject,
                question: a.question,
                answer: a.answer,
            };
            let c = service.create_card(owner, input).await?;
            println!("{}", c.id);
        }
        CardCmd::List(l) => {
            let mut cards = service.list_cards(owner).await?;
            if let Some(d) = &l.discipline {
                cards = filter_by_discipline(&cards, d);
            }
            if let Some(s) = &l.subject {
                cards = filter_by_subject(&cards, s);
            }
            if let Some(q) = &l.search {
                cards = filter_by_text(&cards, q);
            }
            if let Some(stage) = l.stage {
                cards = filter_by_stage(&cards, stage);
            }
            for c in &cards {
                print_row(c);
            }
        }
        CardCmd::Show { card_id } => {
            let id = parse_uuid(&card_id)?;
            let c = service.get_card(owner, id).await?;
            println!("id:          {}", c.id);
            println!("discipline:  {}", c.discipline);
            println!("subject:     {}", c.subject);
            println!("question:    {}", c.question);
            println!("answer:      {}", c.answer);
            println!("stage:       {}", c.review.stage());
            println!("ease factor: {:.2}", c.review.ease_factor);
            println!("repetitions: {}", c.review.repetitions);
            println!("interval:    {} day(s)", c.review.current_interval);
            println!("next review: {}", c.review.next_review_date);
            match c.review.last_reviewed_at {
                Some(t) => println!("last review: {}", t.to_rfc3339()),
                None => println!("last review: never"),
            }
            let history = service.history(owner, id).await?;
            if !history.is_empty() {
                println!("history:");
                for r in history {
                    println!(
                        "  {}\tscore={}\tinterval={}\tease={:.2}",
                        r.reviewed_at.to_rfc3339(),
                        r.score,
                        r.interval_applied,
                        r.ease_factor_after
                    );
                }
            }
        }
        CardCmd::Edit(e) => {
            let id = parse_uuid(&e.card_id)?;
            let edit = FlashcardEdit {
                discipline: e.discipline,
                subject: e.subject,
                question: e.question,
                answer: e.answer,
            };
            service.update_card(owner, id, edit).await?;
            println!("ok");
        }
        CardCmd::Rm { card_id } => {
            let id = parse_uuid(&card_id)?;
            service.delete_card(owner, id).await?;
            println!("ok");
        }
    }
    Ok(())
}

async fn due_cmd(service: &ReviewService, owner: OwnerId) -> Result<()> {
    let cards = service.due_cards(owner).await?;
    if cards.is_empty() {
        println!("no cards due");
    }
    for c in &cards {
        print_row(c);
    }
    Ok(())
}

async fn grade_cmd(service: &ReviewService, owner: OwnerId, cmd: GradeCmd) -> Result<()> {
    let id = parse_uuid(&cmd.card_id)?;
    let score: Score = cmd.score.parse()?;
    let receipt = service.review(owner, id, score).await?;
    let r = &receipt.flashcard.review;
    println!(
        "next review {} (in {} day(s), ease {:.2}, {})",
        r.next_review_date,
        r.current_interval,
        r.ease_factor,
        r.stage()
    );
    Ok(())
}

async fn review_cmd(service: &ReviewService, owner: OwnerId, cmd: ReviewCmd) -> Result<()> {
    let mut pool = service.due_cards(owner).await?;
    if let Some(d) = &cmd.discipline {
        pool = filter_by_discipline(&pool, d);
    }
    if pool.is_empty() {
        println!("no cards due");
        return Ok(());
    }

    let total = pool.len().min(cmd.max);
    let mut count = 0usize;
    for card in pool.into_iter().take(cmd.max) {
        count += 1;
        println!("\n[{}/{}] {} - {}", count, total, card.discipline, card.subject);
        println!("Q: {}", card.question);
        prompt_enter("[enter=show]")?;
        println!("A: {}", card.answer);
        println!("[0-5 or again/hard/good/easy, s=skip, q=quit]");
        let score = loop {
            let line = read_line("score> ")?;
            match line.trim().to_lowercase().as_str() {
                "s" | "skip" => break None,
                "q" | "quit" => return Ok(()),
                other => match other.parse::<Score>() {
                    Ok(s) => break Some(s),
                    Err(_) => println!("enter 0-5, again/hard/good/easy, s, or q"),
                },
            }
        };

        if let Some(score) = score {
            match service.review(owner, card.id, score).await {
                Ok(receipt) => println!(
                    "→ next review {} ({} day(s))",
                    receipt.flashcard.review.next_review_date,
                    receipt.flashcard.review.current_interval
                ),
                Err(CoreError::Conflict(_)) => println!("card changed elsewhere, skipped"),
                Err(e) => return Err(e.into()),
            }
        }
    }

    println!("\nreviewed {}", count);
    Ok(())
}

async fn subject_cmd(service: &ReviewService, owner: OwnerId, cmd: SubjectCmd) -> Result<()> {
    match cmd {
        SubjectCmd::Study(s) => {
            let p = service
                .record_study(owner, &s.discipline, &s.subject, s.on)
                .await?;
            println!("{}\tnext review {}", p.id, p.next_review_date);
        }
        SubjectCmd::Due => {
            let due = service.subjects_due(owner).await?;
            if due.is_empty() {
                println!("no subjects due");
            }
            for p in &due {
                print_subject(p);
            }
        }
        SubjectCmd::Done { progress_id } => {
            let id = parse_uuid(&progress_id)?;
            let p = service.mark_subject_reviewed(owner, id).await?;
            println!("next review {}", p.next_review_date);
        }
    }
    Ok(())
}

// ===== Helpers =====
fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s.trim()).map_err(|_| anyhow!("invalid id: {s}"))
}

fn print_row(c: &Flashcard) {
    println!(
        "{}\t{}\t{}\t{}\tdue={}\tstage={}",
        c.id,
        c.discipline,
        c.subject,
        c.question,
        c.review.next_review_date,
        c.review.stage()
    );
}

fn print_subject(p: &SubjectProgress) {
    println!(
        "{}\t{}\t{}\tlast={}\tdue={}",
        p.id, p.discipline, p.subject, p.last_study_date, p.next_review_date
    );
}

fn prompt_enter(label: &str) -> Result<()> {
    read_line(label).map(|_| ())
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    stdout().flush().ok();
    let mut s = String::new();
    if stdin().read_line(&mut s)? == 0 {
        bail!("stdin closed");
    }
    Ok(s)
}

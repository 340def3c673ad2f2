use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use studyloop_core::ReviewStage;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StoreKind {
    Json,
    Sqlite,
    Pg,
    /// Volatile; only useful for `api` demos
    Memory,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Parser, Clone)]
#[command(name = "studyloop", version, about = "Flashcards with spaced-repetition review (CLI/API)")]
pub struct Cli {
    /// Card store backend
    #[arg(long, value_enum, env = "STUDYLOOP_STORE", default_value_t = StoreKind::Json)]
    pub store: StoreKind,

    /// SQLite DB path when --store sqlite (defaults to app data dir)
    #[arg(long, env = "STUDYLOOP_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Postgres connection string when --store pg
    #[arg(long, env = "STUDYLOOP_DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Owner id the CLI acts as
    #[arg(long, env = "STUDYLOOP_OWNER", default_value_t = Uuid::nil())]
    pub owner: Uuid,

    /// Log output format (logs go to stderr)
    #[arg(long, value_enum, env = "STUDYLOOP_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Flashcard operations
    #[command(subcommand)]
    Card(CardCmd),
    /// List cards due today
    Due,
    /// Record one review outcome for a card
    Grade(GradeCmd),
    /// Interactive review loop over due cards
    Review(ReviewCmd),
    /// Weekly per-subject review reminders
    #[command(subcommand)]
    Subject(SubjectCmd),
    /// Launch the HTTP API
    Api(ApiCmd),
}

#[derive(Debug, Subcommand, Clone)]
pub enum CardCmd {
    Add(CardAdd),
    List(CardList),
    Show { card_id: String },
    Edit(CardEdit),
    Rm { card_id: String },
}

#[derive(Debug, Args, Clone)]
pub struct CardAdd {
    #[arg(long)]
    pub discipline: String,
    #[arg(long)]
    pub subject: String,
    #[arg(long)]
    pub question: String,
    #[arg(long)]
    pub answer: String,
}

#[derive(Debug, Args, Clone)]
pub struct CardList {
    #[arg(long)]
    pub discipline: Option<String>,
    #[arg(long)]
    pub subject: Option<String>,
    /// Substring match on question, answer and subject
    #[arg(long)]
    pub search: Option<String>,
    /// new, learning or mature
    #[arg(long)]
    pub stage: Option<ReviewStage>,
}

#[derive(Debug, Args, Clone)]
pub struct CardEdit {
    pub card_id: String,
    #[arg(long)]
    pub discipline: Option<String>,
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long)]
    pub question: Option<String>,
    #[arg(long)]
    pub answer: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct GradeCmd {
    pub card_id: String,
    /// 0-5, or again/hard/good/easy
    pub score: String,
}

#[derive(Debug, Args, Clone)]
pub struct ReviewCmd {
    #[arg(long)]
    pub discipline: Option<String>,
    #[arg(long, default_value_t = 50)]
    pub max: usize,
}

#[derive(Debug, Subcommand, Clone)]
pub enum SubjectCmd {
    /// Record that a subject was studied
    Study(SubjectStudy),
    /// Subjects due for review today
    Due,
    /// Mark a subject reviewed; it comes back in a week
    Done { progress_id: String },
}

#[derive(Debug, Args, Clone)]
pub struct SubjectStudy {
    #[arg(long)]
    pub discipline: String,
    #[arg(long)]
    pub subject: String,
    /// Study date (YYYY-MM-DD), today when omitted
    #[arg(long)]
    pub on: Option<NaiveDate>,
}

#[derive(Debug, Args, Clone)]
pub struct ApiCmd {
    /// Bind address (host:port)
    #[arg(long, env = "STUDYLOOP_API_ADDR", default_value = "127.0.0.1:8080")]
    pub addr: String,
}

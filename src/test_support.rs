use std::sync::{Arc, OnceLock};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use sqlx::types::Json;
use sqlx::PgPool;
use time::macros::datetime;
use time::{Duration, PrimitiveDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::api::guards::{Role, USER_ID_HEADER, USER_ROLE_HEADER};
use crate::core::clock::{Clock, ManualClock};
use crate::core::config::{AnalyticsSettings, Settings};
use crate::core::{redis::RedisHandle, state::AppState};
use crate::db::models::{AnswerSheet, Attempt, PaperSnapshot, Question, TestSession};
use crate::db::types::{AttemptStatus, DifficultyLevel, QuestionKind, SessionStatus};
use crate::repositories::memory::MemoryStore;
use crate::repositories::postgres::PgStore;
use crate::repositories::EngineStore;
use crate::services::scoring::score_attempt;
use crate::services::sessions::{self, NewSession};

pub(crate) const TEACHER: &str = "teacher-1";
pub(crate) const STUDENT: &str = "student-1";
pub(crate) const STUDENT_2: &str = "student-2";
pub(crate) const STUDENT_3: &str = "student-3";
pub(crate) const CLASSROOM: &str = "class-1";

const CLOCK_START: PrimitiveDateTime = datetime!(2025-03-03 09:00:00);
const TEST_DATABASE_ENV: &str = "EXAMCORE_TEST_DATABASE_URL";

pub(crate) struct EngineContext {
    pub(crate) state: AppState,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) app: Router,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("EXAMCORE_ENV", "test");
    std::env::set_var("EXAMCORE_STRICT_CONFIG", "0");
    std::env::set_var("STORE_BACKEND", "memory");
    std::env::set_var("REDIS_HOST", "127.0.0.1");
    std::env::set_var("REDIS_PORT", "6379");
    std::env::set_var("REDIS_DB", "1");
    std::env::remove_var("REDIS_PASSWORD");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::remove_var("MAX_SESSION_DURATION_MINUTES");
    std::env::remove_var("LIVE_STATUS_RECENT_LIMIT");
    std::env::remove_var("MISTAKE_EXAMPLES_PER_CHAPTER");
}

/// Engine over the in-memory store, a manual clock and a Redis handle that never connects.
pub(crate) async fn setup_engine() -> EngineContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    build_context(settings, Arc::new(MemoryStore::new()), guard)
}

/// Same as [`setup_engine`] but over Postgres. `None` when no test database is configured.
pub(crate) async fn setup_pg_engine() -> Option<EngineContext> {
    let url = std::env::var(TEST_DATABASE_ENV).ok().filter(|url| !url.trim().is_empty())?;

    let guard = env_lock().await;
    set_test_env();
    std::env::set_var("STORE_BACKEND", "postgres");
    std::env::set_var("DATABASE_URL", &url);

    let settings = Settings::load().expect("settings");
    let pool = prepare_db(&settings).await;
    Some(build_context(settings, Arc::new(PgStore::new(pool)), guard))
}

fn build_context(
    settings: Settings,
    store: Arc<dyn EngineStore>,
    guard: OwnedMutexGuard<()>,
) -> EngineContext {
    let clock = Arc::new(ManualClock::new(CLOCK_START));
    let redis = RedisHandle::new(settings.redis().redis_url());
    let state = AppState::new(settings, store, redis, clock.clone());
    let app = api::router::router(state.clone());

    EngineContext { state, clock, app, _guard: guard }
}

async fn prepare_db(settings: &Settings) -> PgPool {
    let db = crate::db::init_pool(settings).await.expect("db pool");
    sqlx::query("DROP SCHEMA IF EXISTS public CASCADE").execute(&db).await.expect("drop schema");
    sqlx::query("CREATE SCHEMA public").execute(&db).await.expect("create schema");
    crate::db::run_migrations(&db).await.expect("migrations");
    db
}

impl EngineContext {
    pub(crate) fn clock_now(&self) -> PrimitiveDateTime {
        self.clock.now()
    }

    pub(crate) fn new_session(&self, paper: PaperSnapshot) -> NewSession {
        NewSession {
            classroom_id: CLASSROOM.to_string(),
            created_by: TEACHER.to_string(),
            paper,
            roster: vec![STUDENT.to_string(), STUDENT_2.to_string(), STUDENT_3.to_string()],
        }
    }

    pub(crate) async fn draft_session(&self) -> TestSession {
        sessions::create_session(&self.state, self.new_session(ten_question_paper()))
            .await
            .expect("create session")
    }

    pub(crate) async fn active_session(&self, minutes: i64) -> TestSession {
        let draft = self.draft_session().await;
        sessions::activate(&self.state, &draft.id, minutes).await.expect("activate session")
    }
}

fn question(n: usize, chapter: &str, difficulty: DifficultyLevel) -> Question {
    Question {
        id: format!("q{n:02}"),
        prompt: format!("Question {n}"),
        options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
        correct_index: Some(1),
        chapter: chapter.to_string(),
        difficulty,
        kind: QuestionKind::Objective,
    }
}

/// Physics paper with ten objective questions `q01..q10`; option 1 is always correct.
pub(crate) fn ten_question_paper() -> PaperSnapshot {
    let questions = (1..=10)
        .map(|n| {
            let chapter = match n {
                1..=4 => "Kinematics",
                5..=7 => "Optics",
                _ => "Waves",
            };
            let difficulty = match n % 3 {
                0 => DifficultyLevel::Hard,
                1 => DifficultyLevel::Easy,
                _ => DifficultyLevel::Medium,
            };
            question(n, chapter, difficulty)
        })
        .collect();

    PaperSnapshot {
        paper_id: "paper-physics-1".to_string(),
        title: "Physics weekly quiz".to_string(),
        subject: "Physics".to_string(),
        questions,
    }
}

pub(crate) async fn analytics_settings() -> AnalyticsSettings {
    let _guard = env_lock().await;
    set_test_env();
    Settings::load().expect("settings").analytics().clone()
}

/// Completed sessions, one day apart, with one sealed attempt per `(student, correct)` pair.
/// The first `correct` questions are answered right and the rest wrong.
pub(crate) fn completed_history(
    rows: &[(&str, Vec<(&str, usize)>)],
) -> (Vec<TestSession>, Vec<Attempt>) {
    let paper = ten_question_paper();
    let mut sessions = Vec::with_capacity(rows.len());
    let mut attempts = Vec::new();

    for (index, (session_id, results)) in rows.iter().enumerate() {
        let started_at = CLOCK_START + Duration::days(index as i64);
        let ends_at = started_at + Duration::minutes(30);

        sessions.push(TestSession {
            id: session_id.to_string(),
            classroom_id: CLASSROOM.to_string(),
            created_by: TEACHER.to_string(),
            paper_snapshot: Json(paper.clone()),
            roster: Json(results.iter().map(|(student, _)| student.to_string()).collect()),
            status: SessionStatus::Completed,
            duration_minutes: Some(30),
            started_at: Some(started_at),
            ends_at: Some(ends_at),
            closed_at: Some(ends_at),
            created_at: started_at,
            updated_at: ends_at,
        });

        for (student, correct) in results {
            let answers: AnswerSheet = paper
                .questions
                .iter()
                .enumerate()
                .map(|(position, question)| {
                    let selection = if position < *correct { 1 } else { 0 };
                    (question.id.clone(), Some(selection))
                })
                .collect();
            let card = score_attempt(&paper, &answers, 600, 3).expect("score card");

            attempts.push(Attempt {
                id: format!("{session_id}-{student}"),
                session_id: session_id.to_string(),
                student_id: student.to_string(),
                status: AttemptStatus::Submitted,
                answers: Json(answers),
                started_at,
                submitted_at: Some(started_at + Duration::minutes(10)),
                total_time_seconds: Some(600),
                score_card: Some(Json(card)),
                score_error: None,
                created_at: started_at,
                updated_at: started_at,
            });
        }
    }

    (sessions, attempts)
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    caller: Option<(&str, Role)>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some((user_id, role)) = caller {
        builder = builder.header(USER_ID_HEADER, user_id).header(USER_ROLE_HEADER, role.as_str());
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}

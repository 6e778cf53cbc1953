use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Router,
};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::clock::Clock;
use crate::models::{
    CardFilter, CardPatch, CardStatus, Category, Contribution, CurrentUser, NewCard,
};
use crate::quiz::{self, QuizConfig, QuizFeedback, QuizResult, QuizSession};
use crate::session::{CardSession, SessionSummary, StartError};
use crate::srs;
use crate::store::{CardStore, StoreError};

/// Everything the handlers share. At most one practice/review session and
/// one quiz session are live at a time; starting a new one replaces the
/// old one.
pub struct App<S: CardStore> {
    pub store: S,
    pub clock: Arc<dyn Clock>,
    study: Option<CardSession<S>>,
    quiz: Option<QuizSession<S>>,
}

impl<S: CardStore> App<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        App {
            store,
            clock,
            study: None,
            quiz: None,
        }
    }
}

#[derive(Clone)]
pub struct ApiState<S: CardStore> {
    pub app: Arc<Mutex<App<S>>>,
}

pub fn app_router<S: CardStore>(state: ApiState<S>) -> Router {
    Router::new()
        .route("/api/cards", get(list_cards).post(create_card))
        .route("/api/cards/:id", patch(edit_card).delete(delete_card))
        .route("/api/cards/:id/mastered", post(toggle_mastered))
        .route("/api/cards/:id/contributions", post(add_contribution))
        .route(
            "/api/cards/:id/contributions/:index",
            delete(remove_contribution),
        )
        .route("/api/stats", get(stats))
        .route("/api/due_count", get(due_count))
        .route("/api/history", get(history))
        .route("/api/practice/start", post(start_practice))
        .route("/api/review/start", post(start_review))
        .route("/api/study/current", get(study_current))
        .route("/api/study/reveal", post(study_reveal))
        .route("/api/study/rate", post(study_rate))
        .route("/api/quiz/setup", get(quiz_setup))
        .route("/api/quiz/start", post(start_quiz))
        .route("/api/quiz/current", get(quiz_current))
        .route("/api/quiz/answer", post(quiz_answer))
        .route("/api/quiz/result", get(quiz_result))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

/// Identity comes from the session proxy in front of us; absent headers
/// mean an unauthenticated request.
fn current_user(headers: &HeaderMap) -> Result<CurrentUser, Response> {
    let id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    let name = headers
        .get("x-user-name")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    match (id, name) {
        (Some(id), Some(name)) => Ok(CurrentUser {
            id: id.to_string(),
            name: name.to_string(),
        }),
        _ => Err((StatusCode::UNAUTHORIZED, "missing user identity").into_response()),
    }
}

fn store_error(e: StoreError) -> Response {
    match e {
        StoreError::NotFound(what) => (StatusCode::NOT_FOUND, what).into_response(),
        StoreError::Invalid(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg).into_response(),
        StoreError::Backend(e) => {
            log::error!("storage failure: {e:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, "storage failure").into_response()
        }
    }
}

fn start_error(e: StartError) -> Response {
    let body = match &e {
        StartError::NoCards => json!({ "reason": "noCards", "message": e.to_string() }),
        StartError::NothingDue(next) => {
            json!({ "reason": "nothingDue", "message": e.to_string(), "next": next })
        }
        StartError::NotEnoughCards { min, available } => json!({
            "reason": "notEnoughCards",
            "message": e.to_string(),
            "min": min,
            "available": available,
        }),
        StartError::UnsupportedTimer(secs) => {
            json!({ "reason": "unsupportedTimer", "message": e.to_string(), "timerSecs": secs })
        }
    };
    (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
}

async fn list_cards<S: CardStore>(
    State(state): State<ApiState<S>>,
    Query(filter): Query<CardFilter>,
) -> impl IntoResponse {
    let app = state.app.lock().await;
    match app.store.list_cards().await {
        Ok(cards) => {
            let mut cards = filter.select(&cards);
            cards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Json(cards).into_response()
        }
        Err(e) => store_error(e),
    }
}

async fn create_card<S: CardStore>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Json(new): Json<NewCard>,
) -> impl IntoResponse {
    let user = match current_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let app = state.app.lock().await;
    let now = app.clock.now();
    match app.store.create_card(new, &user, now).await {
        Ok(card) => (StatusCode::CREATED, Json(card)).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditCardRequest {
    front: Option<String>,
    back: Option<String>,
    /// An empty string clears the example.
    example: Option<String>,
    category: Option<Category>,
}

async fn edit_card<S: CardStore>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(edit): Json<EditCardRequest>,
) -> impl IntoResponse {
    let user = match current_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let app = state.app.lock().await;
    let card = match app.store.get_card(&id).await {
        Ok(card) => card,
        Err(e) => return store_error(e),
    };
    if card.owner_id != user.id {
        return (StatusCode::FORBIDDEN, "only the owner can edit a card").into_response();
    }

    let front = edit.front.map(|f| f.trim().to_string());
    let back = edit.back.map(|b| b.trim().to_string());
    if front.as_deref() == Some("") || back.as_deref() == Some("") {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            "both sides of the card are required",
        )
            .into_response();
    }
    let patch = CardPatch {
        front,
        back,
        example: edit
            .example
            .map(|e| Some(e.trim().to_string()).filter(|e| !e.is_empty())),
        category: edit.category,
        ..Default::default()
    };
    match app.store.update_card(&id, patch).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error(e),
    }
}

async fn delete_card<S: CardStore>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = match current_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let app = state.app.lock().await;
    let card = match app.store.get_card(&id).await {
        Ok(card) => card,
        Err(e) => return store_error(e),
    };
    if card.owner_id != user.id {
        return (StatusCode::FORBIDDEN, "only the owner can delete a card").into_response();
    }
    match app.store.delete_card(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error(e),
    }
}

/// Manual override of the Leitner progression. Mastering jumps the card
/// to box 5; unmastering restarts it at box 1 with a cleared streak.
async fn toggle_mastered<S: CardStore>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = current_user(&headers) {
        return resp;
    }
    let app = state.app.lock().await;
    let mut card = match app.store.get_card(&id).await {
        Ok(card) => card,
        Err(e) => return store_error(e),
    };
    let patch = match card.status {
        CardStatus::Mastered => CardPatch {
            status: Some(CardStatus::Learning),
            leitner_box: Some(1),
            streak: Some(0),
            ..Default::default()
        },
        CardStatus::Learning => CardPatch {
            status: Some(CardStatus::Mastered),
            leitner_box: Some(5),
            ..Default::default()
        },
    };
    match app.store.update_card(&id, patch.clone()).await {
        Ok(()) => {
            patch.apply(&mut card);
            Json(card).into_response()
        }
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContributionRequest {
    #[serde(default)]
    meaning: String,
    #[serde(default)]
    example: String,
}

async fn add_contribution<S: CardStore>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ContributionRequest>,
) -> impl IntoResponse {
    let user = match current_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let meaning = req.meaning.trim().to_string();
    let example = req.example.trim().to_string();
    if meaning.is_empty() && example.is_empty() {
        return (StatusCode::UNPROCESSABLE_ENTITY, "contribution is empty").into_response();
    }
    let app = state.app.lock().await;
    let contribution = Contribution {
        contributor_id: user.id,
        contributor_name: user.name,
        meaning,
        example,
        created_at: app.clock.now(),
    };
    match app.store.add_contribution(&id, contribution).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => store_error(e),
    }
}

async fn remove_contribution<S: CardStore>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path((id, index)): Path<(String, usize)>,
) -> impl IntoResponse {
    let user = match current_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let app = state.app.lock().await;
    let card = match app.store.get_card(&id).await {
        Ok(card) => card,
        Err(e) => return store_error(e),
    };
    if let Some(contribution) = card.contributions.get(index) {
        if contribution.contributor_id != user.id {
            return (
                StatusCode::FORBIDDEN,
                "only the contributor can remove a contribution",
            )
                .into_response();
        }
    }
    match app.store.remove_contribution(&id, index).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error(e),
    }
}

async fn stats<S: CardStore>(State(state): State<ApiState<S>>) -> impl IntoResponse {
    let app = state.app.lock().await;
    match app.store.list_cards().await {
        Ok(cards) => Json(srs::deck_stats(&cards, app.clock.now())).into_response(),
        Err(e) => store_error(e),
    }
}

async fn due_count<S: CardStore>(State(state): State<ApiState<S>>) -> impl IntoResponse {
    let app = state.app.lock().await;
    match app.store.list_cards().await {
        Ok(cards) => Json(json!({ "due": srs::due_count(&cards, app.clock.now()) })).into_response(),
        Err(e) => store_error(e),
    }
}

async fn history<S: CardStore>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user = match current_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let app = state.app.lock().await;
    match app.store.study_history(&user.id).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => store_error(e),
    }
}

async fn start_practice<S: CardStore>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    filter: Option<Json<CardFilter>>,
) -> impl IntoResponse {
    let user = match current_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let mut app = state.app.lock().await;
    let cards = match app.store.list_cards().await {
        Ok(cards) => cards,
        Err(e) => return store_error(e),
    };
    let filter = filter.map(|Json(f)| f).unwrap_or_default();
    let candidates = filter.select(&cards);
    let mut rng = StdRng::from_entropy();
    let session = match CardSession::start_practice(
        app.store.clone(),
        app.clock.clone(),
        user,
        candidates,
        &mut rng,
    ) {
        Ok(session) => session,
        Err(e) => return start_error(e),
    };
    let prompt = session.prompt();
    app.study = Some(session);
    Json(json!({ "prompt": prompt })).into_response()
}

async fn start_review<S: CardStore>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user = match current_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let mut app = state.app.lock().await;
    let cards = match app.store.list_cards().await {
        Ok(cards) => cards,
        Err(e) => return store_error(e),
    };
    let session = match CardSession::start_review(app.store.clone(), app.clock.clone(), user, cards)
    {
        Ok(session) => session,
        Err(e) => return start_error(e),
    };
    let prompt = session.prompt();
    app.study = Some(session);
    Json(json!({ "prompt": prompt })).into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StudyStateResponse {
    kind: crate::session::SessionKind,
    prompt: Option<crate::session::PromptView>,
    finished: bool,
    summary: Option<SessionSummary>,
}

async fn study_current<S: CardStore>(State(state): State<ApiState<S>>) -> impl IntoResponse {
    let app = state.app.lock().await;
    match &app.study {
        Some(session) => Json(StudyStateResponse {
            kind: session.kind(),
            prompt: session.prompt(),
            finished: session.is_finished(),
            summary: session.summary(),
        })
        .into_response(),
        None => (StatusCode::NOT_FOUND, "no active study session").into_response(),
    }
}

async fn study_reveal<S: CardStore>(State(state): State<ApiState<S>>) -> impl IntoResponse {
    let mut app = state.app.lock().await;
    match app.study.as_mut().and_then(|s| s.reveal()) {
        Some(reveal) => Json(reveal).into_response(),
        None => (StatusCode::NOT_FOUND, "no card to reveal").into_response(),
    }
}

#[derive(Deserialize)]
struct RateRequest {
    difficulty: crate::models::Difficulty,
}

async fn study_rate<S: CardStore>(
    State(state): State<ApiState<S>>,
    Json(req): Json<RateRequest>,
) -> impl IntoResponse {
    let mut app = state.app.lock().await;
    let Some(session) = app.study.as_mut() else {
        return (StatusCode::NOT_FOUND, "no active study session").into_response();
    };
    session.rate(req.difficulty).await;
    Json(StudyStateResponse {
        kind: session.kind(),
        prompt: session.prompt(),
        finished: session.is_finished(),
        summary: session.summary(),
    })
    .into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuizSetupQuery {
    #[serde(default)]
    include_mastered: bool,
}

async fn quiz_setup<S: CardStore>(
    State(state): State<ApiState<S>>,
    Query(query): Query<QuizSetupQuery>,
) -> impl IntoResponse {
    let app = state.app.lock().await;
    match app.store.list_cards().await {
        Ok(cards) => Json(quiz::setup(&cards, query.include_mastered)).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuizStartRequest {
    #[serde(default)]
    config: QuizConfig,
    #[serde(default)]
    filter: CardFilter,
}

async fn start_quiz<S: CardStore>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    body: Option<Json<QuizStartRequest>>,
) -> impl IntoResponse {
    let user = match current_user(&headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };
    let mut app = state.app.lock().await;
    let cards = match app.store.list_cards().await {
        Ok(cards) => cards,
        Err(e) => return store_error(e),
    };
    let req = body.map(|Json(r)| r).unwrap_or_else(|| QuizStartRequest {
        config: QuizConfig::default(),
        filter: CardFilter::default(),
    });
    let candidates = req.filter.select(&cards);
    let session = match QuizSession::start(
        app.store.clone(),
        app.clock.clone(),
        user,
        candidates,
        cards,
        req.config,
        StdRng::from_entropy(),
    ) {
        Ok(session) => session,
        Err(e) => return start_error(e),
    };
    let question = session.current(app.clock.now());
    app.quiz = Some(session);
    Json(json!({ "question": question })).into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuizStateResponse {
    question: Option<quiz::QuestionView>,
    timed_out: Option<QuizFeedback>,
    finished: bool,
    result: Option<QuizResult>,
}

/// Polled by the timer loop in the client; expiry is resolved here rather
/// than trusting the client's clock.
async fn quiz_current<S: CardStore>(State(state): State<ApiState<S>>) -> impl IntoResponse {
    let mut app = state.app.lock().await;
    let now = app.clock.now();
    let Some(session) = app.quiz.as_mut() else {
        return (StatusCode::NOT_FOUND, "no active quiz").into_response();
    };
    let timed_out = session.check_timeout().await;
    Json(QuizStateResponse {
        question: session.current(now),
        timed_out,
        finished: session.is_finished(),
        result: session.result(),
    })
    .into_response()
}

#[derive(Deserialize)]
struct AnswerRequest {
    choice: usize,
}

async fn quiz_answer<S: CardStore>(
    State(state): State<ApiState<S>>,
    Json(req): Json<AnswerRequest>,
) -> impl IntoResponse {
    let mut app = state.app.lock().await;
    let Some(session) = app.quiz.as_mut() else {
        return (StatusCode::NOT_FOUND, "no active quiz").into_response();
    };
    match session.answer(req.choice).await {
        Some(feedback) => Json(feedback).into_response(),
        None => (StatusCode::CONFLICT, "no open question").into_response(),
    }
}

async fn quiz_result<S: CardStore>(State(state): State<ApiState<S>>) -> impl IntoResponse {
    let app = state.app.lock().await;
    match app.quiz.as_ref().and_then(|s| s.result()) {
        Some(result) => Json(result).into_response(),
        None => (StatusCode::NOT_FOUND, "no finished quiz").into_response(),
    }
}

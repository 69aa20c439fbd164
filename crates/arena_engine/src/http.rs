//! HTTP surface: sign-up, action ingress, profile lookup, the rendered
//! leaderboards page, and the backoffice purge.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::Rng;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::actions::ActionService;
use crate::entities::{ActionRequest, RankedPlayer, SignUpRequest};
use crate::error::ActionError;
use crate::profile_store::ProfileStore;
use crate::query::LeaderboardService;
use crate::score_store::ScoreBoard;

/// Shared handler state, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub actions: Arc<ActionService>,
    pub leaderboards: Arc<LeaderboardService>,
    pub profiles: Arc<dyn ProfileStore>,
    pub scores: Arc<dyn ScoreBoard>,
    pub max_leaderboards: i32,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/users/sign-up", post(sign_up))
        .route("/api/v1/users/actions", post(submit_action))
        .route("/api/v1/users/{userId}/profile", get(user_profile))
        .route("/leaderboards", get(leaderboards_page))
        .route("/backoffice-api/purge", post(purge))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Create a profile with a random leaderboard assignment and make it
/// visible on the board with score 0.
async fn sign_up(
    State(state): State<AppState>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    if request.nickname.trim().is_empty() {
        return Err(ApiError::bad_request("nickname must not be empty"));
    }
    // Uniform assignment over [1, MAX_LEADERBOARDS]; fixed for life.
    let leaderboard = rand::thread_rng().gen_range(1..=state.max_leaderboards);
    let profile = state.profiles.sign_up(&request.nickname, leaderboard).await?;
    state
        .scores
        .add_user(profile.leaderboard, &profile.id.to_string())
        .await?;
    Ok((StatusCode::CREATED, Json(profile)).into_response())
}

/// Validate, stamp the leaderboard from the profile, and enqueue.
async fn submit_action(
    State(state): State<AppState>,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    state
        .actions
        .submit(&request.user_id, &request.action, request.timestamp)
        .await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

async fn user_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = Uuid::parse_str(&user_id)
        .map_err(|_| ApiError::bad_request(format!("non-parseable user id: {user_id}")))?;
    // Human-facing read; eventual consistency is fine here.
    let profile = state
        .profiles
        .profile_eventual(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("user {user_id} not found")))?;
    Ok(Json(profile).into_response())
}

async fn leaderboards_page(State(state): State<AppState>) -> Result<Response, ApiError> {
    let boards = state.leaderboards.all_leaderboards().await?;
    Ok(Html(render_leaderboards(&boards)).into_response())
}

async fn purge(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.profiles.purge().await?;
    state.scores.purge().await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Render every active leaderboard as a plain HTML table.
fn render_leaderboards(boards: &BTreeMap<i32, Vec<RankedPlayer>>) -> String {
    let mut page = String::from(
        "<!doctype html><html><head><title>Leaderboards</title></head><body><h1>Leaderboards</h1>",
    );
    if boards.is_empty() {
        page.push_str("<p>No active leaderboards yet.</p>");
    }
    for (id, rows) in boards {
        page.push_str(&format!("<h2>Leaderboard {id}</h2>"));
        page.push_str("<table border=\"1\"><tr><th>#</th><th>Nickname</th><th>Score</th><th>User</th></tr>");
        for player in rows {
            page.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                player.row.position,
                escape_html(&player.nickname),
                player.row.score,
                escape_html(&player.row.user_id),
            ));
        }
        page.push_str("</table>");
    }
    page.push_str("</body></html>");
    page
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// HTTP error envelope mapped from the pipeline taxonomy.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<ActionError> for ApiError {
    fn from(err: ActionError) -> Self {
        let status = match &err {
            ActionError::Invalid(_) => StatusCode::BAD_REQUEST,
            ActionError::NotFound(_) => StatusCode::NOT_FOUND,
            ActionError::Transient(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::LeaderboardRow;

    #[test]
    fn rendered_page_escapes_nicknames() {
        let mut boards = BTreeMap::new();
        boards.insert(
            1,
            vec![RankedPlayer {
                row: LeaderboardRow {
                    leaderboard: 1,
                    user_id: "u1".into(),
                    score: 10,
                    position: 1,
                },
                nickname: "<script>x</script>".into(),
            }],
        );
        let page = render_leaderboards(&boards);
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>x"));
        assert!(page.contains("Leaderboard 1"));
    }

    #[test]
    fn empty_state_renders_placeholder() {
        let page = render_leaderboards(&BTreeMap::new());
        assert!(page.contains("No active leaderboards"));
    }
}

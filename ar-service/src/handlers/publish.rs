use crate::state::{AppState, reject};
use ar_common::app::Response;
use ar_registry::auth::{Action, Resource};
use ar_registry::model::{AgentDetail, ManifestKind, ServerDetail, SkillDetail};
use axum::Json;
use axum::extract::State;
use http::{HeaderMap, StatusCode};

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    kind: ManifestKind,
    name: &str,
) -> Result<(), (StatusCode, String)> {
    let token = bearer_token(headers);
    state
        .authorizer
        .check(
            token.as_deref(),
            Action::Publish,
            &Resource {
                kind,
                name: name.to_string(),
            },
        )
        .await
        .map_err(reject)
}

fn to_response(wrapped: ar_registry::model::WrappedManifest) -> Result<Json<Response>, (StatusCode, String)> {
    let data = serde_json::to_value(wrapped).map_err(|err| {
        tracing::error!("Failed to encode manifest: {}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    })?;
    Ok(Json(Response::new(Some(data))))
}

pub async fn publish_server(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(server): Json<ServerDetail>,
) -> Result<Json<Response>, (StatusCode, String)> {
    authorize(&state, &headers, ManifestKind::Server, &server.name).await?;
    let wrapped = state.registry.publish_server(server).await.map_err(reject)?;
    to_response(wrapped)
}

pub async fn publish_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(agent): Json<AgentDetail>,
) -> Result<Json<Response>, (StatusCode, String)> {
    authorize(&state, &headers, ManifestKind::Agent, &agent.name).await?;
    let wrapped = state.registry.publish_agent(agent).await.map_err(reject)?;
    to_response(wrapped)
}

pub async fn publish_skill(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(skill): Json<SkillDetail>,
) -> Result<Json<Response>, (StatusCode, String)> {
    authorize(&state, &headers, ManifestKind::Skill, &skill.name).await?;
    let wrapped = state.registry.publish_skill(skill).await.map_err(reject)?;
    to_response(wrapped)
}

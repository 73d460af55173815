use crate::state::{AppState, reject};
use ar_common::app::Response;
use ar_registry::model::ManifestKind;
use ar_registry::store::ListFilter;
use axum::Json;
use axum::extract::{Query, State};
use http::StatusCode;
use serde::Deserialize;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub include_hidden: bool,
    pub category: Option<String>,
    pub specialty: Option<String>,
}

impl ListQuery {
    fn filter(&self) -> ListFilter {
        ListFilter {
            name: self.name.clone(),
            version: self.version.clone(),
            include_hidden: self.include_hidden,
            category: self.category.clone(),
            specialty: self.specialty.clone(),
        }
    }
}

async fn list(
    state: AppState,
    kind: ManifestKind,
    query: ListQuery,
) -> Result<Json<Response>, (StatusCode, String)> {
    let manifests = state
        .registry
        .list(kind, &query.filter())
        .await
        .map_err(reject)?;

    let data = serde_json::to_value(manifests).map_err(|err| {
        tracing::error!("Failed to encode {} list: {}", kind, err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    })?;
    Ok(Json(Response::new(Some(data))))
}

pub async fn list_servers(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Response>, (StatusCode, String)> {
    list(state, ManifestKind::Server, query).await
}

pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Response>, (StatusCode, String)> {
    list(state, ManifestKind::Agent, query).await
}

pub async fn list_skills(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Response>, (StatusCode, String)> {
    list(state, ManifestKind::Skill, query).await
}

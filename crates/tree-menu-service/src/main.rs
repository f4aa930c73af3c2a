use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tree_menu_api::{
    load_routes, MigrateResult, RemoveItemResult, RenderRequest, RenderedMenu, TreeMenuApi,
    API_CONTRACT_VERSION,
};
use tree_menu_core::{MenuItem, MenuItemId, NewMenuItem};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

#[derive(Debug, Clone)]
struct ServiceState {
    api: TreeMenuApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct MoveItemRequest {
    position: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MenuQuery {
    path: Option<String>,
    route: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ItemList {
    items: Vec<MenuItem>,
}

#[derive(Debug, Parser)]
#[command(name = "tree-menu-service")]
#[command(about = "Local HTTP service for tree menus")]
struct Args {
    #[arg(long, default_value = "./tree_menu.sqlite3")]
    db: PathBuf,
    /// YAML file mapping route names to URL paths.
    #[arg(long)]
    routes: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(err: &anyhow::Error) -> ServiceError {
        let error = format!("{err:#}");
        tracing::warn!(%error, "request failed");
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error }
    }
}

impl MenuQuery {
    fn into_request(self, menu_name: String) -> RenderRequest {
        RenderRequest { menu_name, current_path: self.path, current_route: self.route }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/items", get(items_list).post(items_add))
        .route("/v1/items/:id", delete(items_remove))
        .route("/v1/items/:id/position", post(items_move))
        .route("/v1/menus/:name", get(menu_render))
        .route("/v1/menus/:name/html", get(menu_render_html))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let routes = load_routes(args.routes.as_deref())?;
    let state = ServiceState { api: TreeMenuApi::new(args.db, routes) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "tree menu service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<tree_menu_store_sqlite::SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<MigrateResult>>, ServiceError> {
    let result = state.api.migrate(request.dry_run).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn items_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<ItemList>>, ServiceError> {
    let items = state.api.list_items().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(ItemList { items })))
}

async fn items_add(
    State(state): State<ServiceState>,
    Json(request): Json<NewMenuItem>,
) -> Result<Json<ServiceEnvelope<MenuItem>>, ServiceError> {
    let item = state.api.add_item(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(item)))
}

async fn items_move(
    State(state): State<ServiceState>,
    Path(id): Path<MenuItemId>,
    Json(request): Json<MoveItemRequest>,
) -> Result<Json<ServiceEnvelope<MenuItem>>, ServiceError> {
    let item =
        state.api.move_item(id, request.position).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(item)))
}

async fn items_remove(
    State(state): State<ServiceState>,
    Path(id): Path<MenuItemId>,
) -> Result<Json<ServiceEnvelope<RemoveItemResult>>, ServiceError> {
    let result = state.api.remove_item(id).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn menu_render(
    State(state): State<ServiceState>,
    Path(name): Path<String>,
    Query(query): Query<MenuQuery>,
) -> Result<Json<ServiceEnvelope<RenderedMenu>>, ServiceError> {
    let rendered = state
        .api
        .render_menu(&query.into_request(name))
        .map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rendered)))
}

async fn menu_render_html(
    State(state): State<ServiceState>,
    Path(name): Path<String>,
    Query(query): Query<MenuQuery>,
) -> Result<Html<String>, ServiceError> {
    let rendered = state
        .api
        .render_menu(&query.into_request(name))
        .map_err(|err| ServiceState::error(&err))?;
    Ok(Html(rendered.html))
}

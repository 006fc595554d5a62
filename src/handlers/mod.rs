//! One handler per contract operation, bound by operationId in an explicit
//! registry. The dispatch layer has already matched the route and validated
//! the body by the time a handler runs; each handler performs at most one
//! storage call and owns its response entirely.

use std::collections::HashMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::{CreateEvent, Event, EventRecord, UpdateEvent};
use crate::spec::FieldIssue;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{
    ApiInfoBody, EventBody, EventCreatedBody, EventDeletedBody, EventListBody, EventUpdatedBody,
    HealthBody,
};

/// Everything a handler gets from the dispatch layer: shared state, matched
/// path parameters, and the schema-validated request body (if any).
pub struct RequestContext {
    pub state: AppState,
    pub params: HashMap<String, String>,
    pub body: Option<Value>,
}

pub type OperationHandler = fn(RequestContext) -> BoxFuture<'static, Response>;

/// The operationId-to-handler registry, built once at startup. The dispatch
/// layer checks it against the loaded contract so unbound operations are
/// surfaced at boot rather than at request time.
pub fn registry() -> HashMap<&'static str, OperationHandler> {
    let mut handlers: HashMap<&'static str, OperationHandler> = HashMap::new();
    handlers.insert("getApiInfo", |ctx| Box::pin(run(api_info(ctx))));
    handlers.insert("healthCheck", |ctx| Box::pin(run(health_check(ctx))));
    handlers.insert("listEvents", |ctx| Box::pin(run(list_events(ctx))));
    handlers.insert("createEvent", |ctx| Box::pin(run(create_event(ctx))));
    handlers.insert("getEventById", |ctx| Box::pin(run(get_event_by_id(ctx))));
    handlers.insert("updateEvent", |ctx| Box::pin(run(update_event(ctx))));
    handlers.insert("patchEvent", |ctx| Box::pin(run(update_event(ctx))));
    handlers.insert("deleteEvent", |ctx| Box::pin(run(delete_event(ctx))));
    handlers.insert("getOpenApiSpec", |ctx| Box::pin(run(get_openapi_spec(ctx))));
    handlers
}

async fn run(
    fut: impl std::future::Future<Output = Result<Response, AppError>>,
) -> Response {
    match fut.await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn list_events(ctx: RequestContext) -> Result<Response, AppError> {
    let records = ctx.state.repo.list().await?;
    let events: Vec<Event> = records.into_iter().map(EventRecord::client_view).collect();
    let message = list_message(events.len());
    Ok(Json(EventListBody { events, message }).into_response())
}

async fn create_event(ctx: RequestContext) -> Result<Response, AppError> {
    let input: CreateEvent = parse_body(ctx.body)?;
    let record = ctx.state.repo.create(input).await?;
    let event = record.client_view();

    let body = EventCreatedBody {
        id: event.id.clone(),
        message: "Event created successfully".to_owned(),
        event,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn get_event_by_id(ctx: RequestContext) -> Result<Response, AppError> {
    let id = path_param(&ctx, "id")?;
    let record = ctx
        .state
        .repo
        .get(&id)
        .await?
        .ok_or_else(|| not_found(&id))?;

    let body = EventBody {
        event: record.client_view(),
        message: "Event retrieved successfully".to_owned(),
    };
    Ok(Json(body).into_response())
}

async fn update_event(ctx: RequestContext) -> Result<Response, AppError> {
    let id = path_param(&ctx, "id")?;
    let patch: UpdateEvent = parse_body(ctx.body)?;
    let record = ctx
        .state
        .repo
        .update(&id, patch)
        .await?
        .ok_or_else(|| not_found(&id))?;

    let body = EventUpdatedBody {
        id: id.clone(),
        message: "Event updated successfully".to_owned(),
        event: record.client_view(),
    };
    Ok(Json(body).into_response())
}

async fn delete_event(ctx: RequestContext) -> Result<Response, AppError> {
    let id = path_param(&ctx, "id")?;
    let affected = ctx.state.repo.delete(&id).await?;
    if affected == 0 {
        return Err(not_found(&id));
    }

    let body = EventDeletedBody {
        id: id.clone(),
        message: "Event deleted successfully".to_owned(),
    };
    Ok(Json(body).into_response())
}

async fn health_check(_ctx: RequestContext) -> Result<Response, AppError> {
    let body = HealthBody {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
    };
    Ok(Json(body).into_response())
}

async fn api_info(_ctx: RequestContext) -> Result<Response, AppError> {
    let body = ApiInfoBody {
        message: "Calendar Events API",
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
    };
    Ok(Json(body).into_response())
}

async fn get_openapi_spec(ctx: RequestContext) -> Result<Response, AppError> {
    let doc = ctx.state.spec.load()?;
    Ok(Json((*doc).clone()).into_response())
}

fn list_message(count: usize) -> String {
    match count {
        0 => "No events found".to_owned(),
        1 => "Found 1 event".to_owned(),
        n => format!("Found {} events", n),
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Event with id '{}' not found", id))
}

fn path_param(ctx: &RequestContext, name: &str) -> Result<String, AppError> {
    ctx.params.get(name).cloned().ok_or_else(|| {
        AppError::Internal(format!("dispatch did not supply path parameter '{}'", name))
    })
}

/// Bodies reach handlers already validated against the operation's declared
/// schema, so a deserialization failure here means the contract and the
/// model shapes have drifted apart.
fn parse_body<T: DeserializeOwned>(body: Option<Value>) -> Result<T, AppError> {
    let value = body.unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|err| {
        AppError::Validation(vec![FieldIssue::new("body", err.to_string())])
    })
}

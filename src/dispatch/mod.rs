//! Contract-driven request dispatch.
//!
//! At startup the loaded OpenAPI document is flattened into a route table:
//! one entry per (path template, method, operation). Incoming requests are
//! matched against the table, their bodies validated against the operation's
//! declared schema, and the registered handler invoked. Operations the
//! registry does not cover stay live through a schema-derived mock response.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde_json::{json, Value};

use crate::handlers::{OperationHandler, RequestContext};
use crate::spec::{FieldIssue, JsonSchemaValidator, SpecError, Validator};
use crate::state::AppState;
use crate::utils::error::AppError;

/// Request bodies past this size are rejected while reading.
const BODY_LIMIT: usize = 1024 * 1024;

/// Guard against reference cycles when deriving mock values.
const MAX_MOCK_DEPTH: usize = 8;

#[derive(Debug, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

struct RouteEntry {
    method: Method,
    segments: Vec<Segment>,
    operation_id: Option<String>,
    request_schema: Option<Value>,
    responses: Value,
    requires_auth: bool,
    handler: Option<OperationHandler>,
}

pub struct Dispatcher {
    doc: Arc<Value>,
    routes: Vec<RouteEntry>,
    state: AppState,
    validator: Arc<dyn Validator>,
}

impl Dispatcher {
    /// Builds the route table from the loaded contract and checks the
    /// handler registry against it. Operations without a registered handler
    /// are logged at boot; they answer with a mock response at request time.
    pub fn from_contract(
        state: AppState,
        handlers: HashMap<&'static str, OperationHandler>,
    ) -> Result<Self, SpecError> {
        let doc = state.spec.load()?;
        let validator: Arc<dyn Validator> = Arc::new(JsonSchemaValidator::new(Arc::clone(&doc)));

        let mut routes = Vec::new();
        if let Some(paths) = doc.get("paths").and_then(Value::as_object) {
            for (template, item) in paths {
                for (name, method) in [
                    ("get", Method::GET),
                    ("post", Method::POST),
                    ("put", Method::PUT),
                    ("patch", Method::PATCH),
                    ("delete", Method::DELETE),
                ] {
                    let Some(op) = item.get(name) else { continue };

                    let operation_id = op
                        .get("operationId")
                        .and_then(Value::as_str)
                        .map(str::to_owned);
                    let handler = operation_id
                        .as_deref()
                        .and_then(|id| handlers.get(id).copied());

                    match (&operation_id, handler) {
                        (Some(id), None) => tracing::warn!(
                            operation = %id,
                            path = %template,
                            "No handler registered for contract operation; \
                             requests will get a schema-derived mock"
                        ),
                        (None, _) => tracing::warn!(
                            path = %template,
                            method = name,
                            "Contract operation has no operationId; \
                             requests will get a schema-derived mock"
                        ),
                        _ => {}
                    }

                    let request_schema = op
                        .pointer("/requestBody/content/application~1json/schema")
                        .cloned();
                    let requires_auth = op
                        .get("security")
                        .and_then(Value::as_array)
                        .map(|reqs| !reqs.is_empty())
                        .unwrap_or(false);

                    routes.push(RouteEntry {
                        method,
                        segments: parse_template(template),
                        operation_id,
                        request_schema,
                        responses: op.get("responses").cloned().unwrap_or(Value::Null),
                        requires_auth,
                        handler,
                    });
                }
            }
        }

        tracing::info!(operations = routes.len(), "Dispatch table built from contract");

        Ok(Self {
            doc,
            routes,
            state,
            validator,
        })
    }

    pub async fn handle(&self, req: Request<Body>) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();

        let Some((entry, params)) = self.match_route(&method, &path) else {
            return AppError::RouteNotFound(path).into_response();
        };

        // Reserved: no shipped operation declares a security requirement.
        if entry.requires_auth && !req.headers().contains_key(header::AUTHORIZATION) {
            return AppError::Unauthorized(
                "This operation requires an Authorization header".to_owned(),
            )
            .into_response();
        }

        let body = if let Some(schema) = &entry.request_schema {
            let bytes = match Limited::new(req.into_body(), BODY_LIMIT).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(err) if err.is::<LengthLimitError>() => {
                    return AppError::PayloadTooLarge(BODY_LIMIT).into_response()
                }
                Err(err) => {
                    return AppError::Internal(format!("failed to read request body: {}", err))
                        .into_response()
                }
            };

            let value: Value = match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                Err(_) => {
                    return AppError::Validation(vec![FieldIssue::new(
                        "body",
                        "Request body must be valid JSON",
                    )])
                    .into_response()
                }
            };

            if let Err(issues) = self.validator.validate(schema, &value) {
                return AppError::Validation(issues).into_response();
            }
            Some(value)
        } else {
            None
        };

        match entry.handler {
            Some(handler) => {
                let ctx = RequestContext {
                    state: self.state.clone(),
                    params,
                    body,
                };
                handler(ctx).await
            }
            None => self.mock_response(entry),
        }
    }

    fn match_route(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(&RouteEntry, HashMap<String, String>)> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.routes.iter().find_map(|entry| {
            if entry.method != *method {
                return None;
            }
            match_segments(&entry.segments, &segments).map(|params| (entry, params))
        })
    }

    /// Answers an unimplemented operation with a value derived from its first
    /// documented success response. A deliberate fallback that keeps the
    /// contract live, not an error.
    fn mock_response(&self, entry: &RouteEntry) -> Response {
        let (status, schema) = first_success(&entry.responses);
        let body = schema
            .map(|s| self.example_from_schema(&s, 0))
            .unwrap_or(Value::Null);

        tracing::debug!(
            operation = entry.operation_id.as_deref().unwrap_or("<anonymous>"),
            status = status.as_u16(),
            "Serving schema-derived mock for unimplemented operation"
        );
        (status, Json(body)).into_response()
    }

    fn example_from_schema(&self, schema: &Value, depth: usize) -> Value {
        if depth > MAX_MOCK_DEPTH {
            return Value::Null;
        }

        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            let resolved = reference
                .strip_prefix('#')
                .and_then(|pointer| self.doc.pointer(pointer));
            return match resolved {
                Some(target) => self.example_from_schema(target, depth + 1),
                None => Value::Null,
            };
        }

        if let Some(example) = schema.get("example").or_else(|| schema.get("default")) {
            return example.clone();
        }
        if let Some(first) = schema
            .get("enum")
            .and_then(Value::as_array)
            .and_then(|vals| vals.first())
        {
            return first.clone();
        }

        match primary_type(schema) {
            Some("object") => {
                let mut map = serde_json::Map::new();
                if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                    for (name, prop) in props {
                        map.insert(name.clone(), self.example_from_schema(prop, depth + 1));
                    }
                }
                Value::Object(map)
            }
            Some("array") => match schema.get("items") {
                Some(items) => json!([self.example_from_schema(items, depth + 1)]),
                None => json!([]),
            },
            Some("string") => {
                if schema.get("format").and_then(Value::as_str) == Some("date-time") {
                    json!("1970-01-01T00:00:00Z")
                } else {
                    json!("")
                }
            }
            Some("integer") | Some("number") => json!(0),
            Some("boolean") => json!(false),
            Some("null") => Value::Null,
            _ => json!({}),
        }
    }
}

/// Mounts the dispatcher as the router's sole entry point; route matching is
/// driven entirely by the contract, so axum-level routes are not declared.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .fallback(dispatch_entry)
        .with_state(dispatcher)
}

async fn dispatch_entry(State(dispatcher): State<Arc<Dispatcher>>, req: Request<Body>) -> Response {
    dispatcher.handle(req).await
}

fn parse_template(template: &str) -> Vec<Segment> {
    template
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.strip_prefix('{')
                .and_then(|rest| rest.strip_suffix('}'))
                .map(|name| Segment::Param(name.to_owned()))
                .unwrap_or_else(|| Segment::Literal(s.to_owned()))
        })
        .collect()
}

fn match_segments(template: &[Segment], path: &[&str]) -> Option<HashMap<String, String>> {
    if template.len() != path.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (segment, actual) in template.iter().zip(path) {
        match segment {
            Segment::Literal(expected) if expected == actual => {}
            Segment::Literal(_) => return None,
            Segment::Param(name) => {
                params.insert(name.clone(), (*actual).to_owned());
            }
        }
    }
    Some(params)
}

/// Declared type of a schema, preferring the first non-null entry when the
/// type is an array.
fn primary_type(schema: &Value) -> Option<&str> {
    match schema.get("type") {
        Some(Value::String(name)) => Some(name.as_str()),
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .find(|name| *name != "null")
            .or_else(|| names.iter().filter_map(Value::as_str).next()),
        _ => None,
    }
}

/// First documented 2xx status and its JSON schema, falling back to 200.
fn first_success(responses: &Value) -> (StatusCode, Option<Value>) {
    let mut successes: Vec<(u16, &Value)> = responses
        .as_object()
        .into_iter()
        .flatten()
        .filter_map(|(code, spec)| {
            let numeric: u16 = code.parse().ok()?;
            (200..300).contains(&numeric).then_some((numeric, spec))
        })
        .collect();
    successes.sort_by_key(|(code, _)| *code);

    match successes.first() {
        Some((code, spec)) => {
            let status = StatusCode::from_u16(*code).unwrap_or(StatusCode::OK);
            let schema = spec
                .pointer("/content/application~1json/schema")
                .cloned();
            (status, schema)
        }
        None => (StatusCode::OK, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers;
    use crate::repository::InMemoryEventRepository;
    use crate::spec::SpecStore;
    use http_body_util::BodyExt;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tower::ServiceExt;

    fn shipped_contract_app() -> Router {
        let spec = Arc::new(SpecStore::new(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/api/openapi.json"
        )));
        app_with_spec(spec)
    }

    fn app_with_spec(spec: Arc<SpecStore>) -> Router {
        let state = AppState {
            repo: Arc::new(InMemoryEventRepository::new()),
            spec,
        };
        let dispatcher = Dispatcher::from_contract(state, handlers::registry()).unwrap();
        router(Arc::new(dispatcher))
    }

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn write_fixture(contents: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "calendar-dispatch-{}-{}.json",
            std::process::id(),
            n
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    async fn send(
        app: &Router,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        let request = match body {
            Some(value) => builder.body(Body::from(value.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn standup() -> Value {
        json!({
            "title": "Standup",
            "startDate": "2025-01-01T09:00:00Z",
            "endDate": "2025-01-01T09:15:00Z"
        })
    }

    #[tokio::test]
    async fn create_returns_201_with_generated_id_and_exact_fields() {
        let app = shipped_contract_app();

        let (status, body) = send(&app, "POST", "/api/events", Some(standup())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "Event created successfully");

        let id = body["id"].as_str().unwrap();
        let re = regex::Regex::new("^evt_[A-Za-z0-9]{12}$").unwrap();
        assert!(re.is_match(id));

        // Omitted optional fields are stripped, not rendered as null.
        let mut keys: Vec<&str> = body["event"]
            .as_object()
            .unwrap()
            .keys()
            .map(|k| k.as_str())
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["endDate", "id", "startDate", "title"]);
    }

    #[tokio::test]
    async fn created_event_round_trips_by_id() {
        let app = shipped_contract_app();

        let (_, created) = send(&app, "POST", "/api/events", Some(standup())).await;
        let id = created["id"].as_str().unwrap();

        let (status, body) = send(&app, "GET", &format!("/api/events/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["event"], created["event"]);
        assert_eq!(body["message"], "Event retrieved successfully");
    }

    #[tokio::test]
    async fn list_message_reports_count_with_correct_plurality() {
        let app = shipped_contract_app();

        let (status, body) = send(&app, "GET", "/api/events", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["events"], json!([]));
        assert_eq!(body["message"], "No events found");

        send(&app, "POST", "/api/events", Some(standup())).await;
        let (_, body) = send(&app, "GET", "/api/events", None).await;
        assert_eq!(body["message"], "Found 1 event");

        let later = json!({
            "title": "Retro",
            "startDate": "2025-01-02T09:00:00Z",
            "endDate": "2025-01-02T10:00:00Z"
        });
        send(&app, "POST", "/api/events", Some(later)).await;
        let (_, body) = send(&app, "GET", "/api/events", None).await;
        assert_eq!(body["message"], "Found 2 events");

        // Ordered by start date ascending.
        assert_eq!(body["events"][0]["title"], "Standup");
        assert_eq!(body["events"][1]["title"], "Retro");
    }

    #[tokio::test]
    async fn missing_required_field_yields_400_with_details() {
        let app = shipped_contract_app();

        let payload = json!({
            "startDate": "2025-01-01T09:00:00Z",
            "endDate": "2025-01-01T09:15:00Z"
        });
        let (status, body) = send(&app, "POST", "/api/events", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");

        let details = body["details"].as_array().unwrap();
        assert!(details.iter().any(|d| d["field"] == "title"));
    }

    #[tokio::test]
    async fn malformed_json_body_yields_400() {
        let app = shipped_contract_app();

        let request = Request::builder()
            .method("POST")
            .uri("/api/events")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["details"][0]["field"], "body");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_as_payload_too_large() {
        let app = shipped_contract_app();

        let request = Request::builder()
            .method("POST")
            .uri("/api/events")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("x".repeat(BODY_LIMIT + 1)))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Payload too large");
    }

    #[tokio::test]
    async fn date_ordering_is_not_enforced() {
        let app = shipped_contract_app();

        let backwards = json!({
            "title": "Time travel",
            "startDate": "2025-01-02T09:00:00Z",
            "endDate": "2025-01-01T09:00:00Z"
        });
        let (status, _) = send(&app, "POST", "/api/events", Some(backwards)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn client_supplied_id_is_preserved_and_conflicts_on_reuse() {
        let app = shipped_contract_app();

        let mut payload = standup();
        payload["id"] = json!("evt_clientchosen");
        payload["title"] = json!("First");

        let (status, body) = send(&app, "POST", "/api/events", Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "evt_clientchosen");

        payload["title"] = json!("Second");
        let (status, body) = send(&app, "POST", "/api/events", Some(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Conflict");
    }

    #[tokio::test]
    async fn missing_event_responses_name_the_id() {
        let app = shipped_contract_app();
        let id = "evt_doesnotexist";

        for method in ["GET", "DELETE"] {
            let (status, body) = send(&app, method, &format!("/api/events/{}", id), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert!(body["message"].as_str().unwrap().contains(id));
        }

        let patch = json!({ "title": "New title" });
        let (status, body) =
            send(&app, "PATCH", &format!("/api/events/{}", id), Some(patch)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["message"].as_str().unwrap().contains(id));
    }

    #[tokio::test]
    async fn patch_updates_fields_and_returns_the_event() {
        let app = shipped_contract_app();

        let (_, created) = send(&app, "POST", "/api/events", Some(standup())).await;
        let id = created["id"].as_str().unwrap();

        let patch = json!({ "title": "Renamed", "location": "Room 4" });
        let (status, body) =
            send(&app, "PATCH", &format!("/api/events/{}", id), Some(patch)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Event updated successfully");
        assert_eq!(body["event"]["title"], "Renamed");
        assert_eq!(body["event"]["location"], "Room 4");
        assert_eq!(body["event"]["startDate"], created["event"]["startDate"]);
    }

    #[tokio::test]
    async fn patch_null_clears_an_optional_field() {
        let app = shipped_contract_app();

        let mut payload = standup();
        payload["description"] = json!("Daily sync");
        let (_, created) = send(&app, "POST", "/api/events", Some(payload)).await;
        let id = created["id"].as_str().unwrap();
        assert_eq!(created["event"]["description"], "Daily sync");

        let patch = json!({ "description": null });
        let (status, body) =
            send(&app, "PATCH", &format!("/api/events/{}", id), Some(patch)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["event"].get("description").is_none());
        assert_eq!(body["event"]["title"], "Standup");
    }

    #[tokio::test]
    async fn delete_then_404_on_second_delete() {
        let app = shipped_contract_app();

        let (_, created) = send(&app, "POST", "/api/events", Some(standup())).await;
        let id = created["id"].as_str().unwrap();

        let (status, body) = send(&app, "DELETE", &format!("/api/events/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Event deleted successfully");

        let (status, _) = send(&app, "DELETE", &format!("/api/events/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_returns_route_not_found_with_path() {
        let app = shipped_contract_app();

        let (status, body) = send(&app, "GET", "/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Route not found");
        assert_eq!(body["path"], "/nope");
    }

    #[tokio::test]
    async fn undeclared_method_on_a_declared_path_is_route_not_found() {
        let app = shipped_contract_app();

        let (status, body) = send(&app, "POST", "/health", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Route not found");
    }

    #[tokio::test]
    async fn health_and_info_endpoints_answer() {
        let app = shipped_contract_app();

        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].is_string());

        let (status, body) = send(&app, "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn raw_contract_document_is_served() {
        let app = shipped_contract_app();

        let (status, body) = send(&app, "GET", "/api/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["openapi"], "3.1.0");
        assert!(body["paths"]["/api/events"].is_object());
    }

    #[tokio::test]
    async fn unhandled_operation_answers_with_a_schema_derived_mock() {
        let fixture = write_fixture(
            &json!({
                "openapi": "3.1.0",
                "paths": {
                    "/api/widgets": {
                        "get": {
                            "operationId": "listWidgets",
                            "responses": {
                                "200": {
                                    "description": "widgets",
                                    "content": { "application/json": { "schema": {
                                        "type": "object",
                                        "properties": {
                                            "widgets": { "type": "array", "items": { "type": "string" } },
                                            "total": { "type": "integer" },
                                            "note": { "type": ["string", "null"] }
                                        }
                                    } } }
                                }
                            }
                        }
                    }
                }
            })
            .to_string(),
        );

        let app = app_with_spec(Arc::new(SpecStore::new(fixture)));
        let (status, body) = send(&app, "GET", "/api/widgets", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "widgets": [""], "total": 0, "note": "" }));
    }

    #[test]
    fn primary_type_prefers_the_non_null_entry() {
        assert_eq!(primary_type(&json!({ "type": "string" })), Some("string"));
        assert_eq!(
            primary_type(&json!({ "type": ["null", "string"] })),
            Some("string")
        );
        assert_eq!(primary_type(&json!({ "type": ["null"] })), Some("null"));
        assert_eq!(primary_type(&json!({})), None);
    }

    #[tokio::test]
    async fn security_declaring_operation_requires_authorization_header() {
        let fixture = write_fixture(
            &json!({
                "openapi": "3.1.0",
                "paths": {
                    "/api/admin": {
                        "get": {
                            "operationId": "adminOnly",
                            "security": [{ "bearerAuth": [] }],
                            "responses": { "200": { "description": "ok" } }
                        }
                    }
                }
            })
            .to_string(),
        );

        let app = app_with_spec(Arc::new(SpecStore::new(fixture)));
        let (status, body) = send(&app, "GET", "/api/admin", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");
        assert!(body["message"].is_string());
    }

    #[test]
    fn templates_parse_into_literal_and_param_segments() {
        let segments = parse_template("/api/events/{id}");
        assert_eq!(
            segments,
            vec![
                Segment::Literal("api".to_owned()),
                Segment::Literal("events".to_owned()),
                Segment::Param("id".to_owned()),
            ]
        );
    }
}

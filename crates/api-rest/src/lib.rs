//! # API REST
//!
//! REST API for the laboratory result engine.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON request/response types, status codes, CORS)
//!
//! All result rules live in `lims-core`; handlers translate requests into core calls and map
//! [`LabError`] classes onto HTTP status codes.

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use lims_core::calculator::{estimated_filtration_rate, FiltrationOutcome};
use lims_core::constants::ADULT_AGE_YEARS;
use lims_core::panel::parse_panel_list;
use lims_core::report::markdown::render_report;
use lims_core::store::{FileOrderBook, FileResultStore, OrderBook};
use lims_core::{
    Age, ErrorClass, FiltrationStage, Gender, LabError, LabService, NonEmptyText, Operator,
    OperatorRole, Order, OrderId, PanelType, Patient, PrintRequest, Registration, Salutation,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

/// The service configuration served over REST: file-backed orders and results.
pub type RestLabService = LabService<FileOrderBook, FileResultStore>;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    service: Arc<RestLabService>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        panel_ranges,
        calculate_egfr,
        create_order,
        get_order,
        capture_result,
        authorize_result,
        order_report,
    ),
    components(schemas(
        HealthRes,
        RangesRes,
        ParameterRes,
        EgfrRes,
        CreateOrderReq,
        OrderRes,
        PanelStateRes,
        OperatorReq,
        CaptureReq,
        CaptureRes,
        AuthorizeReq,
        AuthorizeRes,
        ReportRes,
    ))
)]
pub struct ApiDoc;

/// Build the REST router, including Swagger UI and permissive CORS.
pub fn router(service: Arc<RestLabService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/panels/:panel/ranges", get(panel_ranges))
        .route("/calculations/egfr", get(calculate_egfr))
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/results/:panel", put(capture_result))
        .route(
            "/orders/:id/results/:panel/authorize",
            post(authorize_result),
        )
        .route("/orders/:id/report", get(order_report))
        .merge(
            SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(CorsLayer::permissive())
        .with_state(AppState { service })
}

fn status_for(err: &LabError) -> StatusCode {
    match err.class() {
        ErrorClass::Input => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorClass::Workflow => StatusCode::CONFLICT,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Configuration | ErrorClass::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn lab_error(err: LabError) -> (StatusCode, String) {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("request failed: {:?}", err);
        return (status, "Internal error".into());
    }
    (status, err.to_string())
}

fn bad_request(err: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn parse_order_id(id: &str) -> Result<OrderId, (StatusCode, String)> {
    OrderId::new(id).map_err(bad_request)
}

fn parse_panel(panel: &str) -> Result<PanelType, (StatusCode, String)> {
    panel.parse().map_err(|e: LabError| (StatusCode::NOT_FOUND, e.to_string()))
}

fn parse_gender(gender: &str) -> Result<Gender, (StatusCode, String)> {
    gender.parse().map_err(bad_request)
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DemographicsQuery {
    /// Age in whole years
    pub age: u32,
    /// `male` or `female`
    pub gender: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ParameterRes {
    pub name: String,
    pub section: Option<String>,
    pub unit: Option<String>,
    pub required: bool,
    pub reference_range: Option<String>,
    pub subgroup: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct RangesRes {
    pub panel: String,
    pub parameters: Vec<ParameterRes>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EgfrQuery {
    /// Serum creatinine in mg/dL
    pub creatinine: f64,
    pub age: u32,
    pub gender: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct EgfrRes {
    pub egfr: f64,
    pub stage: String,
    pub description: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateOrderReq {
    /// Generated when omitted
    pub id: Option<String>,
    pub salutation: String,
    pub name: String,
    /// e.g. `34` or `2Y 6M`
    pub age: String,
    pub gender: String,
    pub contact: Option<String>,
    pub referred_by: Option<String>,
    pub panels: Vec<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct PanelStateRes {
    pub panel: String,
    pub state: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct OrderRes {
    pub id: String,
    pub patient: String,
    pub age: String,
    pub gender: String,
    pub referred_by: String,
    pub ordered_on: String,
    pub status: String,
    pub panels: Vec<PanelStateRes>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct OperatorReq {
    pub name: String,
    /// `admin`, `billing`, `technician` or `satellite`
    pub role: String,
    /// e.g. `SLMC 4471`
    pub registration: Option<String>,
}

impl OperatorReq {
    fn operator(&self) -> Result<Operator, LabError> {
        let operator = Operator::new(&self.name, self.role.parse::<OperatorRole>()?)?;
        Ok(match &self.registration {
            Some(registration) => operator.with_registration(registration.parse::<Registration>()?),
            None => operator,
        })
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CaptureReq {
    /// Parameter name → entered value
    pub values: BTreeMap<String, String>,
    pub comment: Option<String>,
    pub operator: OperatorReq,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CaptureRes {
    pub order_id: String,
    pub panel: String,
    pub values: BTreeMap<String, String>,
    /// Differential parameter → absolute count (`null` when not computable)
    pub absolute_counts: BTreeMap<String, Option<u64>>,
    pub egfr: Option<f64>,
    pub stage: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct AuthorizeReq {
    pub operator: OperatorReq,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct AuthorizeRes {
    pub order_id: String,
    pub panel: String,
    pub authorized_by: String,
    pub authorized_at: String,
    pub order_status: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    /// Comma-separated panels; every ordered panel when omitted
    pub panels: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ReportRes {
    pub order_id: String,
    pub documents: usize,
    pub markdown: String,
    #[schema(value_type = Object)]
    pub report: serde_json::Value,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "LIMS REST API is alive".into(),
    })
}

#[utoipa::path(
    get,
    path = "/panels/{panel}/ranges",
    params(("panel" = String, Path, description = "Panel name or alias"), DemographicsQuery),
    responses(
        (status = 200, description = "Resolved parameters in display order", body = RangesRes),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Unknown panel")
    )
)]
/// Resolve a panel's parameters and reference ranges for a patient subgroup.
#[axum::debug_handler]
async fn panel_ranges(
    State(state): State<AppState>,
    Path(panel): Path<String>,
    Query(query): Query<DemographicsQuery>,
) -> ApiResult<RangesRes> {
    let panel = parse_panel(&panel)?;
    let gender = parse_gender(&query.gender)?;
    let specs = state
        .service
        .resolve(panel, query.age, gender)
        .map_err(lab_error)?;

    Ok(Json(RangesRes {
        panel: panel.to_string(),
        parameters: specs
            .into_iter()
            .map(|spec| ParameterRes {
                name: spec.name,
                section: spec.section,
                unit: spec.unit,
                required: spec.required,
                reference_range: spec.reference.as_ref().map(|r| r.normal.clone()),
                subgroup: spec.reference.map(|r| r.subgroup),
            })
            .collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/calculations/egfr",
    params(EgfrQuery),
    responses(
        (status = 200, description = "Estimated GFR and stage", body = EgfrRes),
        (status = 422, description = "Creatinine or age outside the equation's domain")
    )
)]
/// Estimate GFR (CKD-EPI 2021) and its stage.
#[axum::debug_handler]
async fn calculate_egfr(
    State(_state): State<AppState>,
    Query(query): Query<EgfrQuery>,
) -> ApiResult<EgfrRes> {
    let gender = parse_gender(&query.gender)?;
    if query.age < ADULT_AGE_YEARS || !(query.creatinine > 0.0) {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("eGFR requires creatinine > 0 and age >= {ADULT_AGE_YEARS}"),
        ));
    }
    let egfr = estimated_filtration_rate(query.creatinine, query.age, gender);
    let stage = FiltrationStage::for_rate(egfr);
    Ok(Json(EgfrRes {
        egfr,
        stage: stage.code().into(),
        description: stage.description().into(),
    }))
}

fn order_res(order: &Order, panels: Vec<PanelStateRes>, status: String) -> OrderRes {
    OrderRes {
        id: order.id.to_string(),
        patient: order.patient.display_name(),
        age: order.patient.age.to_string(),
        gender: order.patient.gender.to_string(),
        referred_by: order.referred_by.clone(),
        ordered_on: order.ordered_on.to_string(),
        status,
        panels,
    }
}

#[utoipa::path(
    post,
    path = "/orders",
    request_body = CreateOrderReq,
    responses(
        (status = 201, description = "Order registered", body = OrderRes),
        (status = 400, description = "Bad request"),
        (status = 422, description = "Invalid order")
    )
)]
/// Register an order (billing collaborator convenience).
#[axum::debug_handler]
async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderReq>,
) -> Result<(StatusCode, Json<OrderRes>), (StatusCode, String)> {
    let id = match req.id.as_deref() {
        Some(id) => parse_order_id(id)?,
        None => OrderId::generate(),
    };
    let patient = Patient {
        salutation: req.salutation.parse::<Salutation>().map_err(bad_request)?,
        name: NonEmptyText::new(&req.name).map_err(bad_request)?,
        age: req.age.parse::<Age>().map_err(bad_request)?,
        gender: parse_gender(&req.gender)?,
        contact: req.contact.filter(|c| !c.trim().is_empty()),
    };
    let panels = parse_panel_list(&req.panels.join(",")).map_err(bad_request)?;
    let order = Order::new(
        id,
        patient,
        req.referred_by,
        panels,
        chrono::Local::now().date_naive(),
    )
    .map_err(lab_error)?;

    state.service.orders().insert(&order).map_err(lab_error)?;
    let panels = order
        .panels
        .iter()
        .map(|panel| PanelStateRes {
            panel: panel.to_string(),
            state: lims_core::PanelState::NotStarted.to_string(),
        })
        .collect();
    let status = order.status.to_string();
    Ok((StatusCode::CREATED, Json(order_res(&order, panels, status))))
}

#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(("id" = String, Path, description = "Order reference")),
    responses(
        (status = 200, description = "Order with per-panel state", body = OrderRes),
        (status = 404, description = "Order not found")
    )
)]
/// Read an order with its aggregate status and per-panel authorization state.
#[axum::debug_handler]
async fn get_order(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<OrderRes> {
    let id = parse_order_id(&id)?;
    let order = state.service.orders().order(&id).map_err(lab_error)?;
    let progress = state.service.progress(&id).map_err(lab_error)?;
    let panels = progress
        .panels
        .into_iter()
        .map(|p| PanelStateRes {
            panel: p.panel.to_string(),
            state: p.state.to_string(),
        })
        .collect();
    Ok(Json(order_res(&order, panels, progress.status.to_string())))
}

#[utoipa::path(
    put,
    path = "/orders/{id}/results/{panel}",
    params(
        ("id" = String, Path, description = "Order reference"),
        ("panel" = String, Path, description = "Panel name or alias")
    ),
    request_body = CaptureReq,
    responses(
        (status = 200, description = "Captured values with derived-value preview", body = CaptureRes),
        (status = 404, description = "Order or panel not found"),
        (status = 409, description = "Workflow precondition not met"),
        (status = 422, description = "Rejected values")
    )
)]
/// Capture (or replace) a panel's results.
#[axum::debug_handler]
async fn capture_result(
    State(state): State<AppState>,
    Path((id, panel)): Path<(String, String)>,
    Json(req): Json<CaptureReq>,
) -> ApiResult<CaptureRes> {
    let id = parse_order_id(&id)?;
    let panel = parse_panel(&panel)?;
    let operator = req.operator.operator().map_err(lab_error)?;

    let record = state
        .service
        .capture_result(&id, panel, &req.values, req.comment, &operator)
        .map_err(lab_error)?;
    let derived = state
        .service
        .derived_values(&id, panel)
        .map_err(lab_error)?;
    let (egfr, stage) = match derived.filtration {
        Some(FiltrationOutcome::Computed { egfr, stage }) => (Some(egfr), Some(stage.to_string())),
        _ => (None, None),
    };

    Ok(Json(CaptureRes {
        order_id: id.to_string(),
        panel: panel.to_string(),
        values: record.raw_values(),
        absolute_counts: derived.absolute_counts,
        egfr,
        stage,
    }))
}

#[utoipa::path(
    post,
    path = "/orders/{id}/results/{panel}/authorize",
    params(
        ("id" = String, Path, description = "Order reference"),
        ("panel" = String, Path, description = "Panel name or alias")
    ),
    request_body = AuthorizeReq,
    responses(
        (status = 200, description = "Panel authorized", body = AuthorizeRes),
        (status = 404, description = "Order or panel not found"),
        (status = 409, description = "Workflow precondition not met"),
        (status = 422, description = "Stored values no longer validate")
    )
)]
/// Authorize a captured panel and roll up the order status.
#[axum::debug_handler]
async fn authorize_result(
    State(state): State<AppState>,
    Path((id, panel)): Path<(String, String)>,
    Json(req): Json<AuthorizeReq>,
) -> ApiResult<AuthorizeRes> {
    let id = parse_order_id(&id)?;
    let panel = parse_panel(&panel)?;
    let operator = req.operator.operator().map_err(lab_error)?;

    let outcome = state
        .service
        .authorize(&id, panel, &operator)
        .map_err(lab_error)?;
    let authorization = outcome
        .record
        .authorization
        .ok_or_else(|| lab_error(LabError::PanelNotAuthorized {
            order_id: id.clone(),
            panel,
        }))?;

    Ok(Json(AuthorizeRes {
        order_id: id.to_string(),
        panel: panel.to_string(),
        authorized_by: authorization.by.to_string(),
        authorized_at: authorization.at.to_rfc3339(),
        order_status: outcome.order_status.to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/orders/{id}/report",
    params(("id" = String, Path, description = "Order reference"), ReportQuery),
    responses(
        (status = 200, description = "Composed report", body = ReportRes),
        (status = 404, description = "Order not found"),
        (status = 409, description = "A requested panel is not authorized or the order is cancelled")
    )
)]
/// Compose the printable report for an order.
#[axum::debug_handler]
async fn order_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<ReportRes> {
    let id = parse_order_id(&id)?;
    let request = match query.panels.as_deref() {
        None => PrintRequest::Bulk,
        Some(list) => {
            let panels = parse_panel_list(list).map_err(bad_request)?;
            match panels.as_slice() {
                [panel] => PrintRequest::Single(*panel),
                _ => PrintRequest::Panels(panels),
            }
        }
    };

    let report = state.service.compose(&id, &request).map_err(lab_error)?;
    let json = serde_json::to_value(&report).map_err(|e| lab_error(LabError::Serialization(e)))?;
    Ok(Json(ReportRes {
        order_id: id.to_string(),
        documents: report.documents.len(),
        markdown: render_report(&report),
        report: json,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use lims_core::{LabConfig, Letterhead, ReferenceRangeCatalog};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(temp_dir: &TempDir) -> Router {
        let config = LabConfig::new(temp_dir.path().to_path_buf(), Letterhead::default()).unwrap();
        let service = LabService::new(
            Arc::new(ReferenceRangeCatalog::builtin().unwrap()),
            Arc::new(config.clone()),
            FileOrderBook::new(config.orders_dir()),
            FileResultStore::new(config.results_dir()),
        );
        router(Arc::new(service))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn technician() -> Value {
        json!({ "name": "N. Silva", "role": "technician", "registration": "SLMC 4471" })
    }

    fn creatinine_order() -> Value {
        json!({
            "id": "LAB-100",
            "salutation": "Mr",
            "name": "S. Fernando",
            "age": "50",
            "gender": "male",
            "referred_by": "Dr. Kamal",
            "panels": ["serum-creatinine", "UFR"]
        })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let (status, body) = send(&app(&temp_dir), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn ranges_follow_demographics() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let app = app(&temp_dir);
        let (status, body) = send(&app, "GET", "/panels/FBC/ranges?age=3&gender=female", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["panel"], "full-blood-count");
        assert_eq!(body["parameters"][0]["reference_range"], "6000 - 17500");

        let (status, _) = send(&app, "GET", "/panels/lipid-profile/ranges?age=3&gender=female", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn egfr_rejects_children() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let app = app(&temp_dir);
        let (status, body) = send(
            &app,
            "GET",
            "/calculations/egfr?creatinine=1.0&age=50&gender=male",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stage"], "G1");

        let (status, _) = send(
            &app,
            "GET",
            "/calculations/egfr?creatinine=1.0&age=12&gender=male",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn capture_authorize_and_print_workflow() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let app = app(&temp_dir);

        let (status, body) = send(&app, "POST", "/orders", Some(creatinine_order())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "Ordered");

        let (status, body) = send(
            &app,
            "PUT",
            "/orders/LAB-100/results/serum-creatinine",
            Some(json!({
                "values": { "Serum Creatinine": "1.0" },
                "operator": technician()
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stage"], "G1 (Normal or high)");

        let (status, body) = send(
            &app,
            "POST",
            "/orders/LAB-100/results/serum-creatinine/authorize",
            Some(json!({ "operator": technician() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order_status"], "Partially authorized");

        // Bulk print is all-or-nothing; the urine panel is not authorized yet.
        let (status, _) = send(&app, "GET", "/orders/LAB-100/report", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(
            &app,
            "GET",
            "/orders/LAB-100/report?panels=serum-creatinine",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["documents"], 1);
        assert!(body["markdown"]
            .as_str()
            .unwrap()
            .contains("## SERUM CREATININE"));

        let (status, body) = send(&app, "GET", "/orders/LAB-100", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["panels"][0]["state"], "Authorized");
        assert_eq!(body["panels"][1]["state"], "Not started");
    }

    #[tokio::test]
    async fn input_errors_are_unprocessable() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let app = app(&temp_dir);
        send(&app, "POST", "/orders", Some(creatinine_order())).await;

        let (status, _) = send(
            &app,
            "PUT",
            "/orders/LAB-100/results/serum-creatinine",
            Some(json!({
                "values": { "Serum Creatinine": "high" },
                "operator": technician()
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&app, "GET", "/orders/LAB-999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

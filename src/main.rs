/// Log Classification Service
///
/// Accepts a CSV of log records over HTTP, labels every row with the
/// hybrid rule/embedding/LLM pipeline, and returns the annotated CSV.
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use log_classifier::config::Config;
use log_classifier::dispatcher::{Dispatcher, RoutingPolicy};
use log_classifier::embedding_classifier::EmbeddingClassifier;
use log_classifier::ingest::{IngestError, IngestService};
use log_classifier::llm_classifier::LlmClassifier;
use log_classifier::rule_classifier::RuleClassifier;

const OUTPUT_FILENAME: &str = "classified_logs.csv";

#[derive(Debug, Serialize)]
struct ErrorResponse {
    detail: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    labels_loaded: usize,
}

// Application state shared across handlers
struct AppState {
    ingest: IngestService,
    label_count: usize,
}

/// Middleware to log incoming requests
async fn log_request_middleware(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();

    info!("Incoming request: {} {}", method, uri);
    let response = next.run(req).await;
    info!("Response: {} {} -> {}", method, uri, response.status());

    response
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (fails silently if not found)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt().with_target(false).init();

    // Load configuration from environment variables
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            tracing::error!("Optional environment variables and their defaults:");
            tracing::error!("   - LLM_PROVIDER: groq | openai | ollama (default: groq)");
            tracing::error!("   - LLM_API_KEY: provider credential (absent: LLM stage degrades)");
            tracing::error!("   - LLM_MODEL: model id (default: deepseek-r1-distill-llama-70b)");
            tracing::error!("   - EMBEDDING_MODEL_DIR: sentence-transformers ONNX dir");
            tracing::error!("   - CLASSIFIER_HEAD_PATH: pretrained head artifact (JSON)");
            tracing::error!("   - ROUTING_CONFIG_FILE: source-to-stage routing overrides");
            std::process::exit(1);
        }
    };

    config.log_config();

    // Model loading is a process-level precondition: fail fast, no
    // graceful degradation.
    let embedding = match EmbeddingClassifier::load(
        Path::new(&config.embedding_model_dir),
        Path::new(&config.classifier_head_path),
    ) {
        Ok(classifier) => classifier,
        Err(e) => {
            tracing::error!("Failed to load embedding classifier: {:#}", e);
            std::process::exit(1);
        }
    };
    let label_count = embedding.labels().len();

    let llm = LlmClassifier::from_config(&config);

    let policy = RoutingPolicy::from_env();
    if let Err(e) = policy.validate() {
        tracing::error!("Invalid routing policy: {}", e);
        std::process::exit(1);
    }

    let dispatcher = Arc::new(Dispatcher::new(
        RuleClassifier::new(),
        Arc::new(embedding),
        Arc::new(llm),
        policy,
    ));

    let app_state = Arc::new(AppState {
        ingest: IngestService::new(dispatcher, config.work_dir.clone()),
        label_count,
    });

    // Only the one trusted frontend origin may call this service; within
    // it, all methods and headers are permitted.
    let allowed_origin = config
        .allowed_origin
        .parse::<HeaderValue>()
        .map_err(|e| anyhow::anyhow!("Invalid ALLOWED_ORIGIN '{}': {}", config.allowed_origin, e))?;
    let cors = CorsLayer::new()
        .allow_origin(allowed_origin)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = Router::new()
        .route("/classify/", post(classify_logs))
        .route("/health", get(health))
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(log_request_middleware))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Log Classification Service listening on {}", addr);
    info!("Endpoints:");
    info!("   GET  /health     - Health check");
    info!("   POST /classify/  - Upload a CSV of log records, get it back labeled");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        labels_loaded: state.label_count,
    })
}

/// Upload endpoint: multipart form with one CSV file field.
async fn classify_logs(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    // Find the uploaded file field.
    let (file_name, data) = loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let Some(file_name) = field.file_name().map(str::to_string) else {
                    continue;
                };
                match field.bytes().await {
                    Ok(data) => break (file_name, data),
                    Err(e) => {
                        return error_response(
                            StatusCode::BAD_REQUEST,
                            format!("Failed to read uploaded file: {}", e),
                        );
                    }
                }
            }
            Ok(None) => {
                return error_response(StatusCode::BAD_REQUEST, "No file uploaded.".to_string());
            }
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid multipart request: {}", e),
                );
            }
        }
    };

    match state.ingest.ingest(&file_name, &data).await {
        Ok(output) => {
            let headers = [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", OUTPUT_FILENAME),
                ),
            ];
            (StatusCode::OK, headers, output).into_response()
        }
        Err(e) => {
            if matches!(e, IngestError::Internal(_)) {
                tracing::error!("An error occurred: {}", e);
            }
            error_response(e.status(), e.to_string())
        }
    }
}

fn error_response(status: StatusCode, detail: String) -> Response {
    (status, Json(ErrorResponse { detail })).into_response()
}

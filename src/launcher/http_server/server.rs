use crate::isolation::LaunchError;
use crate::launcher::facade::{
    LaunchPatternError, LaunchPatternRequest, LauncherFacade, ProcessFilter,
};
use crate::launcher::http_server::config::ServerConfig;
use crate::launcher::http_server::StatusServerError;
use crate::supervisor::error::UpdateError;
use crate::supervisor::update::ProcessId;
use actix_web::dev::ServerHandle;
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpResponse, HttpServer};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Builds, binds and runs the client-facing HTTP server.
///
/// The server handle is sent back through `handle_tx` so the runner can stop
/// the server once its stop signal arrives; startup success or a bind
/// failure is reported through `startup_tx`.
pub async fn run_server(
    config: ServerConfig,
    facade: Arc<LauncherFacade>,
    handle_tx: std::sync::mpsc::Sender<ServerHandle>,
    startup_tx: std::sync::mpsc::Sender<Result<(), String>>,
) -> Result<(), StatusServerError> {
    info!("starting HTTP server at http://{}:{}", config.host, config.port);

    let facade_data = web::Data::new(facade);
    let server = match HttpServer::new(move || {
        App::new()
            .app_data(facade_data.clone())
            .route("/v1/processes", web::post().to(launch_pattern))
            .route("/v1/processes", web::get().to(list_processes))
            .route("/v1/processes/{id}", web::delete().to(terminate_pattern))
            .route("/v1/health", web::get().to(health))
            .route("/status", web::get().to(status))
    })
    .workers(config.workers)
    .bind((config.host.clone(), config.port))
    {
        Ok(server) => server,
        Err(err) => {
            let _ = startup_tx.send(Err(err.to_string()));
            return Err(StatusServerError::BindError(err.to_string()));
        }
    };

    let server = server.run();
    let _ = handle_tx.send(server.handle());
    let _ = startup_tx.send(Ok(()));

    server
        .await
        .map_err(|err| StatusServerError::BindError(err.to_string()))
}

async fn launch_pattern(
    facade: web::Data<Arc<LauncherFacade>>,
    request: web::Json<LaunchPatternRequest>,
) -> HttpResponse {
    let facade = Arc::clone(&facade);
    let request = request.into_inner();
    // The launch call blocks until the process is ready (or times out);
    // keep it off the async workers.
    let result = web::block(move || facade.launch_pattern(request)).await;
    match result {
        Ok(Ok(launched)) => HttpResponse::Ok().json(launched),
        Ok(Err(err)) => launch_error_response(err),
        Err(_) => HttpResponse::InternalServerError().json(error_body("launch task failed")),
    }
}

#[derive(Debug, Deserialize)]
struct TerminateQuery {
    #[serde(default = "default_grace_seconds")]
    grace_seconds: u64,
}

fn default_grace_seconds() -> u64 {
    30
}

async fn terminate_pattern(
    facade: web::Data<Arc<LauncherFacade>>,
    path: web::Path<String>,
    query: web::Query<TerminateQuery>,
) -> HttpResponse {
    let id = match ProcessId::new(&path.into_inner()) {
        Ok(id) => id,
        Err(err) => return HttpResponse::BadRequest().json(error_body(&err.to_string())),
    };
    let grace = Duration::from_secs(query.grace_seconds);

    let facade = Arc::clone(&facade);
    let result = web::block(move || facade.terminate_pattern(&id, grace)).await;
    match result {
        Ok(Ok(())) => HttpResponse::Ok().json(json!({})),
        Ok(Err(err)) => update_error_response(err),
        Err(_) => HttpResponse::InternalServerError().json(error_body("terminate task failed")),
    }
}

async fn list_processes(
    facade: web::Data<Arc<LauncherFacade>>,
    filter: web::Query<ProcessFilter>,
) -> HttpResponse {
    HttpResponse::Ok().json(facade.list_processes(&filter))
}

#[derive(Debug, Deserialize)]
struct HealthQuery {
    #[serde(default)]
    include_processes: bool,
}

async fn health(
    facade: web::Data<Arc<LauncherFacade>>,
    query: web::Query<HealthQuery>,
) -> HttpResponse {
    HttpResponse::Ok().json(facade.health(query.include_processes))
}

async fn status(facade: web::Data<Arc<LauncherFacade>>) -> HttpResponse {
    HttpResponse::Ok().json(facade.status())
}

fn launch_error_response(err: LaunchPatternError) -> HttpResponse {
    match &err {
        LaunchPatternError::EmptyPattern => {
            HttpResponse::BadRequest().json(error_body(&err.to_string()))
        }
        LaunchPatternError::Launch(launch) => match launch {
            LaunchError::Key(_) => HttpResponse::BadRequest().json(error_body(&err.to_string())),
            // Transient: the worker keeps converging, the caller may retry.
            LaunchError::Timeout { .. } => {
                HttpResponse::GatewayTimeout().json(error_body(&err.to_string()))
            }
            LaunchError::Supervisor(supervisor) => update_error_response_ref(supervisor, &err),
        },
    }
}

fn update_error_response(err: UpdateError) -> HttpResponse {
    let message = err.to_string();
    HttpResponse::build(update_error_status(&err)).json(error_body(&message))
}

fn update_error_response_ref(err: &UpdateError, source: &dyn std::fmt::Display) -> HttpResponse {
    HttpResponse::build(update_error_status(err)).json(error_body(&source.to_string()))
}

fn update_error_status(err: &UpdateError) -> StatusCode {
    match err {
        UpdateError::NotFound(_) => StatusCode::NOT_FOUND,
        UpdateError::Busy(_, _) => StatusCode::TOO_MANY_REQUESTS,
        UpdateError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_body(message: &str) -> serde_json::Value {
    json!({ "error": message })
}

// Local preview server for the rendered map, with embedded frontend.

use actix_cors::Cors;
use actix_files as fs;
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::job::{MapJob, MapRun};
use crate::models::{MapError, Result};
use crate::pipeline::{self, SubsetSummary};
use crate::report;

// Embed static files at compile time
const INDEX_HTML: &str = include_str!("../static/preview.html");

/// A finished run plus its encoded PNG, swapped wholesale on refresh.
pub struct Snapshot {
    pub run: MapRun,
    pub png: Vec<u8>,
}

impl Snapshot {
    pub fn new(run: MapRun) -> Result<Self> {
        let png = run.map.to_png()?;
        Ok(Snapshot { run, png })
    }
}

#[derive(Clone)]
struct AppState {
    job: Arc<MapJob>,
    snapshot: Arc<Mutex<Snapshot>>,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: report::current_timestamp(),
        }
    }

    fn error(message: String) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            timestamp: report::current_timestamp(),
        }
    }
}

fn lock_failed(what: &str, e: impl std::fmt::Display) -> HttpResponse {
    eprintln!("❌ Failed to lock snapshot: {}", e);
    HttpResponse::InternalServerError().json(ApiResponse::<String>::error(format!("Failed to retrieve {}", what)))
}

// ============================================================================
// Frontend Routes
// ============================================================================

async fn serve_index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

async fn serve_png(state: web::Data<AppState>) -> HttpResponse {
    match state.snapshot.lock() {
        Ok(snapshot) => HttpResponse::Ok()
            .content_type("image/png")
            .body(snapshot.png.clone()),
        Err(e) => lock_failed("map", e),
    }
}

async fn serve_svg(state: web::Data<AppState>) -> HttpResponse {
    match state.snapshot.lock() {
        Ok(snapshot) => HttpResponse::Ok()
            .content_type("image/svg+xml")
            .body(snapshot.run.map.to_svg()),
        Err(e) => lock_failed("map", e),
    }
}

// ============================================================================
// API Endpoints
// ============================================================================

async fn get_subsets(state: web::Data<AppState>) -> HttpResponse {
    match state.snapshot.lock() {
        Ok(snapshot) => {
            let summaries: Vec<SubsetSummary> = snapshot.run.subsets.iter().map(|s| s.summary()).collect();
            println!("📊 Subsets requested: {} subsets", summaries.len());
            HttpResponse::Ok().json(ApiResponse::success(summaries))
        }
        Err(e) => lock_failed("subsets", e),
    }
}

async fn get_subset_lines(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let name = path.into_inner();

    match state.snapshot.lock() {
        Ok(snapshot) => match pipeline::find_subset(&snapshot.run.subsets, &name) {
            Some(subset) => {
                println!("🚇 Lines requested for '{}': {} features", name, subset.lines.len());
                HttpResponse::Ok().json(ApiResponse::success(&subset.lines))
            }
            None => {
                println!("⚠️  Subset not found: {}", name);
                HttpResponse::NotFound().json(ApiResponse::<String>::error(format!("Subset '{}' not found", name)))
            }
        },
        Err(e) => lock_failed("lines", e),
    }
}

async fn get_subset_stations(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let name = path.into_inner();

    match state.snapshot.lock() {
        Ok(snapshot) => match pipeline::find_subset(&snapshot.run.subsets, &name) {
            Some(subset) => match &subset.stations {
                Some(stations) => {
                    println!("🚉 Stations requested for '{}': {} features", name, stations.len());
                    HttpResponse::Ok().json(ApiResponse::success(stations))
                }
                None => HttpResponse::NotFound().json(ApiResponse::<String>::error(format!(
                    "Subset '{}' has no station join",
                    name
                ))),
            },
            None => {
                println!("⚠️  Subset not found: {}", name);
                HttpResponse::NotFound().json(ApiResponse::<String>::error(format!("Subset '{}' not found", name)))
            }
        },
        Err(e) => lock_failed("stations", e),
    }
}

async fn get_colors(state: web::Data<AppState>) -> HttpResponse {
    match state.snapshot.lock() {
        Ok(snapshot) => HttpResponse::Ok().json(ApiResponse::success(&snapshot.run.map.assignments)),
        Err(e) => lock_failed("colors", e),
    }
}

async fn get_stats(state: web::Data<AppState>) -> HttpResponse {
    match state.snapshot.lock() {
        Ok(snapshot) => {
            println!("📊 Stats requested");
            HttpResponse::Ok().json(ApiResponse::success(snapshot.run.summary()))
        }
        Err(e) => lock_failed("stats", e),
    }
}

async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let rendered = state
        .snapshot
        .lock()
        .map(|snapshot| snapshot.run.rendered_subset.clone())
        .unwrap_or_default();

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "transit-map preview",
        "version": env!("CARGO_PKG_VERSION"),
        "rendered_subset": rendered,
        "timestamp": report::current_timestamp(),
    }))
}

async fn force_refresh(state: web::Data<AppState>) -> HttpResponse {
    println!("🔄 Manual refresh requested...");

    let job = state.job.clone();
    match tokio::task::spawn_blocking(move || job.run().and_then(Snapshot::new)).await {
        Ok(Ok(fresh)) => match state.snapshot.lock() {
            Ok(mut snapshot) => {
                *snapshot = fresh;
                println!("✓ Manual refresh completed successfully");
                HttpResponse::Ok().json(ApiResponse::success("Map re-rendered successfully"))
            }
            Err(e) => lock_failed("map", e),
        },
        Ok(Err(e)) => {
            eprintln!("⚠️  Manual refresh failed: {}", e);
            HttpResponse::InternalServerError().json(ApiResponse::<String>::error(format!("Refresh failed: {}", e)))
        }
        Err(e) => {
            eprintln!("❌ Manual refresh task panicked: {}", e);
            HttpResponse::InternalServerError().json(ApiResponse::<String>::error("Refresh task panicked".to_string()))
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

pub async fn run_server(
    job: MapJob,
    snapshot: Snapshot,
    port: u16,
    export_dir: Option<PathBuf>,
) -> std::io::Result<()> {
    let state = AppState {
        job: Arc::new(job),
        snapshot: Arc::new(Mutex::new(snapshot)),
    };

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║   🗺️  Transit Map Preview                                   ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");
    println!("🌐 Server running on: http://0.0.0.0:{}", port);
    println!("📱 Map available at: http://localhost:{}\n", port);

    println!("📍 Available Routes:");
    println!("┌─────────────────────────────────────────────────────────────┐");
    println!("│   GET  /                           - Preview page           │");
    println!("│   GET  /map.png | /map.svg         - Rendered map           │");
    println!("│   GET  /api/subsets                - Subset summaries       │");
    println!("│   GET  /api/subsets/:name/lines    - Subset line features   │");
    println!("│   GET  /api/subsets/:name/stations - Subset stations        │");
    println!("│   GET  /api/colors                 - Line color assignments │");
    println!("│   GET  /api/stats                  - Run statistics         │");
    println!("│   POST /api/refresh                - Reload and re-render   │");
    println!("│   GET  /health                     - Health check           │");
    if export_dir.is_some() {
        println!("│   GET  /exports                    - CSV exports            │");
    }
    println!("└─────────────────────────────────────────────────────────────┘\n");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        let mut app = App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .route("/", web::get().to(serve_index))
            .route("/map.png", web::get().to(serve_png))
            .route("/map.svg", web::get().to(serve_svg))
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/api")
                    .route("/subsets", web::get().to(get_subsets))
                    .route("/subsets/{name}/lines", web::get().to(get_subset_lines))
                    .route("/subsets/{name}/stations", web::get().to(get_subset_stations))
                    .route("/colors", web::get().to(get_colors))
                    .route("/stats", web::get().to(get_stats))
                    .route("/refresh", web::post().to(force_refresh)),
            );

        if let Some(dir) = &export_dir {
            app = app.service(fs::Files::new("/exports", dir.clone()).show_files_listing());
        }
        app
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

/// Blocking entry point used by the command line.
pub fn serve(job: MapJob, run: MapRun, port: u16, export_dir: Option<PathBuf>) -> Result<()> {
    let snapshot = Snapshot::new(run)?;
    actix_web::rt::System::new()
        .block_on(run_server(job, snapshot, port, export_dir))
        .map_err(|e| MapError::NetworkError(format!("Preview server failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feature, FeatureKind, FeatureTable};
    use crate::render::render_map;
    use crate::rules::MapConfig;
    use crate::loader::DatasetSource;
    use actix_web::test;
    use geo::{Geometry, LineString, MultiLineString};

    fn state() -> AppState {
        let config = MapConfig::embedded().unwrap();
        let lines = FeatureTable::with_features(
            FeatureKind::Lines,
            vec!["NAME".into(), "TECHNOLOGY".into(), "STATUS".into()],
            vec![
                Feature::new(Some(Geometry::MultiLineString(MultiLineString::new(vec![LineString::from(
                    vec![(0.0, 0.0), (1.0, 1.0)],
                )]))))
                .with_attribute("NAME", "Line 1: Yonge-University")
                .with_attribute("TECHNOLOGY", "Subway")
                .with_attribute("STATUS", "Existing"),
            ],
        );
        let stations = FeatureTable::new(FeatureKind::Stations, vec!["NAME".into()]);
        let subsets = pipeline::run_pipeline(&config, &lines, &stations).unwrap();
        let core = pipeline::find_subset(&subsets, "core").unwrap();
        let map = render_map(&core.lines, core.stations.as_ref(), &config.render).unwrap();
        let run = MapRun {
            rendered_subset: "core".into(),
            subsets,
            map,
            generated_at: 0,
        };
        let job = MapJob::new(
            DatasetSource::parse("lines.shp"),
            DatasetSource::parse("stations.shp"),
            config,
        );
        AppState {
            job: Arc::new(job),
            snapshot: Arc::new(Mutex::new(Snapshot::new(run).unwrap())),
        }
    }

    #[actix_web::test]
    async fn subsets_and_lines_endpoints() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .route("/api/subsets", web::get().to(get_subsets))
                .route("/api/subsets/{name}/lines", web::get().to(get_subset_lines))
                .route("/map.png", web::get().to(serve_png)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/subsets").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"].as_array().unwrap().len(), 3);

        let req = test::TestRequest::get().uri("/api/subsets/core/lines").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["features"].as_array().unwrap().len(), 1);

        let req = test::TestRequest::get().uri("/api/subsets/express/lines").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/map.png").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}

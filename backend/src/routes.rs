use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use chrono::{SecondsFormat, Utc};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use shared::{ProcessAck, ProcessRequest, UploadedFile};
use std::path::PathBuf;

use crate::pipeline::{self, RunContext, config::PipelineConfig};
use crate::storage::disk::{DiskStorage, MAX_UPLOAD_BYTES};
use crate::store::{FileState, ResultStore, StatusSnapshot};

pub fn configure_routes(cfg: &mut web::ServiceConfig, images_dir: PathBuf) {
    cfg.service(web::resource("/api/health").route(web::get().to(health)))
        .service(web::resource("/api/upload").route(web::post().to(upload)))
        .service(web::resource("/api/process").route(web::post().to(process)))
        .service(
            web::resource("/api/processing-status").route(web::get().to(processing_status)),
        )
        .service(web::resource("/api/results").route(web::get().to(results)))
        .service(Files::new("/api/images", images_dir));
}

fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "up",
        "message": "Server is running",
        "timestamp": iso_now(),
    }))
}

/// Accepts one multipart `file` field, filters non-CSV uploads before any
/// bytes reach the staging directory, and records the initial `uploaded`
/// status under the original filename.
async fn upload(
    store: web::Data<ResultStore>,
    storage: web::Data<DiskStorage>,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    while let Ok(Some(mut field)) = payload.try_next().await {
        let Some(disposition) = field.content_disposition() else {
            continue;
        };
        if disposition.get_name() != Some("file") {
            continue;
        }
        let originalname = disposition
            .get_filename()
            .unwrap_or("upload.csv")
            .to_string();
        let content_type = field.content_type().map(|mime| mime.essence_str().to_string());

        if !DiskStorage::accepts(&originalname, content_type.as_deref()) {
            return Ok(HttpResponse::BadRequest()
                .json(json!({ "error": "Only CSV files are allowed" })));
        }

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if data.len() + chunk.len() > MAX_UPLOAD_BYTES {
                return Ok(HttpResponse::BadRequest()
                    .json(json!({ "error": "File too large. Maximum allowed size is 30MB." })));
            }
            data.extend_from_slice(&chunk);
        }

        let filename = DiskStorage::generated_name("file", &originalname);
        let path = match storage.persist(&filename, &data) {
            Ok(path) => path,
            Err(err) => {
                error!("Upload failed: {err}");
                return Ok(
                    HttpResponse::InternalServerError().json(json!({ "error": err.to_string() }))
                );
            }
        };

        let file_info = UploadedFile {
            filename,
            originalname: originalname.clone(),
            path: path.display().to_string(),
            size: data.len() as u64,
        };
        store.mark_uploaded(&originalname, &file_info.path);
        info!("File uploaded: {} ({} bytes)", file_info.originalname, file_info.size);
        return Ok(HttpResponse::Ok().json(file_info));
    }

    Ok(HttpResponse::BadRequest().json(json!({ "error": "No file uploaded" })))
}

/// Validates the request, acknowledges with 202, and hands the run to a
/// spawned task the caller never awaits. Completion is observable only
/// through the polling endpoints.
async fn process(
    store: web::Data<ResultStore>,
    config: web::Data<PipelineConfig>,
    body: web::Json<ProcessRequest>,
) -> HttpResponse {
    let Some(file_path) = body.file_path.clone().filter(|path| !path.is_empty()) else {
        return HttpResponse::BadRequest().json(json!({ "error": "File path is required" }));
    };
    let path = PathBuf::from(&file_path);
    if !path.exists() {
        return HttpResponse::NotFound().json(json!({ "error": "File does not exist" }));
    }
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_path.clone());

    // Marked before the size check, so an oversized file leaves a terminal
    // error record rather than no record at all.
    store.mark_processing(&filename);

    let file_size_mb = match std::fs::metadata(&path) {
        Ok(metadata) => metadata.len() as f64 / (1024.0 * 1024.0),
        Err(err) => {
            error!("Failed to stat {}: {err}", path.display());
            return HttpResponse::InternalServerError().json(json!({ "error": err.to_string() }));
        }
    };
    info!("File size: {file_size_mb:.2} MB");

    if file_size_mb > pipeline::MAX_PROCESS_SIZE_MB {
        let message = "File too large. Maximum allowed size is 100MB.";
        store.mark_error(&filename, message);
        return HttpResponse::BadRequest().json(json!({
            "error": message,
            "fileSize": format!("{file_size_mb:.2} MB"),
        }));
    }

    info!("Starting processing for file: {file_path}");

    let run_id_ms = Utc::now().timestamp_millis();
    let image_folder = config.images_dir.join(run_id_ms.to_string());
    if let Err(err) = std::fs::create_dir_all(&image_folder) {
        error!("Failed to create image folder {}: {err}", image_folder.display());
        return HttpResponse::InternalServerError().json(json!({ "error": err.to_string() }));
    }

    let timeout = pipeline::timeout_budget(file_size_mb);
    info!(
        "Setting process timeout to {} minutes",
        pipeline::runner::timeout_minutes(timeout)
    );

    let ctx = RunContext {
        filename,
        file_path: path,
        run_id_ms,
        image_folder,
        file_size_mb,
        timeout,
    };
    let store = store.get_ref().clone();
    let config = config.get_ref().clone();
    actix_web::rt::spawn(async move {
        pipeline::run(store, config, ctx).await;
    });

    HttpResponse::Accepted().json(ProcessAck {
        message: "Processing started".to_string(),
        status: "processing".to_string(),
        timestamp: iso_now(),
        file_path,
    })
}

#[derive(Deserialize)]
struct FilenameQuery {
    filename: Option<String>,
}

async fn processing_status(
    store: web::Data<ResultStore>,
    query: web::Query<FilenameQuery>,
) -> HttpResponse {
    let Some(filename) = query.filename.as_deref().filter(|name| !name.is_empty()) else {
        return HttpResponse::BadRequest()
            .json(json!({ "error": "Filename parameter is required" }));
    };
    match store.poll(filename) {
        StatusSnapshot::Completed { error } => HttpResponse::Ok().json(json!({
            "status": "completed",
            "error": error,
        })),
        StatusSnapshot::InFlight(FileState::Error) => {
            let error = store.status_of(filename).and_then(|entry| entry.error);
            HttpResponse::Ok().json(json!({
                "status": "error",
                "error": error,
            }))
        }
        StatusSnapshot::InFlight(state) => HttpResponse::Ok().json(json!({
            "status": state.as_str(),
            "message": "File is still being processed",
        })),
        StatusSnapshot::Unknown => HttpResponse::NotFound().json(json!({
            "status": "unknown",
            "error": "No processing information found for this file",
        })),
    }
}

/// The filename parameter is required but never disambiguates: there is one
/// result slot and this returns whatever run finished last.
async fn results(store: web::Data<ResultStore>, query: web::Query<FilenameQuery>) -> HttpResponse {
    if query
        .filename
        .as_deref()
        .filter(|name| !name.is_empty())
        .is_none()
    {
        return HttpResponse::BadRequest()
            .json(json!({ "error": "Filename parameter is required" }));
    }
    match store.latest() {
        Some(result) => HttpResponse::Ok().json(result),
        None => HttpResponse::NotFound().json(json!({
            "error": "No results found",
            "status": "error",
        })),
    }
}

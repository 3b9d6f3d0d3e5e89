//! Read-only HTTP view of the capture card.
//!
//! Lists session directories and the frames inside them, and serves the
//! frames themselves. Only names the capture controller produces are served:
//! six-digit session directories and `NNNNNN.JPG` frames. A frame still being
//! written is named `NNNNNN.JPG.part` and therefore never listed or served.

#[macro_use]
extern crate rocket;

use chrono::{DateTime, Local};
use log::warn;
use rocket::fs::NamedFile;
use rocket::http::{Method, Status};
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use rocket_cors::{AllowedHeaders, AllowedOrigins};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "0.0.0.0".to_string(),
            port: 80,
        }
    }
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("invalid CORS setup: {0}")]
    Cors(#[from] rocket_cors::Error),
    #[error("server failed: {0}")]
    Launch(#[source] Box<rocket::Error>),
}

#[derive(Default, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionListing {
    pub name: String,
    pub frames: usize,
    pub last_modified: Option<String>,
}

#[derive(Default, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameListing {
    pub name: String,
    pub bytes: u64,
    pub modified: Option<String>,
}

pub fn is_session_name(name: &str) -> bool {
    name.len() == 6 && name.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_frame_name(name: &str) -> bool {
    match name.strip_suffix(".JPG") {
        Some(stem) => is_session_name(stem),
        None => false,
    }
}

fn format_time(time: SystemTime) -> String {
    let date: DateTime<Local> = time.into();
    date.format("%d-%m-%Y %X").to_string()
}

/// Frames of one session, oldest first.
pub fn list_frames(base_path: &Path, session: &str) -> io::Result<Vec<FrameListing>> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(base_path.join(session))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let metadata = entry.metadata()?;
        if !metadata.is_file() || !is_frame_name(&name) {
            continue;
        }
        frames.push(FrameListing {
            name,
            bytes: metadata.len(),
            modified: metadata.modified().ok().map(format_time),
        });
    }
    frames.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(frames)
}

/// Session directories on the card, oldest first.
pub fn list_sessions(base_path: &Path) -> io::Result<Vec<SessionListing>> {
    let mut sessions = Vec::new();
    for entry in fs::read_dir(base_path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !entry.file_type()?.is_dir() || !is_session_name(&name) {
            continue;
        }
        let frames = list_frames(base_path, &name)?;
        sessions.push(SessionListing {
            frames: frames.len(),
            last_modified: frames.last().and_then(|frame| frame.modified.clone()),
            name,
        });
    }
    sessions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(sessions)
}

struct BrowseRoot(PathBuf);

fn internal_error(err: io::Error) -> Status {
    warn!("Listing failed: {}", err);
    Status::InternalServerError
}

#[get("/sessions")]
fn sessions(root: &State<BrowseRoot>) -> Result<Json<Vec<SessionListing>>, Status> {
    list_sessions(&root.0).map(Json).map_err(internal_error)
}

#[get("/sessions/<session>")]
fn session_frames(
    root: &State<BrowseRoot>,
    session: &str,
) -> Result<Json<Vec<FrameListing>>, Status> {
    if !is_session_name(session) {
        return Err(Status::NotFound);
    }
    match list_frames(&root.0, session) {
        Ok(frames) => Ok(Json(frames)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Status::NotFound),
        Err(err) => Err(internal_error(err)),
    }
}

#[get("/files/<session>/<frame>")]
async fn frame_file(root: &State<BrowseRoot>, session: &str, frame: &str) -> Option<NamedFile> {
    if !is_session_name(session) || !is_frame_name(frame) {
        return None;
    }
    NamedFile::open(root.0.join(session).join(frame)).await.ok()
}

/// The server, unlaunched. `start` binds it with the configured address.
pub fn rocket(base_path: &Path) -> Rocket<Build> {
    rocket::build()
        .manage(BrowseRoot(base_path.to_path_buf()))
        .mount("/", routes![sessions, session_frames, frame_file])
}

/// Serve `base_path` until the server stops. Blocks the calling thread.
pub fn start(base_path: &Path, config: &BrowserConfig) -> Result<(), BrowserError> {
    let cors = rocket_cors::CorsOptions {
        allowed_origins: AllowedOrigins::all(),
        allowed_methods: vec![Method::Get].into_iter().map(From::from).collect(),
        allowed_headers: AllowedHeaders::all(),
        allow_credentials: true,
        ..Default::default()
    }
    .to_cors()?;
    let figment = rocket::Config::figment()
        .merge(("address", config.address.as_str()))
        .merge(("port", config.port));
    let server = rocket(base_path).configure(figment).attach(cors);
    rocket::execute(server.launch())
        .map(|_| ())
        .map_err(|err| BrowserError::Launch(Box::new(err)))
}

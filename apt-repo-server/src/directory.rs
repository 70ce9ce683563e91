// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP request handling: file/metadata serving, HTML directory listings, Basic-auth gating.

One `axum` fallback route matches every path. Basic auth is an ordinary function called at the
top of [DirectoryService::handle], not a tower layer, because the private-prefix decision needs
the same resolved `full` path that file serving computes — there is no separate middleware stage
that would know the path ahead of routing.
*/

use crate::cache::RepositoryCache;
use crate::config::AppConfig;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use handlebars::Handlebars;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tower_http::trace::TraceLayer;
use tracing::warn;

const DEFAULT_LISTING_TEMPLATE: &str = include_str!("templates/directory.hbs");

pub struct DirectoryService {
    config: Arc<AppConfig>,
    cache: Arc<dyn RepositoryCache>,
}

impl DirectoryService {
    pub fn new(config: Arc<AppConfig>, cache: Arc<dyn RepositoryCache>) -> Arc<Self> {
        Arc::new(Self { config, cache })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .fallback(handle_request)
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    async fn handle(&self, uri: &Uri, headers: &HeaderMap) -> Response {
        let decoded = percent_decode_str(uri.path()).decode_utf8_lossy().to_string();
        let rel = decoded.trim_start_matches('/');
        let full = self.config.repo.join(rel);

        if !full.starts_with(&self.config.repo) {
            return not_found();
        }

        if self.is_private(&full) && !self.basic_auth_ok(headers) {
            return unauthorized();
        }

        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => self.serve_file(rel, &full).await,
            Ok(meta) if meta.is_dir() => self.render_listing(rel, &full, uri.query()).await,
            _ => not_found(),
        }
    }

    fn is_private(&self, full: &Path) -> bool {
        self.config
            .auth
            .private_dirs
            .iter()
            .any(|prefix| full.starts_with(prefix))
    }

    fn basic_auth_ok(&self, headers: &HeaderMap) -> bool {
        let (Some(user), Some(password)) =
            (&self.config.auth.basic_user, &self.config.auth.basic_password)
        else {
            return false;
        };

        let Some(header_value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())
        else {
            return false;
        };
        let Some(encoded) = header_value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded_bytes) = BASE64.decode(encoded) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded_bytes) else {
            return false;
        };
        let Some((candidate_user, candidate_password)) = decoded.split_once(':') else {
            return false;
        };

        candidate_user == user && candidate_password == password
    }

    async fn serve_file(&self, rel: &str, full: &Path) -> Response {
        let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();

        if segments.first() == Some(&"dists") {
            if let Some(distribution) = segments.get(1) {
                return match self.cache.load(distribution, full).await {
                    Some(bytes) => {
                        let mime = mime_guess::from_path(full).first_or_octet_stream();
                        let mut builder =
                            Response::builder().status(StatusCode::OK).header(
                                header::CONTENT_TYPE,
                                mime.essence_str(),
                            );
                        if full.extension().and_then(|e| e.to_str()) == Some("gz") {
                            builder = builder.header(header::CONTENT_ENCODING, "gzip");
                        }
                        builder.body(Body::from(bytes)).expect("valid response")
                    }
                    None => not_found(),
                };
            }
        }

        match tokio::fs::read(full).await {
            Ok(bytes) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from(bytes))
                .expect("valid response"),
            Err(e) => {
                warn!(path = %full.display(), error = %e, "failed to read file from disk");
                not_found()
            }
        }
    }

    async fn render_listing(&self, rel: &str, full: &Path, query: Option<&str>) -> Response {
        let (sort, desc) = parse_listing_query(query);

        let mut entries = match list_entries(full).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %full.display(), error = %e, "failed to read directory");
                return not_found();
            }
        };
        sort_entries(&mut entries, sort, desc);

        if !rel.is_empty() {
            entries.insert(
                0,
                ListingEntry {
                    name: "..".to_string(),
                    href: parent_href(rel),
                    is_dir: true,
                    date: String::new(),
                    size_display: "-".to_string(),
                    size_bytes: 0,
                },
            );
        }

        let template = match &self.config.directory_template_path {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read directory template, using default");
                    DEFAULT_LISTING_TEMPLATE.to_string()
                }
            },
            None => DEFAULT_LISTING_TEMPLATE.to_string(),
        };

        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        if let Err(e) = handlebars.register_template_string("listing", &template) {
            warn!(error = %e, "failed to register directory listing template");
            return internal_error();
        }

        let context = ListingContext {
            path: format!("/{rel}"),
            entries,
        };
        match handlebars.render("listing", &context) {
            Ok(html) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
                .body(Body::from(html))
                .expect("valid response"),
            Err(e) => {
                warn!(error = %e, "failed to render directory listing");
                internal_error()
            }
        }
    }
}

#[derive(Serialize)]
struct ListingContext {
    path: String,
    entries: Vec<ListingEntry>,
}

#[derive(Serialize, Clone)]
struct ListingEntry {
    name: String,
    href: String,
    is_dir: bool,
    date: String,
    #[serde(rename = "size")]
    size_display: String,
    #[serde(skip)]
    size_bytes: u64,
}

async fn list_entries(dir: &Path) -> std::io::Result<Vec<ListingEntry>> {
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = read_dir.next_entry().await? {
        let meta = entry.metadata().await?;
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = meta.is_dir();
        let size_bytes = if is_dir { 0 } else { meta.len() };
        let size_display = if is_dir {
            "-".to_string()
        } else {
            size_bytes.to_string()
        };
        let date = format_modified(meta.modified().ok());
        let href = if is_dir {
            format!("{name}/")
        } else {
            name.clone()
        };

        entries.push(ListingEntry {
            name,
            href,
            is_dir,
            date,
            size_display,
            size_bytes,
        });
    }

    Ok(entries)
}

fn format_modified(modified: Option<SystemTime>) -> String {
    modified
        .map(|t| chrono::DateTime::<chrono::Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn parent_href(rel: &str) -> String {
    match rel.trim_end_matches('/').rsplit_once('/') {
        Some((parent, _)) => format!("/{parent}/"),
        None => "/".to_string(),
    }
}

fn parse_listing_query(query: Option<&str>) -> (&'static str, bool) {
    let mut sort = "name";
    let mut desc = false;
    if let Some(query) = query {
        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                "sort" => {
                    sort = match value {
                        "date" => "date",
                        "size" => "size",
                        _ => "name",
                    }
                }
                "desc" => desc = value == "1",
                _ => {}
            }
        }
    }
    (sort, desc)
}

/// Sort by `(is_file, <primary field selected by sort>, name_lower)`: directories precede files,
/// `desc` flips the whole comparison.
fn sort_entries(entries: &mut [ListingEntry], sort: &str, desc: bool) {
    entries.sort_by(|a, b| {
        let key_a = (!a.is_dir, sort_primary(a, sort), a.name.to_lowercase());
        let key_b = (!b.is_dir, sort_primary(b, sort), b.name.to_lowercase());
        let ordering = key_a.cmp(&key_b);
        if desc {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

fn sort_primary(entry: &ListingEntry, sort: &str) -> String {
    match sort {
        "date" => entry.date.clone(),
        "size" => format!("{:020}", entry.size_bytes),
        _ => entry.name.to_lowercase(),
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}

fn unauthorized() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, "Basic realm=\"Private Area\"")
        .body(Body::from("Unauthorized"))
        .expect("valid response")
}

async fn handle_request(
    State(service): State<Arc<DirectoryService>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    service.handle(&uri, &headers).await
}

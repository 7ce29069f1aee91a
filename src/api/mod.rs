//! HTTP control surface.
//!
//! A small HTTP/1.1 server over `std::net`. Control routes are served inline
//! on the accept thread. `/video_feed` runs the frame pipeline on its own
//! thread and streams until the client disconnects; only one feed may be
//! active at a time.

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::bom::PartCatalog;
use crate::counter::{lock_counter, SharedCounter};
use crate::ingest::ReplayConfig;
use crate::mjpeg;
use crate::pacer::{self, SharedPacer};
use crate::pipeline::Pipeline;
use crate::report::CrossingLog;

const MAX_HEADER_BYTES: usize = 8192;
const UPLOAD_READ_TIMEOUT: Duration = Duration::from_secs(30);
const FEED_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub upload_path: PathBuf,
    pub max_upload_bytes: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            upload_path: PathBuf::from("/tmp/part_counter_upload.mp4"),
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Shared state the routes operate on.
#[derive(Clone)]
pub struct ApiContext {
    pub counter: SharedCounter,
    pub crossings: CrossingLog,
    pub catalog: PartCatalog,
    pub pacer: SharedPacer,
    pub pipeline: Arc<Pipeline>,
    /// Template for uploaded replays; `path` is replaced by the upload path.
    pub replay: ReplayConfig,
    /// Notified when `/shutdown` is requested.
    pub shutdown_tx: Option<Sender<()>>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    ctx: ApiContext,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, ctx: ApiContext) -> Self {
        Self { cfg, ctx }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let server = Server {
            cfg: self.cfg,
            ctx: self.ctx,
            shutdown: shutdown_thread,
            feeds_stop: Arc::new(AtomicBool::new(false)),
            feed_active: Arc::new(AtomicBool::new(false)),
        };
        let join = std::thread::spawn(move || {
            if let Err(err) = server.run(listener) {
                log::error!("api stopped: {}", err);
            }
        });
        log::info!("api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct Server {
    cfg: ApiConfig,
    ctx: ApiContext,
    shutdown: Arc<AtomicBool>,
    /// Stops running `/video_feed` loops; set on shutdown before sources are released.
    feeds_stop: Arc<AtomicBool>,
    feed_active: Arc<AtomicBool>,
}

impl Server {
    fn run(&self, listener: TcpListener) -> Result<()> {
        let mut feeds: Vec<JoinHandle<()>> = Vec::new();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Err(err) = self.handle_connection(stream, &mut feeds) {
                        log::warn!("api request failed: {}", err);
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
            feeds.retain(|feed| !feed.is_finished());
        }
        self.stop_feeds(&mut feeds);
        Ok(())
    }

    fn stop_feeds(&self, feeds: &mut Vec<JoinHandle<()>>) {
        self.feeds_stop.store(true, Ordering::SeqCst);
        for feed in feeds.drain(..) {
            if feed.join().is_err() {
                log::warn!("video feed thread panicked");
            }
        }
    }

    fn handle_connection(
        &self,
        mut stream: TcpStream,
        feeds: &mut Vec<JoinHandle<()>>,
    ) -> Result<()> {
        stream.set_nonblocking(false)?;
        let peer = stream.peer_addr()?;
        let local = stream.local_addr()?;
        if local.ip().is_loopback() && !peer.ip().is_loopback() {
            write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
            return Ok(());
        }

        let request = read_request(&mut stream)?;
        let route = match Route::resolve(&request.method, &request.path) {
            Ok(route) => route,
            Err(status) => {
                let body = if status == 405 {
                    r#"{"error":"method_not_allowed"}"#
                } else {
                    r#"{"error":"not_found"}"#
                };
                write_json_response(&mut stream, status, body)?;
                return Ok(());
            }
        };

        match route {
            Route::Health => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
            Route::Counts => {
                let counts = lock_counter(&self.ctx.counter)?.counts();
                write_json_value(&mut stream, 200, &serde_json::to_value(counts)?)
            }
            Route::ProductionData => {
                let summary = self.ctx.crossings.summary()?;
                write_json_value(&mut stream, 200, &serde_json::to_value(summary)?)
            }
            Route::Source => {
                let stats = pacer::lock_pacer(&self.ctx.pacer)?.stats();
                write_json_value(&mut stream, 200, &serde_json::to_value(stats)?)
            }
            Route::Reset => {
                reset_session(&self.ctx.counter, &self.ctx.crossings)?;
                write_json_value(&mut stream, 200, &json!({ "success": true }))
            }
            Route::ReloadBom => match self.ctx.catalog.reload() {
                Ok(parts) => {
                    write_json_value(&mut stream, 200, &json!({ "success": true, "classes": parts }))
                }
                Err(err) => write_json_value(
                    &mut stream,
                    500,
                    &json!({ "success": false, "error": format!("{:#}", err) }),
                ),
            },
            Route::UploadVideo => {
                let body = match self.receive_upload(&mut stream, &request) {
                    Ok(()) => json!({ "success": true }),
                    Err(err) => {
                        log::warn!("upload rejected: {:#}", err);
                        json!({ "success": false, "error": format!("{:#}", err) })
                    }
                };
                write_json_value(&mut stream, 200, &body)
            }
            Route::Shutdown => {
                self.stop_feeds(feeds);
                pacer::release_shared(&self.ctx.pacer);
                let signalled = match &self.ctx.shutdown_tx {
                    Some(tx) => tx.send(()).is_ok(),
                    None => false,
                };
                let body = if signalled {
                    json!({ "success": true, "message": "Server shutting down..." })
                } else {
                    json!({ "success": false, "error": "Failed to shutdown server" })
                };
                write_json_value(&mut stream, 200, &body)
            }
            Route::VideoFeed => self.start_feed(stream, feeds),
        }
    }

    fn receive_upload(&self, stream: &mut TcpStream, request: &HttpRequest) -> Result<()> {
        let length: u64 = request
            .headers
            .get("content-length")
            .ok_or_else(|| anyhow!("No video file provided"))?
            .parse()
            .map_err(|_| anyhow!("invalid Content-Length"))?;
        if length == 0 {
            return Err(anyhow!("No video file provided"));
        }
        if length > self.cfg.max_upload_bytes {
            return Err(anyhow!(
                "upload of {} bytes exceeds the {} byte limit",
                length,
                self.cfg.max_upload_bytes
            ));
        }

        stream.set_read_timeout(Some(UPLOAD_READ_TIMEOUT))?;
        let staging = staging_path(&self.cfg.upload_path);
        let mut file = std::fs::File::create(&staging)
            .with_context(|| format!("create {}", staging.display()))?;
        let prefix = &request.body_prefix[..request.body_prefix.len().min(length as usize)];
        file.write_all(prefix)?;
        let remaining = length - prefix.len() as u64;
        let copied = std::io::copy(&mut (&mut *stream).take(remaining), &mut file)?;
        if copied != remaining {
            let _ = std::fs::remove_file(&staging);
            return Err(anyhow!(
                "upload truncated: expected {} bytes, got {}",
                length,
                prefix.len() as u64 + copied
            ));
        }
        file.sync_all()?;
        drop(file);
        std::fs::rename(&staging, &self.cfg.upload_path)
            .with_context(|| format!("store upload at {}", self.cfg.upload_path.display()))?;
        log::info!(
            "received {} byte upload at {}",
            length,
            self.cfg.upload_path.display()
        );

        let mut replay = self.ctx.replay.clone();
        replay.path = self.cfg.upload_path.to_string_lossy().into_owned();
        pacer::lock_pacer(&self.ctx.pacer)?.switch_to_replay(replay)
    }

    fn start_feed(&self, mut stream: TcpStream, feeds: &mut Vec<JoinHandle<()>>) -> Result<()> {
        if self
            .feed_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            write_json_response(&mut stream, 409, r#"{"error":"feed_busy"}"#)?;
            return Ok(());
        }
        let guard = FeedGuard(self.feed_active.clone());

        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
            mjpeg::CONTENT_TYPE
        );
        stream.write_all(header.as_bytes())?;
        stream.set_write_timeout(Some(FEED_WRITE_TIMEOUT))?;

        let pipeline = self.ctx.pipeline.clone();
        let stop = self.feeds_stop.clone();
        feeds.push(std::thread::spawn(move || {
            let _guard = guard;
            let emitted = pipeline.run(&stop, |jpeg| {
                stream.write_all(&mjpeg::multipart_chunk(jpeg))?;
                Ok(())
            });
            log::info!("video feed closed after {} frames", emitted);
        }));
        Ok(())
    }
}

/// Clears the active-feed flag when the feed ends.
struct FeedGuard(Arc<AtomicBool>);

impl Drop for FeedGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Health,
    Counts,
    ProductionData,
    Source,
    VideoFeed,
    UploadVideo,
    Reset,
    ReloadBom,
    Shutdown,
}

impl Route {
    /// Maps a request to a route, or to the HTTP status for an unroutable request.
    fn resolve(method: &str, path: &str) -> std::result::Result<Self, u16> {
        let (route, expected) = match path {
            "/health" => (Route::Health, "GET"),
            "/counts" => (Route::Counts, "GET"),
            "/production_data" => (Route::ProductionData, "GET"),
            "/source" => (Route::Source, "GET"),
            "/video_feed" => (Route::VideoFeed, "GET"),
            "/upload_video" => (Route::UploadVideo, "POST"),
            "/reset" => (Route::Reset, "POST"),
            "/bom/reload" => (Route::ReloadBom, "POST"),
            "/shutdown" => (Route::Shutdown, "POST"),
            _ => return Err(404),
        };
        if method == expected {
            Ok(route)
        } else {
            Err(405)
        }
    }
}

/// Zeroes the counts and the production log under one counter lock, so no
/// crossing can land in the log between the two.
fn reset_session(counter: &SharedCounter, crossings: &CrossingLog) -> Result<()> {
    let mut counter = lock_counter(counter)?;
    counter.reset();
    crossings.reset();
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break Some(pos + 4);
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request too large"));
        }
    };
    let header_end = header_end.unwrap_or(data.len());
    let body_prefix = data.split_off(header_end);

    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body_prefix,
    })
}

fn write_json_value(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    /// Body bytes that arrived together with the headers.
    body_prefix: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bom::PartInfo;
    use crate::counter::{self, LineConfig, LineCounter};
    use crate::detect::Detection;
    use crate::geometry::{BoundingBox, FrameDims};

    #[test]
    fn routes_check_method() {
        assert_eq!(Route::resolve("GET", "/counts"), Ok(Route::Counts));
        assert_eq!(Route::resolve("POST", "/counts"), Err(405));
        assert_eq!(Route::resolve("POST", "/reset"), Ok(Route::Reset));
        assert_eq!(Route::resolve("GET", "/nope"), Err(404));
    }

    #[test]
    fn staging_file_sits_next_to_upload() {
        assert_eq!(
            staging_path(Path::new("/tmp/video.mp4")),
            PathBuf::from("/tmp/video.mp4.part")
        );
    }

    #[test]
    fn reset_keeps_counts_and_log_in_step() -> Result<()> {
        let catalog = PartCatalog::from_parts([(
            PartInfo {
                number: "C-3".to_string(),
                name: "Cap".to_string(),
            },
            vec!["cap_OK".to_string()],
        )])?;
        let crossings = CrossingLog::new(catalog.clone());
        let shared = counter::shared(LineCounter::new(
            LineConfig::default(),
            catalog,
            Box::new(crossings.clone()),
        ));

        let writer = shared.clone();
        let producer = std::thread::spawn(move || -> Result<()> {
            let dims = FrameDims::new(100, 100);
            for track in 0..400u64 {
                let mut counter = lock_counter(&writer)?;
                counter.update(
                    &[Detection::new(track, "cap_OK", BoundingBox::new(10.0, 10.0, 20.0, 20.0))],
                    dims,
                );
                counter.update(
                    &[Detection::new(track, "cap_OK", BoundingBox::new(70.0, 10.0, 80.0, 20.0))],
                    dims,
                );
            }
            Ok(())
        });
        for _ in 0..200 {
            reset_session(&shared, &crossings)?;
            std::thread::yield_now();
        }
        producer
            .join()
            .map_err(|_| anyhow!("producer thread panicked"))??;

        let counter = lock_counter(&shared)?;
        let summary = crossings.summary()?;
        assert_eq!(
            counter.counts().total(),
            summary.line1.quantity + summary.line2.quantity
        );
        Ok(())
    }
}

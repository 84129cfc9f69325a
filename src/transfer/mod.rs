//! Transport execution: one whole-body or segmented HTTP transaction per
//! request, on a pooled easy handle.
//!
//! Shared here: handle configuration from a request's options, response
//! header parsing, and metric readback. The executors themselves live in
//! [`whole`] and [`ranged`].

pub(crate) mod ranged;
pub(crate) mod whole;

use crate::request::{DownloadMetrics, DownloadRequest};
use curl::easy::{Easy, List, ProxyType};
use std::time::Duration;

/// User agent sent when the request does not provide one.
const DEFAULT_USER_AGENT: &str = "libcurl-agent/1.0";

/// Configures `easy` from the request's options. The handle may have served
/// a different origin before; it is reset and its cookies cleared so no
/// origin-specific state leaks across requests.
pub(crate) fn configure_handle(
    easy: &mut Easy,
    request: &DownloadRequest,
    timeout_secs: u64,
    ranged: bool,
) -> Result<(), curl::Error> {
    easy.reset();
    if easy.cookie_list("ALL").is_err() {
        tracing::debug!("cookie engine not active on handle");
    }

    easy.url(&request.url)?;
    if !ranged || request.follow_redirects {
        easy.follow_location(true)?;
    }

    if !request.use_default_timeout {
        easy.timeout(Duration::from_secs(timeout_secs))?;
    }
    if let Some(connect_timeout) = request.connection_timeout {
        easy.connect_timeout(connect_timeout)?;
    }
    easy.signal(false)?;

    if request.fail_on_error {
        easy.fail_on_error(true)?;
    }

    if request.tcp_keepalive {
        easy.tcp_keepalive(true)?;
        easy.tcp_keepidle(Duration::from_secs(60))?;
        easy.tcp_keepintvl(Duration::from_secs(30))?;
    }

    // Host and peer verification stay on; trust comes from the system store.
    easy.ssl_verify_host(true)?;
    easy.ssl_verify_peer(true)?;

    match request.user_agent.as_deref() {
        Some(agent) if !agent.is_empty() => easy.useragent(agent)?,
        _ => easy.useragent(DEFAULT_USER_AGENT)?,
    }

    match request.proxy.as_deref() {
        Some(proxy) if !proxy.is_empty() => {
            easy.proxy(proxy)?;
            easy.proxy_type(ProxyType::Http)?;
        }
        _ => easy.proxy("")?,
    }

    if request.header_only {
        easy.nobody(true)?;
    }

    if let Some(method) = request.method.as_deref() {
        if !method.is_empty() && method != "GET" {
            if method == "POST" {
                easy.post(true)?;
            } else if method == "PUT" {
                easy.upload(true)?;
            } else {
                easy.custom_request(method)?;
            }
        }
    }
    if !request.read_data.is_empty() {
        easy.post_field_size(request.read_data.len() as u64)?;
    }

    if !ranged && request.use_encoding {
        // Offer every built-in decoder.
        easy.accept_encoding("")?;
    }

    Ok(())
}

/// Builds the outgoing header list: the request's additional lines, the
/// access-control headers from the collaborator, and an `Expect:`
/// suppression when a request body will be uploaded. Returns `None` when
/// nothing needs to be sent.
pub(crate) fn build_header_list(
    request: &DownloadRequest,
    ranged: bool,
) -> Result<Option<List>, curl::Error> {
    let mut lines: Vec<String> = Vec::new();
    if !ranged || request.cors_required {
        lines.extend(request.additional_headers.iter().cloned());
        if let Some(cors) = request.cors.as_ref() {
            cors.update_request(&mut lines);
        }
    }
    if !request.read_data.is_empty() {
        lines.push("Expect:".to_string());
    }
    if lines.is_empty() {
        return Ok(None);
    }
    let mut list = List::new();
    for line in &lines {
        list.append(line)?;
    }
    Ok(Some(list))
}

/// Human-readable failure description embedding the URL, the transport
/// result code and the proxy context.
pub(crate) fn error_string(url: &str, code: u32, proxy: Option<&str>) -> String {
    let proxy_message = match proxy {
        Some(p) if !p.is_empty() => format!("Using proxy:true - {}", p),
        _ => "Using proxy:false".to_string(),
    };
    format!(
        "Download error for:{}. Error code:{}. {}",
        url, code, proxy_message
    )
}

/// Reads timing metrics off a completed handle. The TLS share is the delta
/// between app-level connect and connect, clamped at zero; average speed is
/// derived from the payload size and total time.
pub(crate) fn record_metrics(easy: &mut Easy, request: &mut DownloadRequest, downloaded: usize) {
    let connect = easy.connect_time().unwrap_or_default();
    let mut app_connect = easy.appconnect_time().unwrap_or_default();
    let total = easy.total_time().unwrap_or_default();
    if app_connect < connect {
        app_connect = connect;
    }
    let speed = if total.as_secs_f64() > 0.0 {
        (downloaded as f64 / total.as_secs_f64()) as u64
    } else {
        0
    };

    tracing::info!(
        url = %request.url,
        connect_ms = connect.as_millis() as u64,
        ssl_ms = (app_connect - connect).as_millis() as u64,
        total_ms = total.as_millis() as u64,
        speed_bytes_per_sec = speed,
        "download stats"
    );

    request.metrics = DownloadMetrics {
        connect_time_ms: connect.as_millis() as u32,
        ssl_connect_time_ms: (app_connect - connect).as_millis() as u32,
        total_time_ms: total.as_millis() as u32,
        download_speed_bytes_per_sec: speed,
    };
}

/// Runs the response-validation hook of the request's access-control
/// collaborator; a rejection lands in the request's error text.
pub(crate) fn validate_access_control(request: &mut DownloadRequest) {
    if !request.cors_required {
        return;
    }
    if let Some(cors) = request.cors.clone() {
        if let Err(e) = cors.validate_response(request) {
            tracing::warn!(url = %request.url, error = %e, "access control validation failed");
            request.error = Some(e.to_string());
        }
    }
}

/// True when the captured headers contain a `302 Found` status line.
pub(crate) fn has_found_redirect(header_text: &str) -> bool {
    header_text.lines().any(|l| l.contains("302 Found"))
}

/// Extracts the `Location:` header following a `302 Found` status line.
pub(crate) fn extract_redirect_location(header_text: &str) -> Option<String> {
    let mut seen_302 = false;
    for line in header_text.lines() {
        if line.contains("302 Found") {
            seen_302 = true;
            continue;
        }
        if !seen_302 {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("location") {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Parses the total resource size out of `Content-Range: bytes X-Y/TOTAL`.
pub(crate) fn parse_content_range_total(header_text: &str) -> Option<u64> {
    for line in header_text.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if !name.trim().eq_ignore_ascii_case("content-range") {
                continue;
            }
            let value = value.trim();
            if !value.starts_with("bytes") {
                continue;
            }
            if let Some((_, total)) = value.rsplit_once('/') {
                return total.trim().parse::<u64>().ok();
            }
        }
    }
    None
}

/// Inclusive byte ranges for the body segments following the probe: chunks
/// of `chunk` bytes from offset [`ranged::PROBE_BYTES`], the last clamped to
/// `total - 1`. Empty when the probe already covered the resource or the
/// chunk size is unusable.
pub(crate) fn plan_body_ranges(total: u64, chunk: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    if chunk == 0 || total <= ranged::PROBE_BYTES {
        return ranges;
    }
    let mut start = ranged::PROBE_BYTES;
    while start < total {
        let end = (start + chunk - 1).min(total - 1);
        ranges.push((start, end));
        start = end + 1;
    }
    ranges
}

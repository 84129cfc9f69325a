//! Segmented transfer: probe, redirect re-resolution, then ordered
//! byte-range segments with bounded connection-refusal retry.
//!
//! Probing a small range first discovers the total size (and any redirect)
//! before full buffers are provisioned; fixed-size segmentation bounds peak
//! memory and lets a transient refusal retry one segment instead of the
//! whole resource.

use crate::buffer::ResponseBuffer;
use crate::handle_pool::{HandlePool, HandleTtl};
use crate::origin::origin_of;
use crate::request::{DownloadRequest, DownloadStatus, ProgressFn, WriteSink};
use curl::easy::Easy;

use super::whole::{fail_transfer, perform_transaction, setup};
use super::{
    extract_redirect_location, has_found_redirect, parse_content_range_total, plan_body_ranges,
    record_metrics, validate_access_control,
};

/// Size of the probe segment: enough to capture the response headers and the
/// leading bytes while the total size is still unknown.
pub(crate) const PROBE_BYTES: u64 = 8192;

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or
/// exhausts the retry bound. Only connection refusal is retryable; with a
/// bound of N, exactly N + 1 attempts are made before giving up.
pub(crate) fn run_attempts<F>(max_retries: u32, mut attempt: F) -> Result<(), curl::Error>
where
    F: FnMut() -> Result<(), curl::Error>,
{
    let mut retries = 0u32;
    loop {
        match attempt() {
            Ok(()) => return Ok(()),
            Err(e) if e.is_couldnt_connect() && retries < max_retries => {
                retries += 1;
                tracing::info!(retries, max_retries, "connection refused, retrying segment");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Drives the probe and body segments on `easy`. Returns `Ok(Some(url))`
/// when the probe answered `302 Found` with a usable `Location`; buffers
/// are already discarded and the caller restarts against the new URL.
#[allow(clippy::too_many_arguments)]
fn run_segments(
    easy: &mut Easy,
    request: &mut DownloadRequest,
    header_buf: &mut ResponseBuffer,
    body_buf: &mut ResponseBuffer,
    external: &mut Option<WriteSink>,
    progress: &mut Option<ProgressFn>,
    read_data: &[u8],
    read_pos: &mut usize,
    max_retries: u32,
) -> Result<Option<String>, curl::Error> {
    let header_only = request.header_only;
    let use_cb_size = request.use_callback_data_size;

    // Probe segment: headers are captured only here.
    easy.range(&format!("0-{}", PROBE_BYTES - 1))?;
    run_attempts(max_retries, || {
        perform_transaction(
            easy, true, header_only, use_cb_size, header_buf, body_buf, external, progress,
            read_data, read_pos,
        )
    })?;

    let header_text = String::from_utf8_lossy(header_buf.as_slice()).into_owned();
    if has_found_redirect(&header_text) {
        if let Some(location) = extract_redirect_location(&header_text) {
            tracing::info!(from = %request.url, to = %location, "302 Found, restarting segmented transfer");
            header_buf.clear();
            body_buf.clear();
            return Ok(Some(location));
        }
    }

    match parse_content_range_total(&header_text) {
        Some(total) => {
            request.actual_size = total;
            tracing::info!(url = %request.url, total, "resource size from Content-Range");
        }
        None => {
            tracing::error!(url = %request.url, "response header missing usable Content-Range");
        }
    }
    if request.byte_range_interval == 0 && request.actual_size > PROBE_BYTES {
        tracing::error!(url = %request.url, "byte-range interval is zero, only probe bytes retrieved");
    }

    for (start, end) in plan_body_ranges(request.actual_size, request.byte_range_interval) {
        easy.range(&format!("{}-{}", start, end))?;
        run_attempts(max_retries, || {
            perform_transaction(
                easy, false, header_only, use_cb_size, header_buf, body_buf, external, progress,
                read_data, read_pos,
            )
        })?;
    }
    Ok(None)
}

/// Runs one segmented transaction for `request` on a pooled handle.
///
/// Returns `(success, redirect)`. On the redirect leg the request's URL has
/// been rewritten to the `Location` target and all buffered data discarded;
/// the engine invokes the executor a second time and that outcome is
/// authoritative. Segments execute strictly in order; a terminal segment
/// failure fails the whole transfer.
pub(crate) fn download_byte_range_from_network(
    pool: &HandlePool,
    request: &mut DownloadRequest,
    default_ttl: HandleTtl,
    timeout_secs: u64,
    default_retries: u32,
) -> (bool, bool) {
    let origin = origin_of(&request.url);
    let ttl = request.handle_ttl.unwrap_or(default_ttl);
    let max_retries = request.max_retries.unwrap_or(default_retries);
    let mut easy = pool.acquire(&origin);

    if let Err(e) = setup(&mut easy, request, timeout_secs, true) {
        fail_transfer(pool, easy, ttl, &origin, request, &e);
        return (false, false);
    }

    let mut external = request.external_write.take();
    let mut progress = request.progress.take();
    let read_data = std::mem::take(&mut request.read_data);
    let mut read_pos = 0usize;

    let mut header_buf = ResponseBuffer::new();
    let mut body_buf = ResponseBuffer::new();

    let outcome = run_segments(
        &mut easy,
        request,
        &mut header_buf,
        &mut body_buf,
        &mut external,
        &mut progress,
        &read_data,
        &mut read_pos,
        max_retries,
    );

    request.external_write = external;
    request.progress = progress;
    request.read_data = read_data;

    match outcome {
        Err(e) => {
            fail_transfer(pool, easy, ttl, &origin, request, &e);
            (false, false)
        }
        Ok(Some(location)) => {
            request.set_header_data(None);
            request.set_body_data(None);
            if let Ok(code) = easy.response_code() {
                request.http_status = code;
            }
            pool.release(easy, ttl, &origin);
            request.url = location;
            request.status = DownloadStatus::Ok;
            (true, true)
        }
        Ok(None) => {
            if request.metrics_enabled {
                record_metrics(&mut easy, request, body_buf.len());
            }
            if let Ok(code) = easy.response_code() {
                request.http_status = code;
            }
            pool.release(easy, ttl, &origin);

            request.set_header_data(if header_buf.is_empty() {
                None
            } else {
                Some(header_buf.into_bytes())
            });
            if request.header_only {
                request.set_body_data(None);
            } else {
                request.set_body_data(Some(body_buf.into_bytes()));
            }
            validate_access_control(request);
            request.status = DownloadStatus::Ok;
            (true, false)
        }
    }
}

//! Whole-body transfer: one HTTP transaction accumulating the full response.

use crate::buffer::ResponseBuffer;
use crate::handle_pool::{HandlePool, HandleTtl};
use crate::origin::origin_of;
use crate::request::{DownloadRequest, DownloadStatus, ProgressFn, WriteSink};
use curl::easy::Easy;

use super::{
    build_header_list, configure_handle, error_string, record_metrics, validate_access_control,
};

/// Marks the request failed with the transport error, releases the handle
/// and clears any partial data. Every exit path releases its handle.
pub(super) fn fail_transfer(
    pool: &HandlePool,
    easy: Easy,
    ttl: HandleTtl,
    origin: &str,
    request: &mut DownloadRequest,
    e: &curl::Error,
) {
    let code = e.code() as u32;
    if request.fail_on_error {
        request.transport_detail = e.extra_description().map(str::to_string);
    }
    request.error = Some(error_string(&request.url, code, request.proxy.as_deref()));
    tracing::warn!(url = %request.url, code, error = %e, "transfer failed");
    pool.release(easy, ttl, origin);
    request.set_header_data(None);
    request.set_body_data(None);
    request.status = DownloadStatus::Failed(code);
}

pub(super) fn setup(
    easy: &mut Easy,
    request: &DownloadRequest,
    timeout_secs: u64,
    ranged: bool,
) -> Result<(), curl::Error> {
    configure_handle(easy, request, timeout_secs, ranged)?;
    if let Some(list) = build_header_list(request, ranged)? {
        easy.http_headers(list)?;
    }
    if !request.progress_enabled {
        easy.progress(false)?;
    } else if request.progress.is_some() {
        easy.progress(true)?;
    }
    Ok(())
}

/// One perform with the response callbacks bound: headers into `header_buf`,
/// body chunks through the external sink and into `body_buf`, request body
/// served from `read_data`. A buffer reservation failure acknowledges zero
/// bytes, which the transport treats as an abort.
#[allow(clippy::too_many_arguments)]
pub(super) fn perform_transaction(
    easy: &mut Easy,
    capture_headers: bool,
    header_only: bool,
    use_cb_size: bool,
    header_buf: &mut ResponseBuffer,
    body_buf: &mut ResponseBuffer,
    external: &mut Option<WriteSink>,
    progress: &mut Option<ProgressFn>,
    read_data: &[u8],
    read_pos: &mut usize,
) -> Result<(), curl::Error> {
    let mut transfer = easy.transfer();
    if capture_headers {
        transfer.header_function(|data| header_buf.append(data) == data.len())?;
    }
    if !header_only {
        transfer.write_function(|data| {
            let external_consumed = external.as_mut().map_or(0, |f| f(data));
            let consumed = body_buf.append(data);
            if consumed == 0 && !data.is_empty() {
                return Ok(0);
            }
            Ok(if use_cb_size { external_consumed } else { consumed })
        })?;
    }
    if !read_data.is_empty() {
        transfer.read_function(|buf| {
            let offset = (*read_pos).min(read_data.len());
            let remaining = &read_data[offset..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            *read_pos += n;
            Ok(n)
        })?;
    }
    if let Some(p) = progress.as_mut() {
        transfer.progress_function(|dlt, dln, ult, uln| p(dlt, dln, ult, uln))?;
    }
    transfer.perform()
}

/// Runs one whole-body transaction for `request` on a pooled handle.
///
/// On success the request carries the HTTP status, timing metrics, header
/// bytes (when any were received) and the body (unless header-only), and the
/// handle returns to the pool under the request's TTL. On failure the status
/// and error text are set and no data is attached. The caller runs the
/// completion callback either way.
pub(crate) fn download_from_network(
    pool: &HandlePool,
    request: &mut DownloadRequest,
    default_ttl: HandleTtl,
    timeout_secs: u64,
) -> bool {
    let origin = origin_of(&request.url);
    let ttl = request.handle_ttl.unwrap_or(default_ttl);
    let mut easy = pool.acquire(&origin);

    if let Err(e) = setup(&mut easy, request, timeout_secs, false) {
        fail_transfer(pool, easy, ttl, &origin, request, &e);
        return false;
    }

    let header_only = request.header_only;
    let use_cb_size = request.use_callback_data_size;
    let mut external = request.external_write.take();
    let mut progress = request.progress.take();
    let read_data = std::mem::take(&mut request.read_data);
    let mut read_pos = 0usize;

    let mut header_buf = ResponseBuffer::new();
    let mut body_buf = ResponseBuffer::new();

    let perform_result = perform_transaction(
        &mut easy,
        true,
        header_only,
        use_cb_size,
        &mut header_buf,
        &mut body_buf,
        &mut external,
        &mut progress,
        &read_data,
        &mut read_pos,
    );

    request.external_write = external;
    request.progress = progress;
    request.read_data = read_data;

    match perform_result {
        Err(e) => {
            fail_transfer(pool, easy, ttl, &origin, request, &e);
            false
        }
        Ok(()) => {
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
            if header_only {
                request.set_body_data(None);
            } else {
                request.set_body_data(Some(body_buf.into_bytes()));
            }
            validate_access_control(request);
            request.status = DownloadStatus::Ok;
            true
        }
    }
}

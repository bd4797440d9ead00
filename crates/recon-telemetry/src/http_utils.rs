// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    header,
    http::{self, HeaderMap},
    Response, StatusCode,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};

pub type HttpResponse = Response<Full<Bytes>>;

const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Does two things:
/// 1. Logs the given message. A success status code (within 200-299) will cause a debug log to be
///    written, otherwise error will be written.
/// 2. Returns the given message in the body of JSON response with the given status code.
///
/// Response body format:
/// {
///     "message": message
/// }
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, JSON_CONTENT_TYPE)
        .body(Full::new(Bytes::from(body)))
}

/// Logs the failure and returns it as a problem details document.
///
/// Response body format:
/// {
///     "type": "about:blank",
///     "title": title,
///     "status": status,
///     "detail": detail
/// }
pub fn log_and_create_problem_response(
    title: &str,
    detail: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    error!("{title}: {detail}");
    let body = json!({
        "type": "about:blank",
        "title": title,
        "status": status.as_u16(),
        "detail": detail,
    })
    .to_string();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, PROBLEM_CONTENT_TYPE)
        .body(Full::new(Bytes::from(body)))
}

/// Serializes `value` as the JSON body of a response with the given status.
pub fn create_json_response<T: Serialize>(
    value: &T,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(Full::new(Bytes::from(body))),
        Err(e) => log_and_create_problem_response(
            "Serialization failure",
            &e.to_string(),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    }
}

pub fn create_text_response(text: &str, status: StatusCode) -> http::Result<HttpResponse> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(text.to_owned())))
}

/// Takes a request's header map and, when a maximum is configured, verifies that a present
/// "content-length" header is valid and no greater than `max_content_length`.
///
/// A missing header is accepted: the collected body size is checked by the caller afterwards.
///
/// Will return None if no issues are found. Otherwise logs an error (with the given prefix) and
/// returns an HTTP Response with the appropriate error status code.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: Option<usize>,
    error_message_prefix: &str,
) -> Option<http::Result<HttpResponse>> {
    let max_content_length = max_content_length?;
    let content_length_header = header_map.get(header::CONTENT_LENGTH)?;

    let content_length = match content_length_header
        .to_str()
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        Some(res) => res,
        None => {
            return Some(log_and_create_problem_response(
                error_message_prefix,
                "Invalid Content-Length header",
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    if content_length > max_content_length {
        return Some(payload_too_large(error_message_prefix));
    }
    None
}

pub fn payload_too_large(error_message_prefix: &str) -> http::Result<HttpResponse> {
    log_and_create_problem_response(
        error_message_prefix,
        "Payload too large",
        StatusCode::PAYLOAD_TOO_LARGE,
    )
}

/// Builds the reqwest client used for the analytical store.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::RunHandle;

/// Streams the merged run output as a plain-text chunked body. Dropping the
/// body, e.g. when the client disconnects, cancels the run.
impl IntoResponse for RunHandle {
    fn into_response(self) -> Response {
        let (output, cancel, task) = self.into_parts();
        let guard = cancel.drop_guard();
        // The report is logged by the run task itself.
        drop(task);

        let stream = ReceiverStream::new(output).map(move |chunk| {
            let _guard = &guard;
            Ok::<_, Infallible>(chunk)
        });
        debug!("streaming run output");

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        response
    }
}

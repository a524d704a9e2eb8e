//! axum binding of the sync server.
//!
//! Every request except the event stream is forwarded to
//! [`FileSyncServer::handle`] on the blocking pool. The event stream
//! bridges the server's notification channel into an SSE response.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method as HttpMethod, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use filesync_protocol::{endpoints, ChangeEvent, Method};
use filesync_server::{FileSyncServer, ServerError};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

/// Builds the router for `server`.
pub fn router(server: Arc<FileSyncServer>) -> Router {
    Router::new()
        .route(endpoints::EVENTS, get(events))
        .fallback(forward)
        .with_state(server)
}

/// Serves `server` on `addr` until Ctrl-C.
pub async fn serve(server: Arc<FileSyncServer>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(server))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn error_response(err: &ServerError) -> Response {
    (status(err.status_code()), err.to_string()).into_response()
}

async fn forward(
    State(server): State<Arc<FileSyncServer>>,
    method: HttpMethod,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let method = match method {
        HttpMethod::GET => Method::Get,
        HttpMethod::POST => Method::Post,
        _ => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };
    let path = uri.path().to_string();
    let token = bearer(&headers);

    let handled = tokio::task::spawn_blocking(move || {
        server.handle(method, &path, token.as_deref(), &body)
    })
    .await;

    match handled {
        Ok(response) if (200..300).contains(&response.status) => (
            status(response.status),
            [(header::CONTENT_TYPE, "application/json")],
            response.body,
        )
            .into_response(),
        Ok(response) => (
            status(response.status),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            response.body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "request handler panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn events(State(server): State<Arc<FileSyncServer>>, headers: HeaderMap) -> Response {
    let notifications = match server.subscribe(bearer(&headers).as_deref()) {
        Ok(notifications) => notifications,
        Err(e) => return error_response(&e),
    };

    let (tx, rx) = mpsc::channel(64);
    tokio::task::spawn_blocking(move || relay(notifications, tx));

    let stream = ReceiverStream::new(rx).map(|event| Event::default().json_data(event));
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Moves notifications from the feed onto the async side. Ends once the
/// client is gone and the next notification cannot be delivered.
fn relay(notifications: std_mpsc::Receiver<ChangeEvent>, tx: mpsc::Sender<ChangeEvent>) {
    while let Ok(event) = notifications.recv() {
        if tx.blocking_send(event).is_err() {
            break;
        }
    }
    debug!("event stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_is_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer t0ken".parse().unwrap());
        assert_eq!(bearer(&headers).as_deref(), Some("t0ken"));
    }

    #[test]
    fn unknown_status_maps_to_500() {
        assert_eq!(status(404), StatusCode::NOT_FOUND);
        assert_eq!(status(1), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

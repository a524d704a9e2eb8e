//! Request handlers for filesync endpoints.

use crate::auth::{Claims, TokenService};
use crate::error::{ServerError, ServerResult};
use crate::feed::EventFeed;
use crate::store::FileStore;
use filesync_protocol::{
    decode, encode, endpoints, normalize_relative_path, truncate_timestamp, AuthRequest,
    AuthResponse, ChangeEvent, EventKind, FileContent, FileRecord, Method, PathQuery,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared state behind every request.
pub struct HandlerContext {
    /// The synchronized tree.
    pub store: Arc<dyn FileStore>,
    /// Push notifications to connected clients.
    pub feed: EventFeed,
    /// Token issuance and validation.
    pub tokens: TokenService,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(store: Arc<dyn FileStore>, tokens: TokenService) -> Self {
        Self {
            store,
            feed: EventFeed::new(),
            tokens,
        }
    }
}

/// Response to a routed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// JSON body on success, plain-text message on error.
    pub body: Vec<u8>,
}

impl Response {
    fn json<T: Serialize>(value: &T) -> ServerResult<Self> {
        Ok(Self {
            status: 200,
            body: encode(value).map_err(|e| ServerError::Internal(e.to_string()))?,
        })
    }

    fn empty() -> Self {
        Self {
            status: 200,
            body: Vec::new(),
        }
    }

    fn error(err: &ServerError) -> Self {
        Self {
            status: err.status_code(),
            body: err.to_string().into_bytes(),
        }
    }
}

/// Handler for filesync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Validates a bearer token.
    pub fn authorize(&self, bearer: Option<&str>) -> ServerResult<Claims> {
        let token = bearer.ok_or_else(|| ServerError::NotAuthorized("Missing token".into()))?;
        self.context.tokens.validate(token)
    }

    /// Handles a login request.
    pub fn handle_login(&self, request: &AuthRequest) -> ServerResult<AuthResponse> {
        self.context.tokens.login(request)
    }

    /// Lists the whole tree.
    pub fn handle_list(&self) -> ServerResult<Vec<FileRecord>> {
        self.context.store.list()
    }

    /// Handles a create command and notifies subscribers.
    pub fn handle_create(&self, command: ChangeEvent) -> ServerResult<()> {
        let kind = command.kind();
        let ChangeEvent::Created {
            path,
            last_modified,
            is_directory,
            content,
        } = command
        else {
            return Err(unexpected(kind, "Created"));
        };
        let path = normalize_relative_path(&path)?;
        let last_modified = truncate_timestamp(last_modified);
        self.context
            .store
            .write(&path, last_modified, is_directory, content.as_deref())?;
        info!(path = %path, is_directory, "created");
        self.notify(ChangeEvent::Created {
            path,
            last_modified,
            is_directory: is_directory && content.is_none(),
            content: None,
        });
        Ok(())
    }

    /// Handles an update command and notifies subscribers.
    pub fn handle_update(&self, command: ChangeEvent) -> ServerResult<()> {
        let kind = command.kind();
        let ChangeEvent::Updated {
            path,
            last_modified,
            content,
        } = command
        else {
            return Err(unexpected(kind, "Updated"));
        };
        let content = content
            .ok_or_else(|| ServerError::InvalidRequest("update carries no content".into()))?;
        let path = normalize_relative_path(&path)?;
        let last_modified = truncate_timestamp(last_modified);
        self.context
            .store
            .write(&path, last_modified, false, Some(&content))?;
        info!(path = %path, bytes = content.len(), "updated");
        self.notify(ChangeEvent::Updated {
            path,
            last_modified,
            content: None,
        });
        Ok(())
    }

    /// Handles a delete command and notifies subscribers.
    pub fn handle_delete(&self, command: ChangeEvent) -> ServerResult<()> {
        let kind = command.kind();
        let ChangeEvent::Deleted { path } = command else {
            return Err(unexpected(kind, "Deleted"));
        };
        let path = normalize_relative_path(&path)?;
        if self.context.store.remove(&path)? {
            info!(path = %path, "deleted");
            self.notify(ChangeEvent::deleted(path));
        } else {
            debug!(path = %path, "delete of missing entry ignored");
        }
        Ok(())
    }

    /// Handles a rename command and notifies subscribers.
    pub fn handle_rename(&self, command: ChangeEvent) -> ServerResult<()> {
        let kind = command.kind();
        let ChangeEvent::Renamed { path, new_path } = command else {
            return Err(unexpected(kind, "Renamed"));
        };
        let path = normalize_relative_path(&path)?;
        let new_path = normalize_relative_path(&new_path)?;
        self.context.store.rename(&path, &new_path)?;
        info!(path = %path, new_path = %new_path, "renamed");
        self.notify(ChangeEvent::renamed(path, new_path));
        Ok(())
    }

    /// Reads a file.
    pub fn handle_content(&self, query: &PathQuery) -> ServerResult<FileContent> {
        let path = normalize_relative_path(&query.path)?;
        let content = self.context.store.read(&path)?;
        Ok(FileContent { content })
    }

    /// Dispatches a raw request to its handler and maps errors to status
    /// codes.
    pub fn route(&self, method: Method, path: &str, bearer: Option<&str>, body: &[u8]) -> Response {
        match self.try_route(method, path, bearer, body) {
            Ok(response) => response,
            Err(err) => {
                if err.is_server_error() {
                    warn!(path, error = %err, "request failed");
                } else {
                    debug!(path, error = %err, "request rejected");
                }
                Response::error(&err)
            }
        }
    }

    fn try_route(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        body: &[u8],
    ) -> ServerResult<Response> {
        let expected = Method::for_endpoint(path)
            .ok_or_else(|| ServerError::NotFound(format!("no endpoint at '{}'", path)))?;
        if expected != method {
            return Err(ServerError::InvalidRequest(format!(
                "{:?} not supported on '{}'",
                method, path
            )));
        }

        if path == endpoints::AUTH {
            return Response::json(&self.handle_login(&parse(body)?)?);
        }
        self.authorize(bearer)?;

        match path {
            endpoints::LIST_PATHS => Response::json(&self.handle_list()?),
            endpoints::CREATE => self.handle_create(parse(body)?).map(|_| Response::empty()),
            endpoints::UPDATE => self.handle_update(parse(body)?).map(|_| Response::empty()),
            endpoints::DELETE => self.handle_delete(parse(body)?).map(|_| Response::empty()),
            endpoints::RENAME => self.handle_rename(parse(body)?).map(|_| Response::empty()),
            endpoints::CONTENT => Response::json(&self.handle_content(&parse(body)?)?),
            _ => Err(ServerError::InvalidRequest(format!(
                "'{}' is a streaming endpoint",
                path
            ))),
        }
    }

    fn notify(&self, event: ChangeEvent) {
        self.context.feed.emit(event.without_content());
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> ServerResult<T> {
    decode(body).map_err(|e| ServerError::InvalidRequest(e.to_string()))
}

fn unexpected(kind: EventKind, expected: &str) -> ServerError {
    ServerError::InvalidRequest(format!(
        "expected a {} command, got {:?}",
        expected, kind
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use filesync_protocol::Timestamp;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn handler() -> (RequestHandler, Arc<HandlerContext>) {
        let tokens = TokenService::new(AuthConfig::new(b"secret".to_vec()));
        let context = Arc::new(HandlerContext::new(Arc::new(MemoryStore::new()), tokens));
        (RequestHandler::new(context.clone()), context)
    }

    #[test]
    fn create_stores_and_notifies_without_content() {
        let (handler, context) = handler();
        let rx = context.feed.subscribe();

        handler
            .handle_create(ChangeEvent::file_created("a.txt", ts(10), b"hi".to_vec()))
            .unwrap();

        assert_eq!(context.store.read("a.txt").unwrap(), b"hi");
        assert_eq!(
            rx.try_recv().unwrap(),
            ChangeEvent::Created {
                path: "a.txt".into(),
                last_modified: ts(10),
                is_directory: false,
                content: None,
            }
        );
    }

    #[test]
    fn delete_of_missing_is_silent() {
        let (handler, context) = handler();
        let rx = context.feed.subscribe();
        handler.handle_delete(ChangeEvent::deleted("nope")).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn wrong_command_kind_is_rejected() {
        let (handler, _) = handler();
        let err = handler.handle_create(ChangeEvent::deleted("x")).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn route_requires_token() {
        let (handler, _) = handler();
        let response = handler.route(Method::Get, endpoints::LIST_PATHS, None, &[]);
        assert_eq!(response.status, 401);
        let response = handler.route(Method::Get, endpoints::LIST_PATHS, Some("bogus"), &[]);
        assert_eq!(response.status, 401);
    }

    #[test]
    fn route_login_then_list() {
        let (handler, _) = handler();
        let body = encode(&AuthRequest::new("u", "p")).unwrap();
        let response = handler.route(Method::Post, endpoints::AUTH, None, &body);
        assert_eq!(response.status, 200);
        let auth: AuthResponse = decode(&response.body).unwrap();

        let body = encode(&ChangeEvent::directory_created("d", ts(5))).unwrap();
        let response = handler.route(Method::Post, endpoints::CREATE, Some(&auth.token), &body);
        assert_eq!(response.status, 200);

        let response = handler.route(Method::Get, endpoints::LIST_PATHS, Some(&auth.token), &[]);
        let records: Vec<FileRecord> = decode(&response.body).unwrap();
        assert_eq!(records, vec![FileRecord::directory("d", ts(5))]);
    }

    #[test]
    fn route_status_mapping() {
        let (handler, context) = handler();
        let token = context.tokens.create_token("u").unwrap();
        let bearer = Some(token.as_str());

        assert_eq!(handler.route(Method::Get, "/nowhere", bearer, &[]).status, 404);
        assert_eq!(
            handler.route(Method::Get, endpoints::CREATE, bearer, &[]).status,
            400
        );
        assert_eq!(
            handler
                .route(Method::Post, endpoints::CREATE, bearer, b"not json")
                .status,
            400
        );
        let query = encode(&PathQuery::new("missing.txt")).unwrap();
        assert_eq!(
            handler
                .route(Method::Post, endpoints::CONTENT, bearer, &query)
                .status,
            404
        );
        let escape = encode(&ChangeEvent::deleted("../x")).unwrap();
        assert_eq!(
            handler
                .route(Method::Post, endpoints::DELETE, bearer, &escape)
                .status,
            400
        );
    }
}

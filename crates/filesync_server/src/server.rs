//! Main sync server.

use crate::auth::{AuthConfig, TokenService};
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler, Response};
use crate::store::{DirectoryStore, FileStore};
use filesync_protocol::{AuthRequest, AuthResponse, ChangeEvent, Method};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::info;

/// The filesync server.
///
/// Transport-agnostic: an HTTP binding forwards requests to
/// [`handle`](Self::handle) and streams [`subscribe`](Self::subscribe)
/// receivers to clients.
///
/// # Example
///
/// ```
/// use filesync_server::{AuthConfig, FileSyncServer, MemoryStore, TokenService};
/// use std::sync::Arc;
///
/// let tokens = TokenService::new(AuthConfig::new(b"secret".to_vec()));
/// let server = FileSyncServer::with_store(Arc::new(MemoryStore::new()), tokens);
/// assert_eq!(server.subscriber_count(), 0);
/// ```
pub struct FileSyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl FileSyncServer {
    /// Creates a server over the directory named in `config`.
    pub fn new(config: &ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let store = DirectoryStore::open(&config.base_path)?;
        let tokens = TokenService::new(
            AuthConfig::new(config.secret.clone().into_bytes())
                .with_expiry(config.token_expiry())
                .with_users(config.users.clone()),
        );
        info!(base = %config.base_path.display(), "serving directory");
        Ok(Self::with_store(Arc::new(store), tokens))
    }

    /// Creates a server over an existing store.
    pub fn with_store(store: Arc<dyn FileStore>, tokens: TokenService) -> Self {
        let context = Arc::new(HandlerContext::new(store, tokens));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Handles a request.
    pub fn handle(&self, method: Method, path: &str, bearer: Option<&str>, body: &[u8]) -> Response {
        self.handler.route(method, path, bearer, body)
    }

    /// Opens a push subscription for an authorized client.
    pub fn subscribe(&self, bearer: Option<&str>) -> ServerResult<Receiver<ChangeEvent>> {
        let claims = self.handler.authorize(bearer)?;
        info!(user = %claims.sub, "client subscribed");
        Ok(self.context.feed.subscribe())
    }

    /// Checks credentials and issues a token.
    pub fn login(&self, request: &AuthRequest) -> ServerResult<AuthResponse> {
        self.handler.handle_login(request)
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.context.store
    }

    /// Returns the number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.context.feed.subscriber_count()
    }
}

//! Client session orchestration.

use crate::applier::{log_stream_error, ApplierHandle, ErrorCallback, EventApplier};
use crate::capture::{ChangeCapture, ChangeQueue};
use crate::config::SyncConfig;
use crate::dispatcher::{ChangeDispatcher, DispatcherHandle};
use crate::error::SyncResult;
use crate::reconciler::{FixedPolicy, LocalOnlyResolver, ReconcileReport, Reconciler};
use crate::transport::{PushChannel, SyncTransport};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// A configured but not yet started sync session.
pub struct SyncClient<T, P>
where
    T: SyncTransport + 'static,
    P: PushChannel,
{
    config: SyncConfig,
    transport: Arc<T>,
    push: Arc<P>,
    on_error: ErrorCallback,
}

impl<T, P> SyncClient<T, P>
where
    T: SyncTransport + 'static,
    P: PushChannel,
{
    /// Creates a session over a request transport and a push channel.
    pub fn new(config: SyncConfig, transport: Arc<T>, push: Arc<P>) -> Self {
        Self {
            config,
            transport,
            push,
            on_error: log_stream_error(),
        }
    }

    /// Sets the callback receiving push stream failures.
    pub fn with_error_callback(mut self, on_error: ErrorCallback) -> Self {
        self.on_error = on_error;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Starts the session.
    ///
    /// Creates the base directory, runs startup reconciliation, then starts
    /// the push applier, the watcher and the dispatcher, in that order. A
    /// reconciliation failure aborts startup before anything is running.
    ///
    /// `resolver` is only consulted when the configured local-only policy
    /// is [`LocalOnlyPolicy::Prompt`](crate::LocalOnlyPolicy::Prompt).
    pub fn start(self, resolver: &mut dyn LocalOnlyResolver) -> SyncResult<RunningSync> {
        let root = &self.config.base_directory;
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        let policy = self.config.local_only_policy;
        info!(root = %root.display(), ?policy, "starting sync");

        let mut fixed;
        let resolver: &mut dyn LocalOnlyResolver = match policy.fixed_choice() {
            Some(choice) => {
                fixed = FixedPolicy(choice);
                &mut fixed
            }
            None => resolver,
        };
        let report = Reconciler::new(&root, self.transport.clone()).run(resolver)?;

        let events = self.push.subscribe()?;
        let applier = EventApplier::new(&root, self.transport.clone()).spawn(
            events,
            self.config.poll_interval,
            self.on_error.clone(),
        )?;

        let queue = Arc::new(ChangeQueue::new());
        let capture = ChangeCapture::start(&root, queue.clone())?;
        let dispatcher =
            ChangeDispatcher::new(&root, self.transport.clone(), queue, self.config.debounce)
                .spawn()?;

        info!("sync running");
        Ok(RunningSync {
            root,
            report,
            capture: Some(capture),
            dispatcher,
            applier,
        })
    }
}

/// A running sync session.
pub struct RunningSync {
    root: std::path::PathBuf,
    report: ReconcileReport,
    capture: Option<ChangeCapture>,
    dispatcher: DispatcherHandle,
    applier: ApplierHandle,
}

impl RunningSync {
    /// Returns the canonical local root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns what startup reconciliation did.
    pub fn reconcile_report(&self) -> ReconcileReport {
        self.report
    }

    /// Returns the dispatcher handle.
    pub fn dispatcher(&self) -> &DispatcherHandle {
        &self.dispatcher
    }

    /// Returns the applier handle.
    pub fn applier(&self) -> &ApplierHandle {
        &self.applier
    }

    /// Stops the watcher, then cancels and joins both workers.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        self.dispatcher.shutdown();
        self.applier.shutdown();
        info!("sync stopped");
    }
}

impl Drop for RunningSync {
    fn drop(&mut self) {
        if self.capture.is_some() {
            self.stop();
        }
    }
}

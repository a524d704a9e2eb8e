//! Startup reconciliation of the local tree against the server.
//!
//! Planning is a pure function of the two snapshots and the resolver's
//! answers; execution then performs the planned actions in path order, so
//! parent directories are handled before their children.

use crate::error::{SyncError, SyncResult};
use crate::local;
use crate::transport::SyncTransport;
use filesync_protocol::FileRecord;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Answer for one local-only entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOnlyChoice {
    /// Push this entry.
    PushOne,
    /// Push this and every remaining local-only entry without asking.
    PushAll,
    /// Delete this entry locally.
    DeleteOne,
    /// Delete this and every remaining local-only entry without asking.
    DeleteAll,
}

impl LocalOnlyChoice {
    fn is_sticky(self) -> bool {
        matches!(self, LocalOnlyChoice::PushAll | LocalOnlyChoice::DeleteAll)
    }

    fn pushes(self) -> bool {
        matches!(self, LocalOnlyChoice::PushOne | LocalOnlyChoice::PushAll)
    }
}

/// Decides what to do with files that exist locally but not remotely.
pub trait LocalOnlyResolver {
    /// Asks about one local-only file.
    fn resolve(&mut self, path: &str) -> LocalOnlyChoice;
}

/// Resolver answering every question the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPolicy(pub LocalOnlyChoice);

impl Default for FixedPolicy {
    fn default() -> Self {
        FixedPolicy(LocalOnlyChoice::PushAll)
    }
}

impl LocalOnlyResolver for FixedPolicy {
    fn resolve(&mut self, _path: &str) -> LocalOnlyChoice {
        self.0
    }
}

/// What reconciliation does for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Send the local entry to the server.
    PushLocal,
    /// Download the remote entry.
    PullRemote,
    /// Remove the local entry.
    DeleteLocal,
    /// Both sides agree.
    NoOp,
}

/// Planned action for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileAction {
    /// Relative path.
    pub path: String,
    /// What to do.
    pub decision: Decision,
    /// Local record, if any.
    pub local: Option<FileRecord>,
    /// Remote record, if any.
    pub remote: Option<FileRecord>,
}

/// The full plan of a reconciliation pass, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// One entry per path present on either side.
    pub actions: Vec<ReconcileAction>,
}

impl ReconcilePlan {
    /// Actions that change something.
    pub fn actionable(&self) -> impl Iterator<Item = &ReconcileAction> {
        self.actions
            .iter()
            .filter(|a| a.decision != Decision::NoOp)
    }

    /// Returns true if both sides already agree.
    pub fn is_converged(&self) -> bool {
        self.actionable().next().is_none()
    }
}

/// Counts of what a pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entries sent to the server.
    pub pushed: usize,
    /// Entries downloaded.
    pub pulled: usize,
    /// Entries removed locally.
    pub deleted: usize,
    /// Entries already in agreement.
    pub unchanged: usize,
}

/// Builds the reconciliation plan.
///
/// For files on both sides the newer timestamp wins and equal timestamps
/// are a no-op. Directories on both sides are always a no-op. Remote-only
/// entries are pulled. Local-only files are pushed or deleted as the
/// resolver says, asking once per path until it answers with an "all"
/// choice. Local-only directories are pushed, unless everything planned
/// beneath them is deleted, in which case they are deleted too.
pub fn plan(
    local: &[FileRecord],
    remote: &[FileRecord],
    resolver: &mut dyn LocalOnlyResolver,
) -> ReconcilePlan {
    let local: BTreeMap<&str, &FileRecord> = local.iter().map(|r| (r.path.as_str(), r)).collect();
    let remote: BTreeMap<&str, &FileRecord> =
        remote.iter().map(|r| (r.path.as_str(), r)).collect();
    let paths: BTreeSet<&str> = local.keys().chain(remote.keys()).copied().collect();

    let mut sticky: Option<LocalOnlyChoice> = None;
    let mut actions = Vec::with_capacity(paths.len());

    for path in paths {
        let l = local.get(path).copied();
        let r = remote.get(path).copied();
        let decision = match (l, r) {
            (Some(l), Some(r)) if l.is_directory && r.is_directory => Decision::NoOp,
            (Some(l), Some(r)) if l.is_directory != r.is_directory => {
                warn!(path, "entry is a file on one side and a directory on the other");
                Decision::NoOp
            }
            (Some(l), Some(r)) => match l.last_modified.cmp(&r.last_modified) {
                std::cmp::Ordering::Greater => Decision::PushLocal,
                std::cmp::Ordering::Less => Decision::PullRemote,
                std::cmp::Ordering::Equal => Decision::NoOp,
            },
            (None, Some(_)) => Decision::PullRemote,
            (Some(l), None) if l.is_directory => Decision::PushLocal,
            (Some(_), None) => {
                let choice = match sticky {
                    Some(choice) => choice,
                    None => {
                        let choice = resolver.resolve(path);
                        if choice.is_sticky() {
                            sticky = Some(choice);
                        }
                        choice
                    }
                };
                if choice.pushes() {
                    Decision::PushLocal
                } else {
                    Decision::DeleteLocal
                }
            }
            (None, None) => Decision::NoOp,
        };
        actions.push(ReconcileAction {
            path: path.to_string(),
            decision,
            local: l.cloned(),
            remote: r.cloned(),
        });
    }

    delete_emptied_directories(&mut actions);
    ReconcilePlan { actions }
}

/// Turns pushes of local-only directories into deletes when all of their
/// descendants are being deleted. Nested directories are settled first.
fn delete_emptied_directories(actions: &mut [ReconcileAction]) {
    let mut dirs: Vec<usize> = actions
        .iter()
        .enumerate()
        .filter(|(_, a)| {
            a.decision == Decision::PushLocal
                && a.remote.is_none()
                && a.local.as_ref().is_some_and(|l| l.is_directory)
        })
        .map(|(i, _)| i)
        .collect();
    dirs.sort_by_key(|&i| std::cmp::Reverse(actions[i].path.matches('/').count()));

    for i in dirs {
        let prefix = format!("{}/", actions[i].path);
        let emptied = {
            let mut below = actions
                .iter()
                .filter(|a| a.path.starts_with(&prefix))
                .peekable();
            below.peek().is_some() && below.all(|a| a.decision == Decision::DeleteLocal)
        };
        if emptied {
            actions[i].decision = Decision::DeleteLocal;
        }
    }
}

/// Brings the local tree and the server into agreement at startup.
pub struct Reconciler<T: SyncTransport> {
    root: PathBuf,
    transport: Arc<T>,
}

impl<T: SyncTransport> Reconciler<T> {
    /// Creates a reconciler for `root`.
    pub fn new(root: impl Into<PathBuf>, transport: Arc<T>) -> Self {
        Self {
            root: root.into(),
            transport,
        }
    }

    /// Returns the local root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshots both sides and builds the plan.
    ///
    /// Fails without touching anything if the server cannot be listed.
    pub fn plan(&self, resolver: &mut dyn LocalOnlyResolver) -> SyncResult<ReconcilePlan> {
        let local = local::snapshot(&self.root)?;
        let remote = self.transport.list_paths()?;
        debug!(local = local.len(), remote = remote.len(), "snapshots taken");
        Ok(plan(&local, &remote, resolver))
    }

    /// Performs a planned pass.
    ///
    /// Stops at the first failure; a later pass picks up where this one
    /// left off since every action is idempotent.
    pub fn execute(&self, plan: &ReconcilePlan) -> SyncResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for action in &plan.actions {
            match action.decision {
                Decision::PushLocal => {
                    self.push(action)?;
                    report.pushed += 1;
                }
                Decision::PullRemote => {
                    self.pull(action)?;
                    report.pulled += 1;
                }
                Decision::DeleteLocal => {
                    if local::remove_entry(&local::resolve(&self.root, &action.path)?)? {
                        debug!(path = %action.path, "deleted local-only entry");
                    }
                    report.deleted += 1;
                }
                Decision::NoOp => report.unchanged += 1,
            }
        }
        Ok(report)
    }

    /// Runs a full pass: snapshot, plan, execute.
    pub fn run(&self, resolver: &mut dyn LocalOnlyResolver) -> SyncResult<ReconcileReport> {
        let plan = self.plan(resolver)?;
        let report = self.execute(&plan)?;
        info!(
            pushed = report.pushed,
            pulled = report.pulled,
            deleted = report.deleted,
            unchanged = report.unchanged,
            "reconciliation complete"
        );
        Ok(report)
    }

    fn push(&self, action: &ReconcileAction) -> SyncResult<()> {
        let record = action
            .local
            .as_ref()
            .ok_or_else(|| SyncError::InvalidPath(format!("no local entry for '{}'", action.path)))?;
        if record.is_directory {
            self.transport
                .create(&record.path, record.last_modified, true, None)?;
        } else {
            let target = local::resolve(&self.root, &record.path)?;
            let content = std::fs::read(&target)?;
            if action.remote.is_some() {
                self.transport
                    .update(&record.path, record.last_modified, &content)?;
            } else {
                self.transport
                    .create(&record.path, record.last_modified, false, Some(&content))?;
            }
        }
        debug!(path = %record.path, "pushed local entry");
        Ok(())
    }

    fn pull(&self, action: &ReconcileAction) -> SyncResult<()> {
        let record = action.remote.as_ref().ok_or_else(|| {
            SyncError::InvalidPath(format!("no remote entry for '{}'", action.path))
        })?;
        let target = local::resolve(&self.root, &record.path)?;
        if record.is_directory {
            local::create_directory(&target, record.last_modified)?;
        } else {
            let content = self.transport.get_content(&record.path)?;
            local::write_file(&target, &content, record.last_modified)?;
        }
        debug!(path = %record.path, "pulled remote entry");
        Ok(())
    }
}

//! Remote repository abstraction: the git object store a vault is pushed to.
//!
//! The push protocol only ever needs six calls, mirroring the git data API:
//! read the branch tip, read a commit's tree, create blob / tree / commit
//! objects, and fast-forward the branch. [`MemoryRemote`] implements them
//! over an in-process object map for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use vaultpush_core::types::{BlobSha, CommitSha, TreeSha};

#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote answered, but refused the request.
    #[error("remote returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("authentication rejected by remote ({status}): {message}")]
    Auth { status: u16, message: String },

    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response from remote: {0}")]
    Decode(String),

    /// No usable credentials to even attempt a request.
    #[error("missing credentials: {0}")]
    Credentials(String),
}

/// Git file mode of a tree entry. Only regular files are pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileMode {
    #[default]
    Regular,
}

impl FileMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FileMode::Regular => "100644",
        }
    }
}

/// What a tree entry should hold after the tree is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNodeContent {
    /// UTF-8 text, sent in the tree request itself.
    Inline(String),
    /// A blob created beforehand.
    Blob(BlobSha),
    /// Remove the path from the base tree.
    Delete,
}

/// One mutation applied on top of a base tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub path: String,
    pub mode: FileMode,
    pub content: TreeNodeContent,
}

impl TreeNode {
    pub fn inline(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FileMode::Regular,
            content: TreeNodeContent::Inline(text.into()),
        }
    }

    pub fn blob(path: impl Into<String>, sha: BlobSha) -> Self {
        Self {
            path: path.into(),
            mode: FileMode::Regular,
            content: TreeNodeContent::Blob(sha),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: FileMode::Regular,
            content: TreeNodeContent::Delete,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self.content, TreeNodeContent::Delete)
    }
}

/// The remote side of a push.
#[async_trait]
pub trait RemoteRepo: Send + Sync {
    /// Human-readable identity of the remote, e.g. `owner/repo`.
    fn describe(&self) -> String;

    /// Commit the tracked branch currently points at.
    async fn ref_tip_commit(&self) -> Result<CommitSha, RemoteError>;

    /// Root tree of a commit.
    async fn commit_tree(&self, commit: &CommitSha) -> Result<TreeSha, RemoteError>;

    async fn create_blob(&self, content: &[u8]) -> Result<BlobSha, RemoteError>;

    async fn create_tree(&self, nodes: &[TreeNode], base: &TreeSha)
        -> Result<TreeSha, RemoteError>;

    async fn create_commit(
        &self,
        tree: &TreeSha,
        parent: &CommitSha,
        message: &str,
    ) -> Result<CommitSha, RemoteError>;

    /// Fast-forward the tracked branch to `commit`. Never forces.
    ///
    /// Returns the commit the branch points at afterwards.
    async fn update_ref(&self, commit: &CommitSha) -> Result<CommitSha, RemoteError>;
}

#[async_trait]
impl<T: RemoteRepo + ?Sized> RemoteRepo for Arc<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    async fn ref_tip_commit(&self) -> Result<CommitSha, RemoteError> {
        (**self).ref_tip_commit().await
    }

    async fn commit_tree(&self, commit: &CommitSha) -> Result<TreeSha, RemoteError> {
        (**self).commit_tree(commit).await
    }

    async fn create_blob(&self, content: &[u8]) -> Result<BlobSha, RemoteError> {
        (**self).create_blob(content).await
    }

    async fn create_tree(
        &self,
        nodes: &[TreeNode],
        base: &TreeSha,
    ) -> Result<TreeSha, RemoteError> {
        (**self).create_tree(nodes, base).await
    }

    async fn create_commit(
        &self,
        tree: &TreeSha,
        parent: &CommitSha,
        message: &str,
    ) -> Result<CommitSha, RemoteError> {
        (**self).create_commit(tree, parent, message).await
    }

    async fn update_ref(&self, commit: &CommitSha) -> Result<CommitSha, RemoteError> {
        (**self).update_ref(commit).await
    }
}

// ---------------------------------------------------------------------------
// MemoryRemote
// ---------------------------------------------------------------------------

/// Operations of [`RemoteRepo`], for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    RefTip,
    CommitTree,
    CreateBlob,
    CreateTree,
    CreateCommit,
    UpdateRef,
}

/// Number of calls received per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub ref_tip: usize,
    pub commit_tree: usize,
    pub create_blob: usize,
    pub create_tree: usize,
    pub create_commit: usize,
    pub update_ref: usize,
}

impl CallCounts {
    /// Calls that create objects or move the branch.
    pub fn writes(&self) -> usize {
        self.create_blob + self.create_tree + self.create_commit + self.update_ref
    }

    fn bump(&mut self, op: RemoteOp) {
        match op {
            RemoteOp::RefTip => self.ref_tip += 1,
            RemoteOp::CommitTree => self.commit_tree += 1,
            RemoteOp::CreateBlob => self.create_blob += 1,
            RemoteOp::CreateTree => self.create_tree += 1,
            RemoteOp::CreateCommit => self.create_commit += 1,
            RemoteOp::UpdateRef => self.update_ref += 1,
        }
    }
}

/// A commit stored in a [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCommit {
    pub tree: TreeSha,
    pub parent: Option<CommitSha>,
    pub message: String,
}

type Files = BTreeMap<String, Vec<u8>>;

#[derive(Debug)]
struct RemoteState {
    head: CommitSha,
    commits: HashMap<CommitSha, MemoryCommit>,
    trees: HashMap<TreeSha, Files>,
    blobs: HashMap<BlobSha, Vec<u8>>,
    calls: CallCounts,
    failing: HashSet<RemoteOp>,
    interleave: HashSet<RemoteOp>,
    seq: u64,
}

impl RemoteState {
    fn store_tree(&mut self, files: Files) -> TreeSha {
        let mut hasher = Sha256::new();
        for (path, content) in &files {
            hasher.update(path.as_bytes());
            hasher.update([0]);
            hasher.update(Sha256::digest(content));
        }
        let sha = TreeSha(short_id(hasher.finalize().as_slice()));
        self.trees.insert(sha.clone(), files);
        sha
    }

    fn store_commit(&mut self, tree: TreeSha, parent: Option<CommitSha>, message: &str) -> CommitSha {
        self.seq += 1;
        let mut hasher = Sha256::new();
        hasher.update(tree.0.as_bytes());
        if let Some(parent) = &parent {
            hasher.update(parent.0.as_bytes());
        }
        hasher.update(message.as_bytes());
        hasher.update(self.seq.to_le_bytes());
        let sha = CommitSha(short_id(hasher.finalize().as_slice()));
        self.commits.insert(
            sha.clone(),
            MemoryCommit {
                tree,
                parent,
                message: message.to_string(),
            },
        );
        sha
    }

    /// Commit on top of the head on behalf of some other writer.
    fn external_commit(&mut self, updates: Vec<(String, Option<Vec<u8>>)>, message: &str) -> CommitSha {
        let mut files = self.files_at(&self.head.clone()).unwrap_or_default();
        for (path, content) in updates {
            match content {
                Some(bytes) => {
                    files.insert(path, bytes);
                }
                None => {
                    files.remove(&path);
                }
            }
        }
        let tree = self.store_tree(files);
        let parent = self.head.clone();
        let commit = self.store_commit(tree, Some(parent), message);
        self.head = commit.clone();
        commit
    }

    fn files_at(&self, commit: &CommitSha) -> Option<Files> {
        let tree = &self.commits.get(commit)?.tree;
        self.trees.get(tree).cloned()
    }

    fn descends_from(&self, commit: &CommitSha, ancestor: &CommitSha) -> bool {
        let mut cursor = Some(commit.clone());
        while let Some(current) = cursor {
            if &current == ancestor {
                return true;
            }
            cursor = self.commits.get(&current).and_then(|c| c.parent.clone());
        }
        false
    }

    /// Count the call, then apply any injected fault or interleaving.
    fn enter(&mut self, op: RemoteOp) -> Result<(), RemoteError> {
        self.calls.bump(op);
        if self.interleave.remove(&op) {
            self.external_commit(Vec::new(), "concurrent commit");
        }
        if self.failing.contains(&op) {
            return Err(RemoteError::Transport(format!("injected failure on {op:?}")));
        }
        Ok(())
    }
}

fn short_id(digest: &[u8]) -> String {
    let mut id = hex::encode(digest);
    id.truncate(40);
    id
}

fn unprocessable(message: impl Into<String>) -> RemoteError {
    RemoteError::Status {
        status: 422,
        message: message.into(),
    }
}

/// In-process remote holding a single branch.
///
/// Starts with one root commit. Branch updates are fast-forward only, like a
/// non-forced ref update on a real host.
#[derive(Debug)]
pub struct MemoryRemote {
    slug: String,
    state: Mutex<RemoteState>,
}

impl MemoryRemote {
    /// A remote whose branch holds a single commit with an empty tree.
    pub fn new(slug: impl Into<String>) -> Self {
        Self::with_files(slug, Vec::<(String, Vec<u8>)>::new())
    }

    /// A remote whose branch holds a single commit with `files`.
    pub fn with_files<P, C>(slug: impl Into<String>, files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: Into<String>,
        C: Into<Vec<u8>>,
    {
        let mut state = RemoteState {
            head: CommitSha(String::new()),
            commits: HashMap::new(),
            trees: HashMap::new(),
            blobs: HashMap::new(),
            calls: CallCounts::default(),
            failing: HashSet::new(),
            interleave: HashSet::new(),
            seq: 0,
        };
        let files: Files = files
            .into_iter()
            .map(|(p, c)| (p.into(), c.into()))
            .collect();
        let tree = state.store_tree(files);
        state.head = state.store_commit(tree, None, "initial commit");
        Self {
            slug: slug.into(),
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn head(&self) -> CommitSha {
        self.lock().head.clone()
    }

    pub fn commit(&self, sha: &CommitSha) -> Option<MemoryCommit> {
        self.lock().commits.get(sha).cloned()
    }

    /// File contents of the tree at `commit`.
    pub fn files_at(&self, commit: &CommitSha) -> Option<BTreeMap<String, Vec<u8>>> {
        self.lock().files_at(commit)
    }

    pub fn head_files(&self) -> BTreeMap<String, Vec<u8>> {
        let state = self.lock();
        state.files_at(&state.head).unwrap_or_default()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }

    /// Make every subsequent call of `op` fail with a transport error.
    pub fn fail_on(&self, op: RemoteOp) {
        self.lock().failing.insert(op);
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Land a commit from another writer right before the next `op` call is
    /// served.
    pub fn interleave_commit_before(&self, op: RemoteOp) {
        self.lock().interleave.insert(op);
    }

    /// Advance the branch as another writer would. `None` content deletes.
    pub fn advance<P, C>(&self, updates: impl IntoIterator<Item = (P, Option<C>)>) -> CommitSha
    where
        P: Into<String>,
        C: Into<Vec<u8>>,
    {
        let updates = updates
            .into_iter()
            .map(|(p, c)| (p.into(), c.map(Into::into)))
            .collect();
        self.lock().external_commit(updates, "external commit")
    }
}

#[async_trait]
impl RemoteRepo for MemoryRemote {
    fn describe(&self) -> String {
        self.slug.clone()
    }

    async fn ref_tip_commit(&self) -> Result<CommitSha, RemoteError> {
        let mut state = self.lock();
        state.enter(RemoteOp::RefTip)?;
        Ok(state.head.clone())
    }

    async fn commit_tree(&self, commit: &CommitSha) -> Result<TreeSha, RemoteError> {
        let mut state = self.lock();
        state.enter(RemoteOp::CommitTree)?;
        state
            .commits
            .get(commit)
            .map(|c| c.tree.clone())
            .ok_or_else(|| RemoteError::Status {
                status: 404,
                message: format!("no commit {commit}"),
            })
    }

    async fn create_blob(&self, content: &[u8]) -> Result<BlobSha, RemoteError> {
        let mut state = self.lock();
        state.enter(RemoteOp::CreateBlob)?;
        let sha = BlobSha(short_id(Sha256::digest(content).as_slice()));
        state.blobs.insert(sha.clone(), content.to_vec());
        Ok(sha)
    }

    async fn create_tree(
        &self,
        nodes: &[TreeNode],
        base: &TreeSha,
    ) -> Result<TreeSha, RemoteError> {
        let mut state = self.lock();
        state.enter(RemoteOp::CreateTree)?;
        let mut files = state
            .trees
            .get(base)
            .cloned()
            .ok_or_else(|| unprocessable(format!("base tree {base} not found")))?;
        for node in nodes {
            match &node.content {
                TreeNodeContent::Inline(text) => {
                    files.insert(node.path.clone(), text.as_bytes().to_vec());
                }
                TreeNodeContent::Blob(sha) => {
                    let bytes = state
                        .blobs
                        .get(sha)
                        .cloned()
                        .ok_or_else(|| unprocessable(format!("blob {sha} not found")))?;
                    files.insert(node.path.clone(), bytes);
                }
                TreeNodeContent::Delete => {
                    files.remove(&node.path);
                }
            }
        }
        Ok(state.store_tree(files))
    }

    async fn create_commit(
        &self,
        tree: &TreeSha,
        parent: &CommitSha,
        message: &str,
    ) -> Result<CommitSha, RemoteError> {
        let mut state = self.lock();
        state.enter(RemoteOp::CreateCommit)?;
        if !state.trees.contains_key(tree) {
            return Err(unprocessable(format!("tree {tree} not found")));
        }
        if !state.commits.contains_key(parent) {
            return Err(unprocessable(format!("parent {parent} not found")));
        }
        Ok(state.store_commit(tree.clone(), Some(parent.clone()), message))
    }

    async fn update_ref(&self, commit: &CommitSha) -> Result<CommitSha, RemoteError> {
        let mut state = self.lock();
        state.enter(RemoteOp::UpdateRef)?;
        if !state.commits.contains_key(commit) {
            return Err(unprocessable(format!("commit {commit} not found")));
        }
        let head = state.head.clone();
        if !state.descends_from(commit, &head) {
            return Err(unprocessable("Update is not a fast forward"));
        }
        state.head = commit.clone();
        Ok(commit.clone())
    }
}

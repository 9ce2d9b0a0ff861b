//! # vaultpush-github
//!
//! [`RemoteRepo`] over the GitHub git data API.
//!
//! Every call is a blocking `ureq` request run on tokio's blocking pool.
//! Reads are retried on transport errors and 5xx answers; writes are sent
//! exactly once, since a repeated write may or may not have landed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use vaultpush_core::types::{BlobSha, CommitSha, RemoteSpec, TreeSha, Vault};
use vaultpush_sync::{
    PushStage, RemoteError, RemoteRepo, SyncError, TreeNode, TreeNodeContent,
};

pub const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("vaultpush/", env!("CARGO_PKG_VERSION"));
const READ_ATTEMPTS: usize = 3;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

pub fn blob_body(content: &[u8]) -> Value {
    json!({
        "content": STANDARD.encode(content),
        "encoding": "base64",
    })
}

/// Tree request on top of `base`. A deletion is an entry with a null sha.
pub fn tree_body(nodes: &[TreeNode], base: &TreeSha) -> Value {
    let entries: Vec<Value> = nodes
        .iter()
        .map(|node| {
            let mut entry = json!({
                "path": node.path,
                "mode": node.mode.as_str(),
                "type": "blob",
            });
            match &node.content {
                TreeNodeContent::Inline(text) => entry["content"] = json!(text),
                TreeNodeContent::Blob(sha) => entry["sha"] = json!(sha.0),
                TreeNodeContent::Delete => entry["sha"] = Value::Null,
            }
            entry
        })
        .collect();
    json!({ "base_tree": base.0, "tree": entries })
}

pub fn commit_body(tree: &TreeSha, parent: &CommitSha, message: &str) -> Value {
    json!({
        "message": message,
        "tree": tree.0,
        "parents": [parent.0],
    })
}

pub fn ref_body(commit: &CommitSha) -> Value {
    json!({ "sha": commit.0, "force": false })
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ObjectRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ObjectRef,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    tree: ObjectRef,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Map a non-2xx answer to a [`RemoteError`].
pub fn status_error(status: u16, body: &str) -> RemoteError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string());
    match status {
        401 | 403 => RemoteError::Auth { status, message },
        _ => RemoteError::Status { status, message },
    }
}

fn map_ureq(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            status_error(status, &body)
        }
        ureq::Error::Transport(transport) => RemoteError::Transport(transport.to_string()),
    }
}

fn is_transient(err: &RemoteError) -> bool {
    match err {
        RemoteError::Transport(_) => true,
        RemoteError::Status { status, .. } => *status >= 500,
        _ => false,
    }
}

/// Run `f` up to `attempts` times, backing off between transient failures.
pub fn with_retries<T>(
    label: &str,
    attempts: usize,
    mut f: impl FnMut() -> Result<T, RemoteError>,
) -> Result<T, RemoteError> {
    let mut attempt = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt + 1 < attempts => {
                tracing::debug!("{label} failed (attempt {}): {err}", attempt + 1);
                std::thread::sleep(Duration::from_millis(200 * (1 << attempt)));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

struct Client {
    agent: ureq::Agent,
    repo_url: String,
    branch: String,
    token: String,
    slug: String,
}

impl Client {
    fn url(&self, tail: &str) -> String {
        format!("{}/git/{tail}", self.repo_url)
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", API_VERSION)
    }

    fn get<T: DeserializeOwned>(&self, tail: &str) -> Result<T, RemoteError> {
        let url = self.url(tail);
        with_retries(&format!("GET {tail}"), READ_ATTEMPTS, || {
            let response = self.request("GET", &url).call().map_err(map_ureq)?;
            decode(response)
        })
    }

    fn send<T: DeserializeOwned>(&self, method: &str, tail: &str, body: Value) -> Result<T, RemoteError> {
        let url = self.url(tail);
        let response = self
            .request(method, &url)
            .send_json(body)
            .map_err(map_ureq)?;
        decode(response)
    }
}

fn decode<T: DeserializeOwned>(response: ureq::Response) -> Result<T, RemoteError> {
    response
        .into_json::<T>()
        .map_err(|e| RemoteError::Decode(e.to_string()))
}

/// A branch of a GitHub repository.
#[derive(Clone)]
pub struct GitHubRemote {
    client: Arc<Client>,
}

impl fmt::Debug for GitHubRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubRemote")
            .field("repo", &self.client.slug)
            .field("branch", &self.client.branch)
            .finish_non_exhaustive()
    }
}

impl GitHubRemote {
    pub fn new(spec: &RemoteSpec, token: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build();
        Self {
            client: Arc::new(Client {
                agent,
                repo_url: format!(
                    "{}/repos/{}/{}",
                    spec.api_base.trim_end_matches('/'),
                    spec.owner,
                    spec.repo
                ),
                branch: spec.branch.clone(),
                token: token.into(),
                slug: spec.slug(),
            }),
        }
    }

    /// Build a client with the token read from `spec.token_env`.
    pub fn from_env(spec: &RemoteSpec) -> Result<Self, RemoteError> {
        match std::env::var(&spec.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(Self::new(spec, token.trim())),
            _ => Err(RemoteError::Credentials(format!(
                "environment variable {} is not set",
                spec.token_env
            ))),
        }
    }

    /// URL of a git data endpoint of this repository.
    pub fn endpoint(&self, tail: &str) -> String {
        self.client.url(tail)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> Result<T, RemoteError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| RemoteError::Transport(format!("request task failed: {e}")))?
    }
}

/// Remote factory for registered vaults.
pub fn connect(vault: &Vault) -> Result<GitHubRemote, SyncError> {
    GitHubRemote::from_env(&vault.remote).map_err(|source| SyncError::Remote {
        stage: PushStage::Connect,
        source,
    })
}

#[async_trait]
impl RemoteRepo for GitHubRemote {
    fn describe(&self) -> String {
        self.client.slug.clone()
    }

    async fn ref_tip_commit(&self) -> Result<CommitSha, RemoteError> {
        self.blocking(|client| {
            let tail = format!("ref/heads/{}", client.branch);
            let response: RefResponse = client.get(&tail)?;
            Ok(CommitSha(response.object.sha))
        })
        .await
    }

    async fn commit_tree(&self, commit: &CommitSha) -> Result<TreeSha, RemoteError> {
        let tail = format!("commits/{commit}");
        self.blocking(move |client| {
            let response: CommitResponse = client.get(&tail)?;
            tracing::debug!("commit {} has tree {}", response.sha, response.tree.sha);
            Ok(TreeSha(response.tree.sha))
        })
        .await
    }

    async fn create_blob(&self, content: &[u8]) -> Result<BlobSha, RemoteError> {
        let body = blob_body(content);
        self.blocking(move |client| {
            let response: ObjectRef = client.send("POST", "blobs", body)?;
            Ok(BlobSha(response.sha))
        })
        .await
    }

    async fn create_tree(
        &self,
        nodes: &[TreeNode],
        base: &TreeSha,
    ) -> Result<TreeSha, RemoteError> {
        let body = tree_body(nodes, base);
        self.blocking(move |client| {
            let response: ObjectRef = client.send("POST", "trees", body)?;
            Ok(TreeSha(response.sha))
        })
        .await
    }

    async fn create_commit(
        &self,
        tree: &TreeSha,
        parent: &CommitSha,
        message: &str,
    ) -> Result<CommitSha, RemoteError> {
        let body = commit_body(tree, parent, message);
        self.blocking(move |client| {
            let response: ObjectRef = client.send("POST", "commits", body)?;
            Ok(CommitSha(response.sha))
        })
        .await
    }

    async fn update_ref(&self, commit: &CommitSha) -> Result<CommitSha, RemoteError> {
        let body = ref_body(commit);
        self.blocking(move |client| {
            let tail = format!("refs/heads/{}", client.branch);
            let response: RefResponse = client.send("PATCH", &tail, body)?;
            Ok(CommitSha(response.object.sha))
        })
        .await
    }
}

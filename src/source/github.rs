//! Remote repository source backed by the GitHub REST API.
//!
//! Construction is eager: the repository identifier is normalized to
//! `owner/name`, a token is resolved (explicit value first, then the `gh`
//! credential helper), and reachability/authorization is verified immediately so
//! connection failures, bad credentials and unknown repositories each fail fast
//! with their own message. Per-file fetches retry on rate limiting with
//! exponential backoff plus jitter.

use std::process::Command;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::Engine;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};

use crate::contract::{EntryKind, GitHubApi, SourceError, TreeEntry};
use crate::exclusion::ExclusionMatcher;
use crate::source::{assemble_tree, ROOT_MARKER};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("codeclip/", env!("CARGO_PKG_VERSION"));

/// Rate-limit retry ceiling (attempts, not retries).
const MAX_FETCH_ATTEMPTS: u32 = 4;
/// Backoff base: delay grows as `base^attempt` seconds before jitter.
const BACKOFF_BASE: f64 = 2.0;

pub struct RemoteSource {
    api: Box<dyn GitHubApi>,
    repo: String,
    grep: Option<String>,
    matcher: ExclusionMatcher,
    default_branch: String,
    tree: OnceCell<Vec<String>>,
}

impl RemoteSource {
    /// Normalize the repo identifier, resolve a token, verify connectivity.
    /// Every failure here is fatal for the run.
    pub async fn connect(
        repo_input: &str,
        token: Option<String>,
        grep: Option<String>,
        matcher: ExclusionMatcher,
    ) -> Result<Self> {
        let repo = normalize_repo(repo_input)?;
        let token = resolve_token(token)?;
        let api = RestClient::new(token)?;
        let default_branch = match api.default_branch(&repo).await {
            Ok(branch) => branch,
            Err(SourceError::Connection(msg)) => {
                bail!("cannot reach GitHub: {msg}")
            }
            Err(SourceError::Unauthorized(_)) => {
                bail!("GitHub rejected the token; check GITHUB_TOKEN or `gh auth status`")
            }
            Err(SourceError::NotFound(_)) => {
                bail!("repository not found: {repo}")
            }
            Err(e) => bail!("GitHub API error while verifying {repo}: {e}"),
        };
        debug!(repo = %repo, branch = %default_branch, "connected to GitHub repository");
        Ok(Self {
            api: Box::new(api),
            repo,
            grep,
            matcher,
            default_branch,
            tree: OnceCell::new(),
        })
    }

    /// Inject an API implementation; used by tests.
    pub fn with_api(
        api: Box<dyn GitHubApi>,
        repo: String,
        default_branch: String,
        grep: Option<String>,
        matcher: ExclusionMatcher,
    ) -> Self {
        Self {
            api,
            repo,
            grep,
            matcher,
            default_branch,
            tree: OnceCell::new(),
        }
    }

    pub fn matcher(&self) -> &ExclusionMatcher {
        &self.matcher
    }

    /// Lazy, memoized tree of the default branch. A failed listing degrades to
    /// an empty tree (logged) so the run ends with "no matching files".
    pub async fn tree(&self) -> Result<&Vec<String>, SourceError> {
        self.tree
            .get_or_try_init(|| async {
                // Content filter first, exclusion second (see DESIGN.md).
                let files = match &self.grep {
                    Some(pattern) => self.api.search_paths(&self.repo, pattern).await,
                    None => self
                        .api
                        .tree_entries(&self.repo, &self.default_branch)
                        .await
                        .map(|entries| {
                            entries
                                .into_iter()
                                .filter(|e| e.kind == EntryKind::Blob)
                                .map(|e| e.path)
                                .collect()
                        }),
                };
                let files = match files {
                    Ok(files) => files,
                    Err(e) => {
                        error!(repo = %self.repo, error = %e, "failed to list remote tree; continuing with empty tree");
                        Vec::new()
                    }
                };
                Ok(assemble_tree(files, &self.matcher))
            })
            .await
    }

    /// Fetch one file, retrying on rate limiting with backoff + jitter.
    /// Exhausting the ceiling surfaces the rate-limit error to the caller.
    pub async fn content(&self, path: &str) -> Result<Option<String>, SourceError> {
        if path == ROOT_MARKER || self.matcher.is_excluded(path) {
            return Ok(None);
        }
        let mut attempt = 1;
        loop {
            match self.api.file_content(&self.repo, path).await {
                Ok(body) => return Ok(Some(body)),
                Err(SourceError::RateLimited) if attempt < MAX_FETCH_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        path = path,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// `base^attempt` seconds scaled by a uniform factor in [0.5, 1.5).
fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE.powi(attempt as i32);
    let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_millis((base * factor * 1000.0) as u64)
}

/// Canonicalize heterogeneous repository-identifier input into `owner/name`.
pub fn normalize_repo(input: &str) -> Result<String> {
    let mut s = input.trim().to_string();
    for prefix in [
        "https://github.com/",
        "http://github.com/",
        "git@github.com:",
        "github.com/",
    ] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.to_string();
            break;
        }
    }
    let s = s.trim_matches('/');
    let s = s.strip_suffix(".git").unwrap_or(s);
    let parts: Vec<&str> = s.split('/').filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        [owner, name] => Ok(format!("{owner}/{name}")),
        _ => bail!("cannot parse repository identifier `{input}`; expected owner/name"),
    }
}

/// Explicit token first, then the locally-installed `gh` helper; neither is fatal.
fn resolve_token(explicit: Option<String>) -> Result<String> {
    if let Some(token) = explicit.filter(|t| !t.is_empty()) {
        return Ok(token);
    }
    if let Some(token) = token_via_gh() {
        return Ok(token);
    }
    bail!("no GitHub token found; set GITHUB_TOKEN or configure the `gh` CLI")
}

fn token_via_gh() -> Option<String> {
    debug!("resolving GitHub token via gh CLI");
    let output = Command::new("gh").args(["auth", "token"]).output().ok()?;
    if !output.status.success() {
        warn!("`gh auth token` failed; no token from the credential helper");
        return None;
    }
    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!token.is_empty()).then_some(token)
}

#[derive(Deserialize)]
struct RepoResponse {
    default_branch: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
}

#[derive(Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ContentResponse {
    content: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    path: String,
}

/// reqwest-backed production client.
pub struct RestClient {
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(token: String) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
            .context("token is not a valid header value")?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        self.send_json(self.http.get(url)).await
    }

    /// Code-search request; the query string is assembled and encoded by
    /// reqwest, never by hand.
    fn search_request(&self, repo: &str, pattern: &str) -> reqwest::RequestBuilder {
        let query = format!("{pattern} repo:{repo}");
        self.http
            .get(format!("{API_BASE}/search/code"))
            .query(&[("q", query.as_str()), ("per_page", "100")])
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SourceError> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                SourceError::Connection(e.to_string())
            } else {
                SourceError::Api(e.to_string())
            }
        })?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(response.url().to_string()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SourceError::Unauthorized(status.to_string()));
        }
        if rate_limited(status, &response) {
            return Err(SourceError::RateLimited);
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Unauthorized(status.to_string()));
        }
        if !status.is_success() {
            return Err(SourceError::Api(format!(
                "{} returned {status}",
                response.url()
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Api(e.to_string()))
    }
}

/// 429 always; 403 only when the rate-limit quota is exhausted.
fn rate_limited(status: reqwest::StatusCode, response: &reqwest::Response) -> bool {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == reqwest::StatusCode::FORBIDDEN
        && response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            == Some("0")
}

#[async_trait::async_trait]
impl GitHubApi for RestClient {
    async fn default_branch(&self, repo: &str) -> Result<String, SourceError> {
        let repo_info: RepoResponse = self.get_json(&format!("{API_BASE}/repos/{repo}")).await?;
        Ok(repo_info.default_branch)
    }

    async fn tree_entries(&self, repo: &str, branch: &str) -> Result<Vec<TreeEntry>, SourceError> {
        let listing: TreeResponse = self
            .get_json(&format!(
                "{API_BASE}/repos/{repo}/git/trees/{branch}?recursive=1"
            ))
            .await?;
        Ok(listing
            .tree
            .into_iter()
            .map(|item| TreeEntry {
                kind: if item.kind == "tree" {
                    EntryKind::Tree
                } else {
                    EntryKind::Blob
                },
                path: item.path,
            })
            .collect())
    }

    async fn file_content(&self, repo: &str, path: &str) -> Result<String, SourceError> {
        let response: ContentResponse = self
            .get_json(&format!("{API_BASE}/repos/{repo}/contents/{path}"))
            .await?;
        let packed: String = response.content.split_whitespace().collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(packed)
            .map_err(|e| SourceError::Api(format!("invalid base64 content for {path}: {e}")))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn search_paths(&self, repo: &str, pattern: &str) -> Result<Vec<String>, SourceError> {
        let results: SearchResponse = self.send_json(self.search_request(repo, pattern)).await?;
        Ok(results.items.into_iter().map(|item| item.path).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockGitHubApi;

    #[test]
    fn normalizes_all_identifier_forms() {
        for input in [
            "owner/name",
            "owner/name/",
            "/owner/name",
            "https://github.com/owner/name",
            "https://github.com/owner/name.git",
            "http://github.com/owner/name/",
            "git@github.com:owner/name.git",
            "github.com/owner/name",
        ] {
            assert_eq!(normalize_repo(input).unwrap(), "owner/name", "input: {input}");
        }
    }

    #[test]
    fn rejects_non_repo_identifiers() {
        assert!(normalize_repo("owner").is_err());
        assert!(normalize_repo("owner/name/extra").is_err());
        assert!(normalize_repo("").is_err());
    }

    #[test]
    fn search_query_encodes_utf8_patterns_bytewise() {
        let client = RestClient::new("token".to_string()).unwrap();
        let request = client
            .search_request("owner/name", "café")
            .build()
            .unwrap();
        let url = request.url().as_str();
        // é must travel as its UTF-8 bytes, not as the code point %E9.
        assert!(url.contains("caf%C3%A9"), "url: {url}");
        assert!(!url.contains("%E9+"), "url: {url}");
        assert!(url.contains("repo%3Aowner%2Fname") || url.contains("repo:owner/name"), "url: {url}");
        assert!(url.contains("per_page=100"), "url: {url}");
    }

    #[test]
    fn backoff_grows_within_the_jitter_band() {
        for attempt in 1..=3u32 {
            let delay = backoff_delay(attempt).as_millis() as f64;
            let base = BACKOFF_BASE.powi(attempt as i32) * 1000.0;
            assert!(delay >= base * 0.5 - 1.0, "attempt {attempt}: {delay}");
            assert!(delay < base * 1.5, "attempt {attempt}: {delay}");
        }
    }

    fn source_with(api: MockGitHubApi) -> RemoteSource {
        RemoteSource::with_api(
            Box::new(api),
            "owner/name".into(),
            "main".into(),
            None,
            ExclusionMatcher::new(&[]).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_twice_then_succeeds() {
        let mut api = MockGitHubApi::new();
        let mut calls = 0u32;
        api.expect_file_content()
            .times(3)
            .returning(move |_, _| {
                calls += 1;
                if calls <= 2 {
                    Err(SourceError::RateLimited)
                } else {
                    Ok("hello".to_string())
                }
            });
        let source = source_with(api);
        let body = source.content("a.txt").await.unwrap();
        assert_eq!(body.as_deref(), Some("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_exhaustion_surfaces_the_error() {
        let mut api = MockGitHubApi::new();
        api.expect_file_content()
            .times(MAX_FETCH_ATTEMPTS as usize)
            .returning(|_, _| Err(SourceError::RateLimited));
        let source = source_with(api);
        let err = source.content("a.txt").await.unwrap_err();
        assert!(matches!(err, SourceError::RateLimited));
    }

    #[tokio::test]
    async fn excluded_path_fetches_nothing_without_touching_the_api() {
        let mut api = MockGitHubApi::new();
        api.expect_file_content().never();
        let source = RemoteSource::with_api(
            Box::new(api),
            "owner/name".into(),
            "main".into(),
            None,
            ExclusionMatcher::new(&["secret.txt".to_string()]).unwrap(),
        );
        assert!(source.content("secret.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tree_lists_blobs_and_derives_directories() {
        let mut api = MockGitHubApi::new();
        api.expect_tree_entries().returning(|_, _| {
            Ok(vec![
                TreeEntry {
                    path: "src".into(),
                    kind: EntryKind::Tree,
                },
                TreeEntry {
                    path: "src/main.rs".into(),
                    kind: EntryKind::Blob,
                },
                TreeEntry {
                    path: "README.md".into(),
                    kind: EntryKind::Blob,
                },
            ])
        });
        let source = source_with(api);
        let tree = source.tree().await.unwrap();
        assert_eq!(tree[0], ROOT_MARKER);
        assert!(tree.contains(&"src/".to_string()));
        assert!(tree.contains(&"src/main.rs".to_string()));
        assert!(tree.contains(&"README.md".to_string()));
    }

    #[tokio::test]
    async fn grep_uses_code_search_then_applies_exclusion() {
        let mut api = MockGitHubApi::new();
        api.expect_search_paths()
            .withf(|repo, pattern| repo == "owner/name" && pattern == "fn main")
            .returning(|_, _| Ok(vec!["src/main.rs".into(), "assets/logo.png".into()]));
        api.expect_tree_entries().never();
        let source = RemoteSource::with_api(
            Box::new(api),
            "owner/name".into(),
            "main".into(),
            Some("fn main".into()),
            ExclusionMatcher::new(&[]).unwrap(),
        );
        let tree = source.tree().await.unwrap();
        assert!(tree.contains(&"src/main.rs".to_string()));
        assert!(!tree.contains(&"assets/logo.png".to_string()));
    }
}

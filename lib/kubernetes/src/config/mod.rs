mod file;
mod incluster;
mod tls;

use std::ffi::OsString;
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use headers::{Authorization, HeaderMapExt};
use http::Request;
use tracing::debug;

const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Errors from loading data from a base64 string or a file
#[derive(Debug, thiserror::Error)]
pub enum LoadDataError {
    /// Failed to decode base64 data
    #[error("failed to decode base64 data: {0}")]
    DecodeBase64(#[source] base64::DecodeError),

    /// Failed to read file
    #[error("failed to read file '{1:?}': {0}")]
    ReadFile(#[source] std::io::Error, PathBuf),

    /// No base64 data or file path was provided
    #[error("missing base64 data or file")]
    MissingDataOrFile,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    File(#[from] file::Error),

    #[error("no kubeconfig found and not running inside a cluster, {0}")]
    NotFound(#[source] incluster::Error),
}

struct Inner {
    token: String,
    expire_at: Instant,
}

/// A bearer token read from a file, re-read at most once a minute so rotated
/// service account tokens are picked up.
#[derive(Clone)]
pub struct RefreshableToken {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl Debug for RefreshableToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let expire_at = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .expire_at;

        f.debug_struct("RefreshableToken")
            .field("path", &self.path)
            .field("expire_at", &expire_at)
            .finish()
    }
}

impl RefreshableToken {
    pub(crate) fn new(path: PathBuf) -> std::io::Result<Self> {
        let token = std::fs::read_to_string(&path)?;

        Ok(RefreshableToken {
            path,
            inner: Arc::new(Mutex::new(Inner {
                token: token.trim().to_string(),
                expire_at: Instant::now() + Duration::from_secs(60),
            })),
        })
    }

    pub fn token(&self) -> std::io::Result<String> {
        let now = Instant::now();

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if now > inner.expire_at {
            let content = std::fs::read_to_string(&self.path)?;
            inner.token = content.trim().to_string();
            inner.expire_at = now + Duration::from_secs(60);
        }

        Ok(inner.token.clone())
    }
}

#[derive(Clone, Debug)]
pub enum Auth {
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
    RefreshableToken(RefreshableToken),
}

impl Auth {
    pub fn apply<T>(&self, req: &mut Request<T>) -> std::io::Result<()> {
        match self {
            Auth::None => {}
            Auth::Basic { username, password } => {
                req.headers_mut()
                    .typed_insert(Authorization::basic(username, password));
            }
            Auth::Bearer { token } => {
                req.headers_mut().typed_insert(bearer(token)?);
            }
            Auth::RefreshableToken(refreshable_token) => {
                let token = refreshable_token.token()?;
                req.headers_mut().typed_insert(bearer(&token)?);
            }
        }

        Ok(())
    }
}

fn bearer(token: &str) -> std::io::Result<Authorization<headers::authorization::Bearer>> {
    Authorization::bearer(token)
        .map_err(|_err| std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid bearer token"))
}

/// Everything the [`Client`](crate::Client) needs to talk to an API server:
/// where it is, who we are and which certificates to trust.
#[derive(Debug)]
pub struct Config {
    /// The configured cluster url.
    pub cluster_url: http::Uri,

    /// The configured default namespace.
    pub default_namespace: String,

    /// Stores information to tell the cluster who you are.
    pub auth: Auth,

    pub tls: rustls::ClientConfig,
}

impl Config {
    /// Load the configuration, trying in order
    ///
    /// 1. the kubeconfig at `path`, if one is given
    /// 2. each kubeconfig in the `$KUBECONFIG` path list
    /// 3. `$HOME/.kube/config`
    /// 4. the in-cluster service account
    ///
    /// An explicitly given `path` that fails to load is an error, the other
    /// kubeconfig locations fall through to the next one.
    pub fn load(path: Option<&Path>) -> Result<Config, Error> {
        if let Some(path) = path {
            return file::from_config(path).map_err(Into::into);
        }

        let candidates =
            kubeconfig_candidates(std::env::var_os(KUBECONFIG_ENV), std::env::var_os("HOME"));

        for path in candidates {
            match file::from_config(&path) {
                Ok(config) => {
                    debug!(message = "loaded kubeconfig", ?path);
                    return Ok(config);
                }
                Err(err) => {
                    debug!(message = "skip kubeconfig", ?path, %err);
                }
            }
        }

        incluster::incluster_env().map_err(Error::NotFound)
    }

    /// A plain HTTP configuration without credentials.
    pub fn insecure(cluster_url: http::Uri, default_namespace: impl Into<String>) -> Config {
        let tls = rustls::ClientConfig::builder()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();

        Config {
            cluster_url,
            default_namespace: default_namespace.into(),
            auth: Auth::None,
            tls,
        }
    }
}

/// Every entry of the `KUBECONFIG` path list, then `$HOME/.kube/config`.
/// The first one that loads is used, files are not merged.
fn kubeconfig_candidates(kubeconfig: Option<OsString>, home: Option<OsString>) -> Vec<PathBuf> {
    let mut candidates = kubeconfig
        .map(|paths| {
            std::env::split_paths(&paths)
                .filter(|path| !path.as_os_str().is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if let Some(home) = home {
        candidates.push(PathBuf::from(home).join(".kube/config"));
    }

    candidates
}

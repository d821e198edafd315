use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use http::{Method, Uri};
use hyper::body::Bytes;
use thiserror::Error;

use crate::{
    cli::Args,
    request::{Cookie, Credentials, Header},
};

/// Used as the request count when only a time limit was given.
pub const MAX_REQUESTS: usize = 50_000;
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("wrong number of arguments: {0} must be at least 1")]
    NotPositive(&'static str),
    #[error("cannot use concurrency level greater than total number of requests")]
    ConcurrencyExceedsRequests,
    #[error("invalid target url '{0}': expected http[s]://hostname[:port]/path")]
    InvalidUrl(String),
    #[error("unsupported protocol scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("failed to read body file {path}: {source}")]
    BodyFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Immutable run configuration, built once from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    pub requests: usize,
    pub concurrency: usize,
    pub time_limit: Option<Duration>,
    pub execution_timeout: Duration,

    pub method: Method,
    pub body: Option<Bytes>,
    pub content_type: String,
    pub headers: Vec<Header>,
    pub cookies: Vec<Cookie>,
    pub auth: Option<Credentials>,
    pub keep_alive: bool,
    pub gzip: bool,
    pub user_agent: String,

    pub url: Uri,
    pub host: String,
    pub port: u16,
    pub tls: bool,

    pub continue_on_error: bool,
    pub verbosity: u8,
    pub threads: usize,
}

impl Config {
    /// A GET configuration against `url` with every knob at its default.
    pub fn new(url: Uri) -> Result<Self, ConfigError> {
        let (host, port, tls) = host_and_port(&url)?;
        Ok(Config {
            requests: 1,
            concurrency: 1,
            time_limit: None,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            method: Method::GET,
            body: None,
            content_type: "text/plain".to_string(),
            headers: Vec::new(),
            cookies: Vec::new(),
            auth: None,
            keep_alive: false,
            gzip: false,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            url,
            host,
            port,
            tls,
            continue_on_error: false,
            verbosity: 0,
            threads: 1,
        })
    }

    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let mut config = Config::new(args.url)?;

        let (method, body) = match (&args.post_file, &args.put_file) {
            (Some(path), _) => (Method::POST, Some(read_body(path)?)),
            (None, Some(path)) => (Method::PUT, Some(read_body(path)?)),
            (None, None) if args.head => (Method::HEAD, None),
            (None, None) => (Method::GET, None),
        };
        config.method = method;
        config.body = body;

        config.requests = args.requests;
        config.concurrency = args.concurrency;
        if args.time_limit > 0 {
            config.time_limit = Some(Duration::from_secs(args.time_limit));
            if config.requests == 1 {
                config.requests = MAX_REQUESTS;
            }
        }
        config.execution_timeout = Duration::from_secs(args.timeout);

        config.content_type = args.content_type;
        config.headers = args.headers;
        config.cookies = args.cookies;
        config.auth = args.auth;
        config.keep_alive = args.keep_alive;
        config.gzip = args.gzip;
        config.continue_on_error = args.continue_on_error;
        config.verbosity = args.verbosity;
        config.threads = args.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.requests < 1 {
            return Err(ConfigError::NotPositive("requests"));
        }
        if self.concurrency < 1 {
            return Err(ConfigError::NotPositive("concurrency"));
        }
        if self.threads < 1 {
            return Err(ConfigError::NotPositive("threads"));
        }
        if self.execution_timeout.is_zero() {
            return Err(ConfigError::NotPositive("timeout"));
        }
        if self.concurrency > self.requests {
            return Err(ConfigError::ConcurrencyExceedsRequests);
        }
        Ok(())
    }

    /// Path and query of the target, as sent on the request line.
    pub fn request_target(&self) -> &str {
        self.url
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|pq| !pq.is_empty())
            .unwrap_or("/")
    }

    /// Value for the `Host` header.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match self.url.port_u16() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        }
    }
}

fn read_body(path: &Path) -> Result<Bytes, ConfigError> {
    fs::read(path)
        .map(Bytes::from)
        .map_err(|source| ConfigError::BodyFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Host, port and whether the target speaks TLS.
fn host_and_port(url: &Uri) -> Result<(String, u16, bool), ConfigError> {
    let (default_port, tls) = match url.scheme_str() {
        Some("http") => (80, false),
        Some("https") => (443, true),
        Some(other) => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        None => return Err(ConfigError::InvalidUrl(url.to_string())),
    };

    match url.host() {
        Some("") | None => Err(ConfigError::InvalidUrl(url.to_string())),
        Some(host) => Ok((
            host.trim_start_matches('[').trim_end_matches(']').to_string(),
            url.port_u16().unwrap_or(default_port),
            tls,
        )),
    }
}

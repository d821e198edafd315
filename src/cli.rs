use std::path::PathBuf;

use clap::Parser;
use http::Uri;

use crate::request::{Cookie, Credentials, Header};

/// Make a fixed number of HTTP requests at a fixed concurrency and report latency
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Number of requests to perform
    #[clap(short = 'n', long, default_value_t = 1)]
    pub requests: usize,
    /// Number of multiple requests to make at a time
    #[clap(short = 'c', long, default_value_t = 1)]
    pub concurrency: usize,
    /// Seconds to max. wait for responses, 0 disables the limit
    #[clap(short = 't', long = "timelimit", default_value_t = 0)]
    pub time_limit: u64,
    /// Per-request execution timeout, in seconds
    #[clap(long, default_value_t = 30)]
    pub timeout: u64,
    /// File containing data to POST. Remember also to set -T
    #[clap(short = 'p', long = "post-file")]
    pub post_file: Option<PathBuf>,
    /// File containing data to PUT. Remember also to set -T
    #[clap(short = 'u', long = "put-file")]
    pub put_file: Option<PathBuf>,
    /// Use HEAD instead of GET
    #[clap(short = 'i', long)]
    pub head: bool,
    /// Content-type header for POSTing, e.g. 'application/x-www-form-urlencoded'
    #[clap(short = 'T', long = "content-type", default_value = "text/plain")]
    pub content_type: String,
    /// Add arbitrary header line, inserted after all normal header lines (repeatable)
    ///
    /// e.g. -H 'Accept-Encoding: gzip'
    #[clap(short = 'H', long = "header")]
    pub headers: Vec<Header>,
    /// Add cookie (repeatable)
    ///
    /// e.g. -C 'Apache=1234'
    #[clap(short = 'C', long = "cookie")]
    pub cookies: Vec<Cookie>,
    /// Add Basic WWW Authentication, a colon separated username and password
    #[clap(short = 'A', long = "auth")]
    pub auth: Option<Credentials>,
    /// Use HTTP KeepAlive feature
    #[clap(short = 'k', long = "keepalive")]
    pub keep_alive: bool,
    /// Advertise gzip support to the server
    #[clap(short = 'z', long)]
    pub gzip: bool,
    /// Don't exit on the first failed request
    #[clap(short = 'r', long = "continue-on-error")]
    pub continue_on_error: bool,
    /// How much troubleshooting info to print
    #[clap(short = 'v', long, default_value_t = 0)]
    pub verbosity: u8,
    /// Number of runtime threads, defaults to the number of CPUs
    #[clap(short = 'G', long)]
    pub threads: Option<usize>,
    /// URL to benchmark, http://hostname[:port]/path
    #[clap(value_parser)]
    pub url: Uri,
}

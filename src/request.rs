use std::str::FromStr;

use anyhow::anyhow;
use base64::{engine::general_purpose::STANDARD, Engine};
use http::{
    header::{
        HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONNECTION, CONTENT_TYPE,
        COOKIE, HOST, USER_AGENT,
    },
    HeaderMap, Method, Request, Uri,
};
use hyper::{body::Bytes, Body};

use crate::config::Config;

/// One prepared request, ready for dispatch.
pub type Job = Request<Body>;

#[derive(Debug, Clone)]
pub struct Header {
    pub name: HeaderName,
    pub value: HeaderValue,
}

impl FromStr for Header {
    type Err = anyhow::Error;

    fn from_str(maybe_header: &str) -> Result<Self, Self::Err> {
        match maybe_header.split_once(':') {
            Some((name, value)) => {
                let name = HeaderName::from_str(name.trim())?;
                let value = HeaderValue::from_str(value.trim())?;
                Ok(Header { name, value })
            }
            None => Err(anyhow!(
                "'{}' is not a valid header declaration. example valid declaration: -H 'Custom: Header'",
                maybe_header
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl FromStr for Cookie {
    type Err = anyhow::Error;

    fn from_str(maybe_cookie: &str) -> Result<Self, Self::Err> {
        match maybe_cookie.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => Ok(Cookie {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            }),
            _ => Err(anyhow!(
                "'{}' is not a valid cookie. example valid cookie: -C 'Apache=1234'",
                maybe_cookie
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn header_value(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.user, self.password))
        )
    }
}

impl FromStr for Credentials {
    type Err = anyhow::Error;

    fn from_str(maybe_credentials: &str) -> Result<Self, Self::Err> {
        match maybe_credentials.split_once(':') {
            Some((user, password)) => Ok(Credentials {
                user: user.to_string(),
                password: password.to_string(),
            }),
            None => Err(anyhow!(
                "'{}' is not valid basic authentication. expected 'user:password'",
                maybe_credentials
            )),
        }
    }
}

/// The canonical request of a run. Every job is a fresh copy of it.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    method: Method,
    target: Uri,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl RequestTemplate {
    pub fn new(config: &Config) -> Result<Self, anyhow::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_str(&config.authority())?);
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)?);
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        if config.body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_str(&config.content_type)?);
        }

        let connection = if config.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        headers.insert(CONNECTION, HeaderValue::from_static(connection));

        if config.gzip {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }

        if let Some(auth) = &config.auth {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&auth.header_value())?);
        }

        if !config.cookies.is_empty() {
            let cookies = config
                .cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            headers.insert(COOKIE, HeaderValue::from_str(&cookies)?);
        }

        headers.extend(
            config
                .headers
                .iter()
                .map(|h| (h.name.clone(), h.value.clone())),
        );

        Ok(RequestTemplate {
            method: config.method.clone(),
            target: Uri::from_str(config.request_target())?,
            headers,
            body: config.body.clone(),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A fresh request; its body shares the template's immutable bytes but no reader state.
    pub fn job(&self) -> Job {
        let body = match &self.body {
            Some(bytes) => Body::from(bytes.clone()),
            None => Body::empty(),
        };
        let mut req = Request::new(body);
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.target.clone();
        *req.headers_mut() = self.headers.clone();
        req
    }
}

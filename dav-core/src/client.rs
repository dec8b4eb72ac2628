use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Body, Certificate, Client, Method, RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use url::Url;

use crate::multistatus::{self, DavResponse, Depth, Prop, PropMap};

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

#[derive(Debug, Error)]
pub enum DavError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("malformed multistatus response: {0}")]
    Xml(String),
    #[error("multistatus response contained no entries")]
    EmptyMultistatus,
    #[error("property update rejected with {0}")]
    PropertyRejected(StatusCode),
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    #[error("invalid header value: {0}")]
    InvalidHeader(String),
    #[error("failed to read trusted certificates from {path:?}: {source}")]
    TrustStore {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Auth,
    Unsupported,
    RateLimit,
    Transient,
    Permanent,
}

impl DavError {
    pub fn classification(&self) -> ErrorClass {
        match self {
            DavError::Api { status, .. } | DavError::PropertyRejected(status) => {
                classify_status(*status)
            }
            DavError::Request(_) | DavError::Io(_) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DavError::Api { status, .. } | DavError::PropertyRejected(status) => Some(*status),
            DavError::Request(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.classification() == ErrorClass::NotFound
    }
}

fn classify_status(status: StatusCode) -> ErrorClass {
    if matches!(status, StatusCode::NOT_FOUND | StatusCode::GONE) {
        ErrorClass::NotFound
    } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ErrorClass::Auth
    } else if matches!(
        status,
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
    ) {
        ErrorClass::Unsupported
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Collection URL every relative path is resolved against.
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// PEM bundle added to the trusted roots.
    pub trusted_certificates: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            trusted_certificates: None,
            timeout: None,
        }
    }
}

#[derive(Clone)]
pub struct DavClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
}

impl DavClient {
    pub fn new(config: ClientConfig) -> Result<Self, DavError> {
        let mut builder = Client::builder();
        if let Some(path) = &config.trusted_certificates {
            let pem = std::fs::read(path).map_err(|source| DavError::TrustStore {
                path: path.clone(),
                source,
            })?;
            for certificate in Certificate::from_pem_bundle(&pem)? {
                builder = builder.add_root_certificate(certificate);
            }
        }
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let mut base_url = Url::parse(&config.base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http: builder.build()?,
            base_url,
            username: config.username,
            password: config.password,
        })
    }

    pub fn with_base_url(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, DavError> {
        Self::new(ClientConfig::new(base_url, username, password))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves an already percent-encoded, root-relative path into a full URL.
    pub fn absolute_url(&self, path: &str) -> Result<Url, DavError> {
        Ok(self.base_url.join(path)?)
    }

    pub async fn propfind(
        &self,
        path: &str,
        props: &[Prop],
        depth: Depth,
    ) -> Result<Vec<DavResponse>, DavError> {
        let response = self
            .authorized(dav_method("PROPFIND")?, path)?
            .header("Depth", depth.as_header_value())
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(multistatus::propfind_body(props))
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let xml = response.text().await?;
        multistatus::parse_multistatus(&xml)
    }

    /// Depth-0 PROPFIND returning the properties of the resource itself.
    pub async fn propfind_one(&self, path: &str, props: &[Prop]) -> Result<PropMap, DavError> {
        let entry = self
            .propfind(path, props, Depth::Zero)
            .await?
            .into_iter()
            .next()
            .ok_or(DavError::EmptyMultistatus)?;
        match entry.status {
            Some(status) if !status.is_success() => Err(DavError::Api {
                status,
                body: String::new(),
            }),
            _ => Ok(entry.props),
        }
    }

    pub async fn proppatch(&self, path: &str, props: &[(Prop, String)]) -> Result<(), DavError> {
        let response = self
            .authorized(dav_method("PROPPATCH")?, path)?
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(multistatus::proppatch_body(props))
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        if response.status() == StatusCode::MULTI_STATUS {
            let xml = response.text().await?;
            let rejected = multistatus::parse_multistatus(&xml)?
                .into_iter()
                .find_map(|entry| {
                    entry
                        .rejected_status
                        .or(entry.status.filter(|status| !status.is_success()))
                });
            if let Some(status) = rejected {
                return Err(DavError::PropertyRejected(status));
            }
        }
        Ok(())
    }

    /// Issues an arbitrary request. Statuses of 400 and above are returned as errors.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Body>,
        headers: HeaderMap,
    ) -> Result<StatusCode, DavError> {
        let mut request = self.authorized(method, path)?.headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = Self::check_status(request.send().await?).await?;
        Ok(response.status())
    }

    pub async fn mkcol(&self, path: &str) -> Result<StatusCode, DavError> {
        self.request(dav_method("MKCOL")?, path, None, HeaderMap::new())
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<StatusCode, DavError> {
        self.request(Method::DELETE, path, None, HeaderMap::new())
            .await
    }

    pub async fn move_resource(&self, path: &str, destination: &Url) -> Result<StatusCode, DavError> {
        let headers = destination_headers(destination)?;
        self.request(dav_method("MOVE")?, path, None, headers).await
    }

    pub async fn copy_resource(&self, path: &str, destination: &Url) -> Result<StatusCode, DavError> {
        let headers = destination_headers(destination)?;
        self.request(dav_method("COPY")?, path, None, headers).await
    }

    /// Streams the body of `path` into `sink` chunk by chunk and returns the bytes written.
    pub async fn download<W>(&self, path: &str, sink: &mut W) -> Result<u64, DavError>
    where
        W: AsyncWrite + Unpin,
    {
        let response = self.authorized(Method::GET, path)?.send().await?;
        let response = Self::check_status(response).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;
        tracing::debug!(path, bytes = written, "download finished");
        Ok(written)
    }

    /// Uploads `len` bytes read from `file` as the whole new content of `path`.
    pub async fn upload(
        &self,
        path: &str,
        file: tokio::fs::File,
        len: u64,
    ) -> Result<StatusCode, DavError> {
        let body = Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .authorized(Method::PUT, path)?
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await?;
        let status = Self::check_status(response).await?.status();
        tracing::debug!(path, bytes = len, %status, "upload finished");
        Ok(status)
    }

    fn authorized(&self, method: Method, path: &str) -> Result<RequestBuilder, DavError> {
        let url = self.absolute_url(path)?;
        Ok(self
            .http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password)))
    }

    async fn check_status(response: Response) -> Result<Response, DavError> {
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(DavError::Api { status, body });
        }
        Ok(response)
    }
}

fn dav_method(name: &str) -> Result<Method, DavError> {
    Method::from_bytes(name.as_bytes()).map_err(|_| DavError::InvalidMethod(name.to_string()))
}

fn destination_headers(destination: &Url) -> Result<HeaderMap, DavError> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(destination.as_str())
        .map_err(|_| DavError::InvalidHeader(destination.to_string()))?;
    headers.insert("Destination", value);
    Ok(headers)
}

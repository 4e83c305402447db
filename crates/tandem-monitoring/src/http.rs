// HTTP health check implementation

use crate::{HealthCheckData, HealthCheckError, HealthCheckResult};
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// HTTP health check configuration
#[derive(Debug, Clone)]
pub struct HttpHealthCheckConfig {
    pub endpoint: String,
    pub timeout: Duration,
    /// Accepted status codes. Empty means "any 2xx".
    pub expected_status: Vec<u16>,
}

impl Default for HttpHealthCheckConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: Duration::from_secs(5),
            expected_status: Vec::new(),
        }
    }
}

impl HttpHealthCheckConfig {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_expected_status(mut self, status_codes: Vec<u16>) -> Self {
        self.expected_status = status_codes;
        self
    }

    fn accepts(&self, status: hyper::StatusCode) -> bool {
        if self.expected_status.is_empty() {
            status.is_success()
        } else {
            self.expected_status.contains(&status.as_u16())
        }
    }
}

/// Build the readiness URL for a child listening on `port`.
pub fn local_health_endpoint(port: u16, path: &str) -> String {
    if path.starts_with('/') {
        format!("http://localhost:{}{}", port, path)
    } else {
        format!("http://localhost:{}/{}", port, path)
    }
}

/// Perform HTTP health check
pub async fn check_http_health(
    endpoint: &str,
    check_timeout: Duration,
) -> HealthCheckResult<HealthCheckData> {
    let config = HttpHealthCheckConfig::new(endpoint.to_string()).with_timeout(check_timeout);

    check_http_health_with_config(&config).await
}

/// Perform HTTP health check with custom configuration
///
/// Connection failures and timeouts are reported as an unhealthy result, not
/// as an error; only a malformed endpoint is an error.
pub async fn check_http_health_with_config(
    config: &HttpHealthCheckConfig,
) -> HealthCheckResult<HealthCheckData> {
    let start_time = std::time::Instant::now();

    debug!("Starting HTTP health check: {}", config.endpoint);

    let uri: Uri = config
        .endpoint
        .parse()
        .map_err(|e| HealthCheckError::InvalidResponse {
            id: config.endpoint.clone(),
            response: format!("Invalid URI: {}", e),
        })?;

    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(HealthCheckError::InvalidResponse {
            id: config.endpoint.clone(),
            response: "URI must be absolute (http://host:port/path)".to_string(),
        });
    }

    let client = Client::builder(TokioExecutor::new()).build_http();

    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header("User-Agent", "tandem-supervisor/0.1")
        .body(Empty::<Bytes>::new())
        .map_err(|e| HealthCheckError::InvalidResponse {
            id: config.endpoint.clone(),
            response: format!("Failed to build request: {}", e),
        })?;

    let response = match timeout(config.timeout, client.request(request)).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            debug!("HTTP health check connection failed: {} - {}", config.endpoint, e);
            let elapsed = start_time.elapsed().as_millis() as u64;
            return Ok(HealthCheckData::unhealthy(
                Some(elapsed),
                format!("Connection failed: {}", e),
            ));
        }
        Err(_) => {
            debug!("HTTP health check timeout: {}", config.endpoint);
            return Ok(HealthCheckData::unhealthy(
                Some(config.timeout.as_millis() as u64),
                "Timeout",
            ));
        }
    };

    let status = response.status();
    let elapsed = start_time.elapsed().as_millis() as u64;
    let is_healthy = config.accepts(status);

    debug!(
        "HTTP health check complete: {} - status={} healthy={} time={}ms",
        config.endpoint, status, is_healthy, elapsed
    );

    if is_healthy {
        Ok(HealthCheckData::healthy(Some(elapsed)))
    } else {
        Ok(HealthCheckData::unhealthy(
            Some(elapsed),
            format!("Unexpected status code: {}", status),
        ))
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use http_body_util::Full;
    use tokio::net::TcpListener;

    /// Serve `status` for every request on an ephemeral port; returns the port.
    pub async fn serve_status(status: StatusCode) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let service = service_fn(move |_req: Request<hyper::body::Incoming>| async move {
                        Ok::<_, hyper::Error>(
                            Response::builder()
                                .status(status)
                                .body(Full::new(Bytes::from_static(b"ok")))
                                .unwrap(),
                        )
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        port
    }
}

//! Local proxy for forwarding requests

use anyhow::Result;
use reqwest::{redirect, Client, Method};
use std::time::Duration;
use tracing::{debug, warn};

use revtun_shared::protocol::{is_hop_by_hop, Headers, TunnelRequest, TunnelResponse};

/// Forwards tunnel requests to the local service
#[derive(Clone)]
pub struct Forwarder {
    client: Client,
    target: String,
}

impl Forwarder {
    pub fn new(target: &str, timeout: Duration) -> Result<Self> {
        // Redirects are the public caller's business, not ours
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            target: target.trim_end_matches('/').to_string(),
        })
    }

    /// Forward one request. Local failures become a 502 reply.
    pub async fn forward(&self, request: TunnelRequest) -> TunnelResponse {
        let id = request.id.clone();
        match self.try_forward(request).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(id = %id, error = %e, "local service request failed");
                TunnelResponse {
                    id,
                    status: 502,
                    headers: vec![("content-type".into(), "text/plain".into())],
                    body: format!("revtun: local service error: {}", e).into_bytes(),
                }
            }
        }
    }

    async fn try_forward(&self, request: TunnelRequest) -> Result<TunnelResponse> {
        let method = Method::from_bytes(request.method.as_bytes())?;
        let url = format!("{}{}", self.target, request.path);
        debug!(id = %request.id, %method, %url, "proxying");

        let mut builder = self.client.request(method, &url);
        for (key, value) in &request.headers {
            if skip_request_header(key) {
                continue;
            }
            builder = builder.header(key.as_str(), value.as_str());
        }

        let resp = builder.body(request.body).send().await?;
        let status = resp.status().as_u16();
        let headers: Headers = resp
            .headers()
            .iter()
            .filter(|(k, _)| !is_hop_by_hop(k.as_str()))
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_string(), val.to_string()))
            })
            .collect();
        let body = resp.bytes().await?.to_vec();

        Ok(TunnelResponse {
            id: request.id,
            status,
            headers,
            body,
        })
    }
}

/// Headers the local request gets from the HTTP client itself
fn skip_request_header(name: &str) -> bool {
    is_hop_by_hop(name)
        || name.eq_ignore_ascii_case("host")
        || name.eq_ignore_ascii_case("content-length")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request(id: &str, path: &str) -> TunnelRequest {
        TunnelRequest {
            id: id.into(),
            method: "GET".into(),
            path: path.into(),
            headers: vec![
                ("host".into(), "public.example.com".into()),
                ("accept".into(), "text/plain".into()),
            ],
            body: vec![],
        }
    }

    #[tokio::test]
    async fn test_forward_to_local_service() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut seen = Vec::new();
            while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            stream
                .write_all(
                    b"HTTP/1.1 201 Created\r\nX-A: 1\r\nX-A: 2\r\nContent-Length: 2\r\nConnection: close\r\n\r\nhi",
                )
                .await
                .unwrap();
            String::from_utf8_lossy(&seen).to_string()
        });

        let forwarder =
            Forwarder::new(&format!("http://127.0.0.1:{}/", port), Duration::from_secs(5)).unwrap();
        let resp = forwarder.forward(request("r1", "/hello?x=1")).await;

        let raw = server.await.unwrap();
        assert!(raw.starts_with("GET /hello?x=1 HTTP/1.1"));
        assert!(!raw.contains("public.example.com"));

        assert_eq!(resp.id, "r1");
        assert_eq!(resp.status, 201);
        let xs: Vec<_> = resp
            .headers
            .iter()
            .filter(|(k, _)| k == "x-a")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(xs, ["1", "2"]);
        assert!(!resp.headers.iter().any(|(k, _)| k == "connection"));
        assert_eq!(resp.body, b"hi");
    }

    #[tokio::test]
    async fn test_unreachable_service_yields_502() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let forwarder =
            Forwarder::new(&format!("http://127.0.0.1:{}", port), Duration::from_secs(5)).unwrap();
        let resp = forwarder.forward(request("r2", "/")).await;
        assert_eq!(resp.id, "r2");
        assert_eq!(resp.status, 502);
    }
}

//! Node HTTP surface.
//!
//! [`NodeTransport`] is one method per node endpoint so the submission
//! protocol and the scheduler can be driven against a fake in tests.
//! [`HttpTransport`] is the reqwest implementation used at runtime.

use crate::error::TransportError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use std::net::IpAddr;
use std::time::Duration;
use tessie_core::{
    NodeStatus, StatusResponse, ENDPOINT_ARG, ENDPOINT_EXECUTE, ENDPOINT_OUTPUT, ENDPOINT_STATUS,
    ENDPOINT_UPLOAD_BIN, ENDPOINT_UPLOAD_PAYLOAD, PAYLOAD_NAME_PARAM, UPLOAD_FIELD,
};
use tracing::debug;

/// Chunked body of a node's output.
pub type OutputStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn status(&self, node: IpAddr) -> Result<NodeStatus, TransportError>;

    async fn upload_binary(&self, node: IpAddr, binary: &[u8]) -> Result<(), TransportError>;

    async fn upload_payload(
        &self,
        node: IpAddr,
        name: &str,
        data: &[u8],
    ) -> Result<(), TransportError>;

    async fn send_argument(&self, node: IpAddr, argument: &str) -> Result<(), TransportError>;

    async fn execute(&self, node: IpAddr) -> Result<(), TransportError>;

    /// Opens the output body. A non-success status is reported as
    /// [`TransportError::Status`].
    async fn output(&self, node: IpAddr) -> Result<OutputStream, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    node_port: u16,
}

impl HttpTransport {
    pub fn new(node_port: u16, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, node_port })
    }

    fn url(&self, node: IpAddr, endpoint: &str) -> String {
        match node {
            IpAddr::V4(ip) => format!("http://{}:{}{}", ip, self.node_port, endpoint),
            IpAddr::V6(ip) => format!("http://[{}]:{}{}", ip, self.node_port, endpoint),
        }
    }

    async fn send(
        &self,
        endpoint: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::request(endpoint, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    fn file_form(data: &[u8]) -> Form {
        Form::new().part(UPLOAD_FIELD, Part::bytes(data.to_vec()).file_name(UPLOAD_FIELD))
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn status(&self, node: IpAddr) -> Result<NodeStatus, TransportError> {
        let request = self.client.get(self.url(node, ENDPOINT_STATUS));
        let response = self.send(ENDPOINT_STATUS, request).await?;
        let body: StatusResponse = response.json().await.map_err(|e| TransportError::Decode {
            endpoint: ENDPOINT_STATUS,
            reason: e.to_string(),
        })?;
        Ok(body.status)
    }

    async fn upload_binary(&self, node: IpAddr, binary: &[u8]) -> Result<(), TransportError> {
        let request = self
            .client
            .post(self.url(node, ENDPOINT_UPLOAD_BIN))
            .multipart(Self::file_form(binary));
        self.send(ENDPOINT_UPLOAD_BIN, request).await?;
        debug!(node = %node, bytes = binary.len(), "Binary uploaded");
        Ok(())
    }

    async fn upload_payload(
        &self,
        node: IpAddr,
        name: &str,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let request = self
            .client
            .post(self.url(node, ENDPOINT_UPLOAD_PAYLOAD))
            .query(&[(PAYLOAD_NAME_PARAM, name)])
            .multipart(Self::file_form(data));
        self.send(ENDPOINT_UPLOAD_PAYLOAD, request).await?;
        debug!(node = %node, payload = name, bytes = data.len(), "Payload uploaded");
        Ok(())
    }

    async fn send_argument(&self, node: IpAddr, argument: &str) -> Result<(), TransportError> {
        let request = self
            .client
            .post(self.url(node, ENDPOINT_ARG))
            .body(argument.to_string());
        self.send(ENDPOINT_ARG, request).await?;
        Ok(())
    }

    async fn execute(&self, node: IpAddr) -> Result<(), TransportError> {
        let request = self.client.post(self.url(node, ENDPOINT_EXECUTE));
        let response = self.send(ENDPOINT_EXECUTE, request).await?;
        if let Ok(text) = response.text().await {
            debug!(node = %node, "Execute response: {}", text.trim());
        }
        Ok(())
    }

    async fn output(&self, node: IpAddr) -> Result<OutputStream, TransportError> {
        let request = self.client.get(self.url(node, ENDPOINT_OUTPUT));
        let response = self.send(ENDPOINT_OUTPUT, request).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| TransportError::request(ENDPOINT_OUTPUT, e))
            })
            .boxed();
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{self, SimulatedNode, SimulatorConfig};
    use std::net::Ipv4Addr;

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn start_node(run_time: Duration) -> (SimulatedNode, HttpTransport) {
        let config = SimulatorConfig {
            run_time,
            ..SimulatorConfig::default()
        };
        let node = SimulatedNode::new(config);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = simulator::router(node.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        let transport = HttpTransport::new(port, Duration::from_secs(5)).unwrap();
        (node, transport)
    }

    async fn collect(stream: OutputStream) -> Vec<u8> {
        let chunks: Vec<_> = stream.collect().await;
        chunks.into_iter().flat_map(|c| c.unwrap()).collect()
    }

    #[tokio::test]
    async fn full_handoff_against_simulated_node() {
        let (node, transport) = start_node(Duration::from_millis(10)).await;

        assert_eq!(transport.status(LOCAL).await.unwrap(), NodeStatus::Available);
        transport.upload_binary(LOCAL, b"\x7fELF").await.unwrap();
        transport
            .upload_payload(LOCAL, "log file.csv", b"1,2,3")
            .await
            .unwrap();
        transport.send_argument(LOCAL, "AA:BB:CC").await.unwrap();
        transport.execute(LOCAL).await.unwrap();

        let snapshot = node.snapshot().await;
        assert_eq!(snapshot.binary_len, 4);
        assert_eq!(snapshot.payload_names, vec!["log file.csv".to_string()]);
        assert_eq!(snapshot.argument.as_deref(), Some("AA:BB:CC"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let output = collect(transport.output(LOCAL).await.unwrap()).await;
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Argument given: AA:BB:CC"));
        assert_eq!(transport.status(LOCAL).await.unwrap(), NodeStatus::Available);
    }

    #[tokio::test]
    async fn output_before_completion_is_a_status_error() {
        let (_node, transport) = start_node(Duration::from_secs(30)).await;
        let err = match transport.output(LOCAL).await {
            Err(e) => e,
            Ok(_) => panic!("output should not be ready"),
        };
        assert!(err.is_status());

        transport.upload_binary(LOCAL, b"bin").await.unwrap();
        transport.execute(LOCAL).await.unwrap();
        assert_eq!(transport.status(LOCAL).await.unwrap(), NodeStatus::Busy);
    }

    #[tokio::test]
    async fn execute_without_binary_is_rejected() {
        let (_node, transport) = start_node(Duration::from_millis(10)).await;
        let err = transport.execute(LOCAL).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Status {
                endpoint: ENDPOINT_EXECUTE,
                status: 400
            }
        ));
    }

    #[tokio::test]
    async fn unreachable_node_is_a_request_error() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = HttpTransport::new(port, Duration::from_secs(2)).unwrap();
        let err = transport.status(LOCAL).await.unwrap_err();
        assert!(matches!(err, TransportError::Request { .. }));
    }
}

//! In-memory node transport for protocol and scheduler tests.

use crate::error::TransportError;
use crate::transport::{NodeTransport, OutputStream};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use tessie_core::{
    NodeStatus, ENDPOINT_ARG, ENDPOINT_EXECUTE, ENDPOINT_OUTPUT, ENDPOINT_STATUS,
    ENDPOINT_UPLOAD_BIN, ENDPOINT_UPLOAD_PAYLOAD,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Status,
    UploadBinary,
    UploadPayload(String),
    SendArgument(String),
    Execute,
    Output,
}

impl Call {
    fn endpoint(&self) -> &'static str {
        match self {
            Call::Status => ENDPOINT_STATUS,
            Call::UploadBinary => ENDPOINT_UPLOAD_BIN,
            Call::UploadPayload(_) => ENDPOINT_UPLOAD_PAYLOAD,
            Call::SendArgument(_) => ENDPOINT_ARG,
            Call::Execute => ENDPOINT_EXECUTE,
            Call::Output => ENDPOINT_OUTPUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// The node answers HTTP 500.
    Status,
    /// No HTTP answer at all.
    Transport,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<(IpAddr, Call)>,
    faults: Vec<(IpAddr, Call, Fault)>,
    cut_outputs: Vec<IpAddr>,
    statuses: HashMap<IpAddr, NodeStatus>,
    outputs: HashMap<IpAddr, Vec<u8>>,
    executed_arguments: HashMap<IpAddr, Vec<Option<String>>>,
    pending_argument: HashMap<IpAddr, String>,
    auto_complete: Vec<IpAddr>,
}

/// Records every call. Nodes report `available` unless told otherwise and
/// have no output until one is set; `execute` replaces any previous output.
/// Faults are one-shot and consumed by the first matching call.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, node: IpAddr, status: NodeStatus) {
        self.state.lock().unwrap().statuses.insert(node, status);
    }

    pub fn set_output(&self, node: IpAddr, output: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .outputs
            .insert(node, output.to_vec());
    }

    /// `node` finishes instantly: every execute leaves output behind.
    pub fn auto_complete(&self, node: IpAddr) {
        self.state.lock().unwrap().auto_complete.push(node);
    }

    /// The next matching call to `node` answers HTTP 500.
    pub fn fail_next(&self, node: IpAddr, call: Call) {
        self.state
            .lock()
            .unwrap()
            .faults
            .push((node, call, Fault::Status));
    }

    /// The next matching call to `node` fails without an HTTP status.
    pub fn break_next(&self, node: IpAddr, call: Call) {
        self.state
            .lock()
            .unwrap()
            .faults
            .push((node, call, Fault::Transport));
    }

    /// The next output body from `node` breaks off after its first chunk.
    pub fn cut_output_next(&self, node: IpAddr) {
        self.state.lock().unwrap().cut_outputs.push(node);
    }

    pub fn calls_for(&self, node: IpAddr) -> Vec<Call> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(addr, _)| *addr == node)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn count(&self, node: IpAddr, call: &Call) -> usize {
        self.calls_for(node).iter().filter(|c| *c == call).count()
    }

    /// Arguments of every successful execute on `node`, in order.
    pub fn executed(&self, node: IpAddr) -> Vec<Option<String>> {
        self.state
            .lock()
            .unwrap()
            .executed_arguments
            .get(&node)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, node: IpAddr, call: Call) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((node, call.clone()));
        let Some(pos) = state
            .faults
            .iter()
            .position(|(addr, failing, _)| *addr == node && *failing == call)
        else {
            return Ok(());
        };
        let (_, _, fault) = state.faults.remove(pos);
        Err(match fault {
            Fault::Status => TransportError::Status {
                endpoint: call.endpoint(),
                status: 500,
            },
            Fault::Transport => TransportError::Decode {
                endpoint: call.endpoint(),
                reason: "connection reset by peer".to_string(),
            },
        })
    }
}

#[async_trait]
impl NodeTransport for FakeTransport {
    async fn status(&self, node: IpAddr) -> Result<NodeStatus, TransportError> {
        self.record(node, Call::Status)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .statuses
            .get(&node)
            .copied()
            .unwrap_or(NodeStatus::Available))
    }

    async fn upload_binary(&self, node: IpAddr, _binary: &[u8]) -> Result<(), TransportError> {
        self.record(node, Call::UploadBinary)
    }

    async fn upload_payload(
        &self,
        node: IpAddr,
        name: &str,
        _data: &[u8],
    ) -> Result<(), TransportError> {
        self.record(node, Call::UploadPayload(name.to_string()))
    }

    async fn send_argument(&self, node: IpAddr, argument: &str) -> Result<(), TransportError> {
        self.record(node, Call::SendArgument(argument.to_string()))?;
        self.state
            .lock()
            .unwrap()
            .pending_argument
            .insert(node, argument.to_string());
        Ok(())
    }

    async fn execute(&self, node: IpAddr) -> Result<(), TransportError> {
        self.record(node, Call::Execute)?;
        let mut state = self.state.lock().unwrap();
        state.outputs.remove(&node);
        let argument = state.pending_argument.remove(&node);
        if state.auto_complete.contains(&node) {
            let output = format!("Argument given: {}\n", argument.as_deref().unwrap_or(""));
            state.outputs.insert(node, output.into_bytes());
        }
        state
            .executed_arguments
            .entry(node)
            .or_default()
            .push(argument);
        Ok(())
    }

    async fn output(&self, node: IpAddr) -> Result<OutputStream, TransportError> {
        self.record(node, Call::Output)?;
        let mut state = self.state.lock().unwrap();
        let cut = match state.cut_outputs.iter().position(|addr| *addr == node) {
            Some(pos) if state.outputs.contains_key(&node) => {
                state.cut_outputs.remove(pos);
                true
            }
            _ => false,
        };
        match state.outputs.get(&node) {
            Some(bytes) => {
                let mut chunks: Vec<Result<Vec<u8>, TransportError>> =
                    bytes.chunks(4).map(|c| Ok(c.to_vec())).collect();
                if cut {
                    chunks.truncate(1);
                    chunks.push(Err(TransportError::Decode {
                        endpoint: ENDPOINT_OUTPUT,
                        reason: "body ended early".to_string(),
                    }));
                }
                Ok(futures::stream::iter(chunks).boxed())
            }
            None => Err(TransportError::Status {
                endpoint: ENDPOINT_OUTPUT,
                status: 404,
            }),
        }
    }
}

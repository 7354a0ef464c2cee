use crate::error::{SubmitError, SubmitStep, TransportError};
use crate::task::Task;
use crate::transport::NodeTransport;
use std::net::IpAddr;
use tracing::{debug, info};

/// Hands `task` to `node`: binary, payloads in order, argument, execute.
///
/// Stops at the first failing step. Steps already completed on the node are
/// not rolled back; the caller requeues the whole task.
pub async fn submit<T>(transport: &T, node: IpAddr, task: &Task) -> Result<(), SubmitError>
where
    T: NodeTransport + ?Sized,
{
    info!(node = %node, "Submitting {}", task);

    transport
        .upload_binary(node, &task.binary)
        .await
        .map_err(at(SubmitStep::UploadBinary))?;

    for payload in &task.payloads {
        transport
            .upload_payload(node, &payload.name, &payload.data)
            .await
            .map_err(at(SubmitStep::UploadPayload(payload.name.clone())))?;
    }

    // An empty argument is the same as none.
    if let Some(argument) = task.argument.as_deref().filter(|a| !a.is_empty()) {
        transport
            .send_argument(node, argument)
            .await
            .map_err(at(SubmitStep::SendArgument))?;
    }

    transport
        .execute(node)
        .await
        .map_err(at(SubmitStep::Execute))?;

    debug!(node = %node, task = %task.id, "Execute acknowledged");
    Ok(())
}

fn at(step: SubmitStep) -> impl FnOnce(TransportError) -> SubmitError {
    move |source| SubmitError { step, source }
}

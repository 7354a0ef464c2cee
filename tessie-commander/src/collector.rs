use crate::error::CollectError;
use crate::transport::{NodeTransport, OutputStream};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Output retrieved from one node, stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub node: IpAddr,
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

pub struct OutputCollector {
    root_dir: PathBuf,
}

impl OutputCollector {
    pub async fn new(root_dir: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let root_dir = root_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root_dir).await?;
        Ok(Self { root_dir })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Fetches the node's output into a new artifact file.
    ///
    /// `Ok(None)` means the node answered but has nothing to hand over yet.
    pub async fn fetch<T>(&self, transport: &T, node: IpAddr) -> Result<Option<Artifact>, CollectError>
    where
        T: NodeTransport + ?Sized,
    {
        let stream = match transport.output(node).await {
            Ok(stream) => stream,
            Err(e) if e.is_status() => {
                debug!(node = %node, "No output available: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let (path, mut file) = self.create_artifact_file(node).await?;
        match copy_stream(stream, &mut file).await {
            Ok((bytes, sha256)) => Ok(Some(Artifact {
                node,
                path,
                bytes,
                sha256,
            })),
            Err(e) => {
                drop(file);
                if let Err(remove) = fs::remove_file(&path).await {
                    debug!(path = %path.display(), "Could not remove partial artifact: {}", remove);
                }
                Err(e)
            }
        }
    }

    async fn create_artifact_file(&self, node: IpAddr) -> Result<(PathBuf, fs::File), std::io::Error> {
        let stem = artifact_stem(node, SystemTime::now());
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}.txt", stem)
            } else {
                format!("{}-{}.txt", stem, attempt)
            };
            let path = self.root_dir.join(name);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Streams `output` into `sink`, returning the byte count and hex SHA-256.
async fn copy_stream<W>(mut output: OutputStream, sink: &mut W) -> Result<(u64, String), CollectError>
where
    W: AsyncWrite + Unpin,
{
    let mut hasher = Sha256::new();
    let mut bytes = 0u64;
    while let Some(chunk) = output.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        bytes += chunk.len() as u64;
        sink.write_all(&chunk).await?;
    }
    sink.flush().await?;
    Ok((bytes, hex::encode(hasher.finalize())))
}

fn artifact_stem(node: IpAddr, at: SystemTime) -> String {
    let millis = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let node = node.to_string().replace(['.', ':'], "_");
    format!("output_from_{}_{}", node, millis)
}

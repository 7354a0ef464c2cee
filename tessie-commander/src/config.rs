//! Command line and runtime configuration.

use crate::discovery::DiscoveryConfig;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tessie_core::BROADCAST_PORT;

#[derive(Parser, Debug)]
#[command(
    name = "tessie",
    author,
    version,
    about = "Dispatch task binaries to a fleet of discovered nodes",
    after_help = "EXAMPLES:\n    \
        # Listen for active nodes\n    \
        tessie listen\n\n    \
        # Submit a task without payload and argument\n    \
        tessie submit -b task.elf\n\n    \
        # One task per payload\n    \
        tessie submit -b task.elf -f logfile1.csv logfile2.csv\n\n    \
        # One task per argument\n    \
        tessie submit -b task.elf -a AA:BB:CC:DD:EE:FF 11:22:33:44:55:66\n\n    \
        # Payloads paired with arguments\n    \
        tessie submit -b task.elf -f logfile1.csv logfile2.csv -a A B\n\n    \
        # Collect whatever output the nodes are holding\n    \
        tessie retrieve"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub commander: CommanderConfig,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Only listen for nodes and report their status
    Listen,
    /// Submit a task binary, fanned out over payloads and arguments
    Submit {
        /// Path to the binary file to submit (e.g. task.elf)
        #[arg(short = 'b', long)]
        binary: PathBuf,

        /// Payload files to upload with each task
        #[arg(short = 'f', long, num_args = 1..)]
        payloads: Vec<PathBuf>,

        /// Arguments, one per task (e.g. MAC addresses, config values)
        #[arg(short = 'a', long, num_args = 1..)]
        arguments: Vec<String>,
    },
    /// Retrieve task outputs from discovered nodes
    Retrieve,
    /// Run a simulated node
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CommanderConfig {
    /// UDP port nodes broadcast advertisements on
    #[arg(long, env = "TESSIE_PORT", default_value_t = BROADCAST_PORT, global = true)]
    pub port: u16,

    /// Seconds to listen for advertisements
    #[arg(long, env = "TESSIE_LISTEN_WINDOW", default_value_t = 5, global = true)]
    pub listen_window: u64,

    /// Milliseconds between scheduler ticks
    #[arg(long, env = "TESSIE_POLL_INTERVAL", default_value_t = 1000, global = true)]
    pub poll_interval: u64,

    /// HTTP port of the node surface
    #[arg(long, env = "TESSIE_NODE_PORT", default_value_t = 80, global = true)]
    pub node_port: u16,

    /// Per-request timeout in seconds
    #[arg(long, env = "TESSIE_REQUEST_TIMEOUT", default_value_t = 30, global = true)]
    pub request_timeout: u64,

    /// Directory collected output is written to
    #[arg(long, env = "TESSIE_OUTPUT_DIR", default_value = ".", global = true)]
    pub output_dir: PathBuf,
}

impl CommanderConfig {
    pub fn discovery(&self) -> DiscoveryConfig {
        let window = Duration::from_secs(self.listen_window);
        DiscoveryConfig {
            port: self.port,
            window,
            receive_timeout: window,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Port to serve the node HTTP surface on
    #[arg(long, default_value_t = 8080)]
    pub http_port: u16,

    /// Node name to advertise
    #[arg(long, default_value = "tessie-sim")]
    pub name: String,

    /// Hardware identifier to advertise
    #[arg(long, default_value = "02:00:00:00:00:01")]
    pub mac: String,

    /// How long a simulated task runs, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub run_time_ms: u64,

    /// Where advertisements are sent
    #[arg(long, default_value_t = SocketAddr::from(([255, 255, 255, 255], BROADCAST_PORT)))]
    pub advertise_to: SocketAddr,

    /// Milliseconds between advertisements
    #[arg(long, default_value_t = 1000)]
    pub advertise_interval_ms: u64,
}

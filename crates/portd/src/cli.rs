//! Command-line interface for the `portd` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use portd::PortNumber;

#[derive(Parser, Debug)]
#[command(name = "portd", version, about, disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) hosts: HostArgs,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Where hosts live on disk.
#[derive(Args, Debug, Clone)]
pub(crate) struct HostArgs {
    /// Directory holding one subdirectory per host.
    #[arg(long, global = true, env = "PORTD_ROOT", default_value = "hosts")]
    pub(crate) root: PathBuf,
    /// Host that files are deployed from.
    #[arg(long, global = true, env = "PORTD_HOME", default_value = "home")]
    pub(crate) home: String,
}

/// Slot directory shared by the port utilities.
#[derive(Args, Debug, Clone)]
pub(crate) struct PortArgs {
    /// Slot number.
    #[arg(long, default_value = "1")]
    pub(crate) port: PortNumber,
    #[arg(long, env = "PORTD_PORT_DIR", default_value = "hosts/.ports")]
    pub(crate) port_dir: PathBuf,
    /// Records kept per slot before the oldest is dropped.
    #[arg(long, env = "PORTD_PORT_CAPACITY", default_value_t = portd::port::DEFAULT_PORT_CAPACITY)]
    pub(crate) capacity: usize,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Serve commands from a control connection until it closes.
    Daemon {
        /// Name of the host this daemon runs on.
        #[arg(long, env = "PORTD_SERVER")]
        server: String,
        /// Control endpoint: ws://, wss://, tcp:// or unix://.
        #[arg(long, env = "PORTD_URL", default_value = "ws://localhost:8082/")]
        url: String,
        /// Seconds between keep-alive ticks.
        #[arg(long, env = "PORTD_KEEPALIVE_SECS", default_value_t = 5)]
        keepalive_secs: u64,
        /// Seconds an in-flight command may run after the connection closes.
        #[arg(long, env = "PORTD_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
        shutdown_grace_secs: u64,
    },
    /// Copy a script to a host and start it there.
    Bootstrap {
        #[arg(long, default_value = "n00dles")]
        target: String,
        #[arg(long, default_value = "bin/daemon.sh")]
        script: String,
        #[arg(long, default_value_t = 1)]
        threads: u32,
        /// Extra file to deploy alongside the script. Repeatable.
        #[arg(long = "with", value_name = "FILE")]
        support_files: Vec<String>,
        /// Arguments passed to the script.
        #[arg(last = true, value_name = "ARG")]
        args: Vec<String>,
    },
    /// Print the next envelope on a slot, or `null`.
    ReadPort {
        #[command(flatten)]
        port: PortArgs,
    },
    /// Describe a host and leave the answer on a slot.
    GetServer {
        #[command(flatten)]
        port: PortArgs,
        /// Correlation id for the response. Defaults to a fresh UUID.
        #[arg(long)]
        id: Option<String>,
        /// Host to describe.
        #[arg(long)]
        request: String,
    },
    /// Download the script manifest and every file it lists.
    Pull {
        #[arg(long, env = "PORTD_PULL_BASE_URL", default_value = "http://localhost:9182")]
        base_url: String,
        #[arg(long, default_value = "/resources/manifest.txt")]
        manifest: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_flags() {
        let cli = Cli::try_parse_from(["portd", "daemon", "--server", "home"]).unwrap();
        let CliCommand::Daemon { server, url, .. } = cli.command else {
            panic!("expected daemon command");
        };
        assert_eq!(server, "home");
        assert_eq!(url, "ws://localhost:8082/");
        assert_eq!(cli.hosts.root, PathBuf::from("hosts"));
    }

    #[test]
    fn bootstrap_collects_support_files_and_args() {
        let cli = Cli::try_parse_from([
            "portd",
            "bootstrap",
            "--target",
            "foodnstuff",
            "--with",
            "lib/a.sh",
            "--with",
            "lib/b.sh",
            "--",
            "--server",
            "foodnstuff",
        ])
        .unwrap();
        let CliCommand::Bootstrap {
            target,
            script,
            support_files,
            args,
            ..
        } = cli.command
        else {
            panic!("expected bootstrap command");
        };
        assert_eq!(target, "foodnstuff");
        assert_eq!(script, "bin/daemon.sh");
        assert_eq!(support_files, vec!["lib/a.sh", "lib/b.sh"]);
        assert_eq!(args, vec!["--server", "foodnstuff"]);
    }

    #[test]
    fn port_zero_is_rejected() {
        assert!(Cli::try_parse_from(["portd", "read-port", "--port", "0"]).is_err());
        let cli = Cli::try_parse_from(["portd", "read-port", "--port", "3"]).unwrap();
        let CliCommand::ReadPort { port } = cli.command else {
            panic!("expected read-port command");
        };
        assert_eq!(port.port.get(), 3);
    }
}

use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay hub for the controller and monitor screens.
    Serve(ServeArgs),
    /// Drive a running relay from the keyboard instead of the hardware controller.
    Simulate(SimulateArgs),
}

/// Flags override the config file and `KIOSK_RELAY_*` environment variables.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// TOML file with relay settings.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address for the newline-delimited JSON listener. Use port 0 for an ephemeral port.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Address for the HTTP/WebSocket listener used by the browser screens.
    #[arg(long)]
    pub ws_listen: Option<SocketAddr>,

    /// Serial device the hardware controller is attached to, e.g. /dev/ttyACM0.
    #[arg(long)]
    pub input_device: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Line-protocol address of the relay.
    #[arg(long, default_value = "127.0.0.1:3001")]
    pub server: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_are_optional() {
        let cli = Cli::try_parse_from(["kiosk-relay", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert!(args.listen.is_none());
        assert!(args.input_device.is_none());
    }

    #[test]
    fn serve_accepts_overrides() {
        let cli = Cli::try_parse_from([
            "kiosk-relay",
            "serve",
            "--listen",
            "127.0.0.1:0",
            "--ws-listen",
            "127.0.0.1:8080",
            "--input-device",
            "/dev/ttyACM0",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.listen, Some("127.0.0.1:0".parse().unwrap()));
        assert_eq!(args.ws_listen, Some("127.0.0.1:8080".parse().unwrap()));
        assert_eq!(args.input_device, Some(PathBuf::from("/dev/ttyACM0")));
    }

    #[test]
    fn simulate_defaults_to_local_relay() {
        let cli = Cli::try_parse_from(["kiosk-relay", "simulate"]).unwrap();
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.server, "127.0.0.1:3001".parse().unwrap());
    }
}

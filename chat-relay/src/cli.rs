use clap::Parser;

pub const DEFAULT_PORT: u16 = 5000;

/// Line-oriented TCP chat relay.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TCP port to listen on. Use 0 for an ephemeral port.
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_defaults_to_5000() {
        let cli = Cli::try_parse_from(["chat-relay"]).expect("parse");
        assert_eq!(cli.port, DEFAULT_PORT);
    }

    #[test]
    fn port_is_positional() {
        let cli = Cli::try_parse_from(["chat-relay", "6000"]).expect("parse");
        assert_eq!(cli.port, 6000);
    }

    #[test]
    fn invalid_ports_are_rejected() {
        assert!(Cli::try_parse_from(["chat-relay", "not-a-port"]).is_err());
        assert!(Cli::try_parse_from(["chat-relay", "70000"]).is_err());
        assert!(Cli::try_parse_from(["chat-relay", "5000", "6000"]).is_err());
    }
}

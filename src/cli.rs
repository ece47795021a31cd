use clap::builder::styling::{AnsiColor, Color, Styles};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .usage(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .literal(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .placeholder(anstyle::Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
}

#[derive(Parser, Debug)]
#[command(name = "mqttstat")]
#[command(about = "Per-phase latency of an MQTT connection", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
#[command(styles = help_styles())]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Scenario>,
}

/// Connection and round options shared by every scenario. Unset values fall back to
/// the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Broker address: [tcp|mqtt|tls|ssl|mqtts]://host:port or host:port
    #[arg(long, short = 's', global = true, value_name = "url", help_heading = "Connection")]
    pub server: Option<String>,

    #[arg(long, short = 'u', global = true, help_heading = "Connection")]
    pub username: Option<String>,

    #[arg(long, short = 'p', global = true, help_heading = "Connection")]
    pub password: Option<String>,

    #[arg(long, short = 'i', global = true, help_heading = "Connection")]
    pub client_id: Option<String>,

    #[arg(long, global = true, value_name = "bool", help_heading = "Connection")]
    pub clean_session: Option<bool>,

    #[arg(long, global = true, value_name = "secs", help_heading = "Connection")]
    pub keep_alive: Option<u16>,

    /// Number of measured rounds
    #[arg(long, short = 'c', global = true, help_heading = "Rounds")]
    pub count: Option<u32>,

    /// Pause between rounds in milliseconds
    #[arg(long, short = 'd', global = true, value_name = "ms", help_heading = "Rounds")]
    pub delay: Option<u64>,

    /// Redraw the report in place until interrupted
    #[arg(long, global = true, help_heading = "Rounds")]
    pub inplace: bool,

    /// Dump raw milestones
    #[arg(long, short = 't', global = true, help_heading = "Rounds")]
    pub trace: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "path", help_heading = "Rounds")]
    pub config: Option<PathBuf>,

    #[arg(long = "tcp-keepalive", global = true, value_name = "bool", help_heading = "Transport")]
    pub tcp_keepalive: Option<bool>,

    #[arg(long = "tcp-nodelay", global = true, value_name = "bool", help_heading = "Transport")]
    pub tcp_nodelay: Option<bool>,

    #[arg(long = "tcp-linger", global = true, value_name = "secs", help_heading = "Transport")]
    pub tcp_linger: Option<u64>,

    #[arg(long = "tcp-rcvbuf", global = true, value_name = "bytes", help_heading = "Transport")]
    pub tcp_recv_buffer: Option<u32>,

    #[arg(long = "tcp-sndbuf", global = true, value_name = "bytes", help_heading = "Transport")]
    pub tcp_send_buffer: Option<u32>,

    #[arg(long = "tls-skip-verify", global = true, value_name = "bool", help_heading = "Transport")]
    pub tls_skip_verify: Option<bool>,

    /// Reuse TLS sessions across rounds (forces at least two rounds)
    #[arg(long = "tls-session-ticket", global = true, help_heading = "Transport")]
    pub tls_session_ticket: bool,

    /// PEM file with trusted roots
    #[arg(long = "tls-ca-file", global = true, value_name = "path", help_heading = "Transport")]
    pub tls_ca_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    /// Publish one message and wait for its delivery
    Publish {
        #[arg(long, default_value = "/mqttstat")]
        topic: String,

        #[arg(long, short = 'm', default_value = "mqttstat test")]
        message: String,

        #[arg(long, short = 'q', default_value_t = 1)]
        qos: u8,

        /// Print the exchanged packets
        #[arg(long, short = 'v')]
        verbose: bool,
    },
    /// Subscribe to topics, optionally publish to the first and wait for a message
    Subscribe {
        /// Comma separated topic filters
        #[arg(long, value_delimiter = ',', default_value = "/mqttstat")]
        topic: Vec<String>,

        /// Comma separated QoS levels, one per topic
        #[arg(long, short = 'q', value_delimiter = ',', default_value = "1")]
        qos: Vec<u8>,

        /// Base64 payload published at QoS 1 to the first topic after subscribing
        #[arg(long = "pub", value_name = "base64")]
        publish: Option<String>,

        /// Wait for the first inbound message
        #[arg(long, short = 'w')]
        wait: bool,

        #[arg(long, short = 'v')]
        verbose: bool,
    },
    /// One PINGREQ/PINGRESP exchange
    Ping {
        #[arg(long, short = 'v')]
        verbose: bool,
    },
}

impl Scenario {
    pub fn verbose(&self) -> bool {
        match self {
            Scenario::Publish { verbose, .. }
            | Scenario::Subscribe { verbose, .. }
            | Scenario::Ping { verbose } => *verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_subscribe_lists() {
        let cli = Cli::try_parse_from([
            "mqttstat",
            "--server",
            "tls://broker:8883",
            "subscribe",
            "--topic",
            "a/b,c/d",
            "--qos",
            "1,0",
            "--pub",
            "aGVsbG8=",
            "--wait",
        ])
        .unwrap();

        assert_eq!(cli.global.server.as_deref(), Some("tls://broker:8883"));
        assert_eq!(
            cli.command,
            Some(Scenario::Subscribe {
                topic: vec!["a/b".to_string(), "c/d".to_string()],
                qos: vec![1, 0],
                publish: Some("aGVsbG8=".to_string()),
                wait: true,
                verbose: false,
            })
        );
    }

    #[test]
    fn scenarios_default_to_the_mqttstat_topic() {
        let cli = Cli::try_parse_from(["mqttstat", "publish"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Scenario::Publish {
                topic: "/mqttstat".to_string(),
                message: "mqttstat test".to_string(),
                qos: 1,
                verbose: false,
            })
        );

        let cli = Cli::try_parse_from(["mqttstat", "subscribe"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Scenario::Subscribe {
                topic: vec!["/mqttstat".to_string()],
                qos: vec![1],
                publish: None,
                wait: false,
                verbose: false,
            })
        );
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["mqttstat", "ping", "-v", "--count", "3", "--trace"]).unwrap();
        assert_eq!(cli.global.count, Some(3));
        assert!(cli.global.trace);
        assert_eq!(cli.command, Some(Scenario::Ping { verbose: true }));
    }

    #[test]
    fn no_subcommand_means_connect_only() {
        let cli = Cli::try_parse_from(["mqttstat", "--clean-session", "false"]).unwrap();
        assert_eq!(cli.global.clean_session, Some(false));
        assert!(cli.command.is_none());
    }
}

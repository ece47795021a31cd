pub mod cli;
pub mod config;
pub mod mqtt;
pub mod report;
pub mod scenario;
pub mod terminal;
pub mod trace;

use clap::Parser;
use color_eyre::Result;
use rumqttc::tokio_rustls::TlsConnector;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::cli::{Cli, Scenario};
use crate::config::AppConfig;
use crate::mqtt::transport::{self, Target};
use crate::mqtt::{ClientConfig, Idle, Session};
use crate::report::{render_report, render_trace, segment, ReportHeader};
use crate::scenario::{Outcome, ScenarioError};
use crate::terminal::Terminal;
use crate::trace::TraceRecorder;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup()?;

    let config = AppConfig::load(cli.global.config.as_deref())
        .await?
        .merge(&cli.global);
    info!("Measuring {} ({} round(s))", config.server, config.count);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let terminal = Terminal::detect();
    debug!("Color output: {}", terminal.supports_color());
    if config.inplace {
        print!("{}", terminal.hide_cursor());
    }
    let result = run_rounds(&config, cli.command.as_ref(), &cancel, terminal).await;
    if config.inplace {
        print!("{}", terminal.show_cursor());
    }
    result
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    // stdout carries only the report
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

async fn run_rounds(
    config: &AppConfig,
    scenario: Option<&Scenario>,
    cancel: &CancellationToken,
    terminal: Terminal,
) -> Result<()> {
    let client = Arc::new(config.client.clone());
    let target: Target = config.server.parse()?;
    let shared_tls = if target.is_secure() && client.tls.session_ticket {
        Some(transport::tls_connector(&client.tls)?)
    } else {
        None
    };

    let mut round = 0u32;
    loop {
        round += 1;
        let report = match measure(config, &client, shared_tls.as_ref(), scenario, cancel, terminal).await {
            Ok(report) => report,
            Err(e) if config.inplace && cancel.is_cancelled() => {
                debug!("Stopping in-place rounds: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if config.inplace {
            print!("{}{}", terminal.cursor_home(), terminal.clear_screen());
        }
        if config.count > 1 || config.inplace {
            println!("{}\n", terminal.emphasize(&format!("Round {}", round)));
        }
        print!("{}", report);

        if !config.inplace && round >= config.count {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(config.delay()) => {}
        }
    }
}

/// One attempt: fresh recorder and session, then the rendered report
async fn measure(
    config: &AppConfig,
    client: &Arc<ClientConfig>,
    tls: Option<&TlsConnector>,
    scenario: Option<&Scenario>,
    cancel: &CancellationToken,
    terminal: Terminal,
) -> Result<String> {
    let recorder = TraceRecorder::new();
    let mut session = Session::create(client.clone(), recorder.clone(), cancel.child_token());
    if let Some(connector) = tls {
        session = session.with_tls_connector(connector.clone());
    }

    let attempt = exchange(session, &config.server, scenario).await;

    let (outcome, local) = match attempt {
        Ok(done) => done,
        Err(e) => {
            warn!("Attempt failed: {}", e);
            if config.trace && !recorder.is_empty() {
                print!("{}", render_trace(&recorder.points()));
            }
            return Err(e.into());
        }
    };

    let stat = segment(&recorder.points())?;
    debug!("Attempt took {:?} over {} phase(s)", stat.total(), stat.fields.len());

    let header = ReportHeader {
        server: &config.server,
        local,
        username: &client.username,
        password: &client.password,
        client_id: &client.client_id,
        clean_session: client.clean_session,
    };
    let mut report = String::new();
    if config.trace {
        report.push_str(&render_trace(&recorder.points()));
        report.push('\n');
    }
    report.push_str(&render_report(&header, &stat, &terminal));
    for note in outcome.notes {
        report.push_str(&note);
        report.push('\n');
    }
    Ok(report)
}

async fn exchange(
    session: Session<Idle>,
    server: &str,
    scenario: Option<&Scenario>,
) -> Result<(Outcome, Option<SocketAddr>), ScenarioError> {
    let mut connected = session.dial(server).await?;
    let outcome = crate::scenario::run(&mut connected, scenario).await;
    let local = connected.local_addr();
    connected.disconnect().await;
    Ok((outcome?, local))
}

use chrono::{DateTime, Local};
use color_eyre::{eyre::eyre, Result};
use mqttpanel::mqtt::topic_codec::SELECT_OPTIONS;
use mqttpanel::{
    ConnectionState, ControlType, ControlValue, LogEntry, PanelConfig, PanelEngine, PanelObserver,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(PanelConfig::default_path);
    info!("Using config {}", config_path.display());
    let config = PanelConfig::load_or_create(&config_path).await?;

    let mut engine = PanelEngine::new(&config, Box::new(TracingObserver))
        .map_err(|e| eyre!("Failed to start panel engine: {}", e))?;

    let broker = &config.broker;
    if let Err(e) = engine
        .on_connect_requested(&broker.host, broker.port, &broker.base_topic)
        .await
    {
        warn!("Initial connect failed: {}", e);
    }

    run(&mut engine, &config).await?;

    engine.shutdown().await;
    info!("Bye");
    Ok(())
}

async fn run(engine: &mut PanelEngine, config: &PanelConfig) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let wait = engine.drain_wait();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.map_err(|e| eyre!("Failed to read stdin: {}", e))? else {
                    info!("Stdin closed");
                    return Ok(());
                };
                match parse_command(&line) {
                    Ok(Command::Quit) => return Ok(()),
                    Ok(command) => execute(engine, config, command).await,
                    Err(e) => warn!("{}", e),
                }
            }
            _ = &mut ctrl_c => {
                info!("Interrupted");
                return Ok(());
            }
            _ = engine.pump_wait(wait) => {}
        }
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Control(ControlValue),
    Connect,
    Disconnect,
    Log(usize),
    State,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match word {
        "switch" => match rest {
            "on" | "1" => Command::Control(ControlValue::Switch(true)),
            "off" | "0" => Command::Control(ControlValue::Switch(false)),
            _ => return Err(format!("switch expects on|off, got {:?}", rest)),
        },
        "dimmer" => {
            let level: f64 = rest
                .parse()
                .map_err(|_| format!("dimmer expects a level, got {:?}", rest))?;
            Command::Control(ControlValue::dimmer_from_slider(level))
        }
        "select" => {
            if !SELECT_OPTIONS.contains(&rest) {
                return Err(format!("select expects one of {:?}", SELECT_OPTIONS));
            }
            Command::Control(ControlValue::Select(rest.to_string()))
        }
        "text" => Command::Control(ControlValue::Text(rest.to_string())),
        "number" => {
            let number: f64 = rest
                .parse()
                .map_err(|_| format!("number expects a decimal, got {:?}", rest))?;
            Command::Control(ControlValue::Number(number))
        }
        "connect" => Command::Connect,
        "disconnect" => Command::Disconnect,
        "log" => Command::Log(rest.parse().unwrap_or(20)),
        "state" => Command::State,
        "quit" | "exit" => Command::Quit,
        "" => return Err("empty command".to_string()),
        other => return Err(format!("unknown command {:?}", other)),
    };
    Ok(command)
}

async fn execute(engine: &mut PanelEngine, config: &PanelConfig, command: Command) {
    match command {
        Command::Control(value) => engine.on_user_command(value),
        Command::Connect => {
            let broker = &config.broker;
            if let Err(e) = engine
                .on_connect_requested(&broker.host, broker.port, &broker.base_topic)
                .await
            {
                error!("Connect failed: {}", e);
            }
        }
        Command::Disconnect => engine.on_disconnect_requested().await,
        Command::Log(n) => {
            for entry in engine.log().tail(n) {
                println!("{}", entry.render());
            }
        }
        Command::State => {
            println!("connection: {}", engine.connection_state());
            for ((control, index), state) in engine.controls().iter() {
                println!(
                    "{}/{} = {} ({})",
                    control,
                    index,
                    state.value,
                    state.updated_at.format("%H:%M:%S")
                );
            }
        }
        Command::Quit => {}
    }
}

/// Mirrors engine callbacks into the tracing output
struct TracingObserver;

impl PanelObserver for TracingObserver {
    fn on_state_changed(
        &mut self,
        control: ControlType,
        index: u32,
        value: &ControlValue,
        _at: DateTime<Local>,
    ) {
        match value.display_level() {
            Some(level) => info!("{} {} -> {}%", control, index, level),
            None => info!("{} {} -> {}", control, index, value),
        }
    }

    fn on_log_appended(&mut self, entry: &LogEntry) {
        info!("{}", entry);
    }

    fn on_connection_state_changed(&mut self, state: &ConnectionState) {
        info!("Connection {}", state);
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

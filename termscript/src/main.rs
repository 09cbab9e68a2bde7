//! Console automation driver.
//!
//! Runs on the main stream (stdin/stdout) of a terminal pass-through and
//! talks to the host on stderr using the side-channel prefixes.
//!
//! ```bash
//! # Fetch a file from the target
//! termscript transfer /var/log/messages messages.log
//!
//! # Log in and pick commands from a menu, keeping a transcript
//! termscript shell root secret -c "uname -a" -c "df -h" --transcript run.json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use termscript::{
    ByteTransfer, LoginOutcome, Menu, Recorder, Result, SecretString, Session, SessionBuilder,
    SessionConfig, TransferConfig, UiSink, Xmodem,
};

#[derive(Parser, Debug)]
#[command(
    name = "termscript",
    about = "Automate a remote shell over a console stream",
    version
)]
struct Cli {
    /// Write log output to this file instead of stderr
    #[arg(long, global = true, env = "TERMSCRIPT_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transfer a file with XMODEM
    Transfer(TransferArgs),

    /// Log in and run commands picked from a menu
    Shell(ShellArgs),
}

#[derive(Args, Debug)]
struct TransferArgs {
    /// Send the local file instead of receiving the remote one
    #[arg(short, long)]
    send: bool,

    /// Transfer settings (JSON)
    #[arg(long, env = "TERMSCRIPT_TRANSFER_CONFIG")]
    config: Option<PathBuf>,

    /// Path on the remote side
    remote: String,

    /// Path on this side
    local: PathBuf,
}

#[derive(Args, Debug)]
struct ShellArgs {
    /// Session settings (JSON)
    #[arg(long, env = "TERMSCRIPT_CONFIG")]
    config: Option<PathBuf>,

    /// Terminate commands with CR LF
    #[arg(long)]
    add_cr: bool,

    /// Command timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Save a JSON transcript of the session here
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Menu entry; may be repeated
    #[arg(short = 'c', long = "command")]
    commands: Vec<String>,

    /// Login name
    username: String,

    /// Login password
    #[arg(env = "TERMSCRIPT_PASSWORD", hide_env_values = true)]
    password: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_file.as_deref()) {
        eprintln!("termscript: cannot open log file: {e}");
        std::process::exit(2);
    }

    let code = match run(cli.command).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            log::error!("{e}");
            let _ = UiSink::stderr().alert(&format!("termscript: {e}"));
            1
        }
    };

    // The blocking stdin reader never returns on its own; leave without
    // waiting for runtime shutdown.
    std::process::exit(code);
}

fn init_logging(log_file: Option<&Path>) -> std::io::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(path) = log_file {
        let file = std::fs::File::create(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

async fn run(command: Command) -> Result<bool> {
    match command {
        Command::Transfer(args) => transfer(args).await,
        Command::Shell(args) => shell(args).await,
    }
}

async fn transfer(args: TransferArgs) -> Result<bool> {
    let config = match &args.config {
        Some(path) => TransferConfig::from_json_file(path)?,
        None => TransferConfig::default(),
    };
    let protocol = Xmodem::new(config.get_timeout);
    let mut io = ByteTransfer::stdio(config);

    let count = if args.send {
        io.send_file(&protocol, &args.remote, &args.local).await?
    } else {
        io.receive_file(&protocol, &args.remote, &args.local).await?
    };
    info!("transfer: {} bytes", count);
    Ok(true)
}

async fn shell(args: ShellArgs) -> Result<bool> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };
    if args.add_cr {
        config.add_cr = true;
    }
    if let Some(secs) = args.timeout {
        config.command_timeout = Some(Duration::from_secs(secs));
    }

    let mut builder = SessionBuilder::new().config(config);
    if let Some(path) = &args.transcript {
        let recorder = Recorder::new(path)?;
        recorder.erase()?;
        builder = builder.recorder(recorder);
    }
    let mut session = builder.build_stdio().await?;
    let password = SecretString::from(args.password);

    let result = tokio::select! {
        result = drive(&mut session, &args.username, &password, &args.commands) => result,
        _ = shutdown_signal() => {
            warn!("shell: interrupted");
            Ok(false)
        }
    };

    session.save_transcript()?;
    result
}

async fn drive(
    session: &mut Session,
    username: &str,
    password: &SecretString,
    commands: &[String],
) -> Result<bool> {
    let outcome = session.login(username, password).await?;
    session.record("login", format!("{outcome:?}"))?;
    match outcome {
        LoginOutcome::Authenticated => session.alert(&format!("Logged in as {username}"))?,
        LoginOutcome::AlreadyAuthenticated => session.alert("Already logged in")?,
        LoginOutcome::Failed => {
            session.alert("Login failed")?;
            return Ok(false);
        }
    }

    let menu = commands
        .iter()
        .fold(Menu::new(), |menu, command| menu.item(command.clone(), command.clone()));
    if menu.is_empty() {
        return Ok(true);
    }

    while let Some(command) = session.show_menu(&menu).await? {
        match session.cmd(command).await? {
            Some(lines) => {
                for line in &lines {
                    session.alert(line)?;
                }
            }
            None => session.alert(&format!("No prompt after {command}"))?,
        }
    }
    Ok(true)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

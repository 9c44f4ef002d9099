use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, mpsc as std_mpsc},
    time::Duration,
};

use clap::Parser;
use relaychat_client::{
    Client, ClientCommand, ClientEvent, ClientHandle, EventSink, StagingDir,
    config::{
        ClientConfig, SavedClientConfig, config_path, load_saved_config, save_saved_config,
        validate_nickname, validate_saved_config,
    },
    console::{ConsoleInput, HELP, parse_line},
    run_commands, save_received_file,
    staging::DEFAULT_STAGING_DIR,
    unique_destination,
};
use relaychat_core::{DEFAULT_HOST, DEFAULT_PORT};
use tokio::{runtime::Runtime, sync::mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Parser)]
#[command(name = "relaychat", about = "Terminal client for a relay chat server")]
struct ClientArgs {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// When omitted, the saved config is used, or you are asked for one.
    #[arg(long)]
    nickname: Option<String>,
    #[arg(long, default_value = DEFAULT_STAGING_DIR)]
    staging_dir: PathBuf,
    #[arg(long, default_value_t = 12)]
    connect_timeout_secs: u64,
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Clone)]
struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

/// Staged path and original name, numbered from 1 in arrival order.
type ReceivedFiles = Arc<Mutex<Vec<(String, PathBuf)>>>;

fn main() {
    let args = ClientArgs::parse();
    init_logging(args.log_file.as_deref());

    if let Err(err) = run(args) {
        error!("client failed: {err}");
        eprintln!("relaychat: {err}");
        std::process::exit(1);
    }
}

fn run(args: ClientArgs) -> Result<(), String> {
    // Cleared before anything else touches the network or the terminal.
    let staging = StagingDir::prepare(&args.staging_dir).map_err(|err| err.to_string())?;

    let Some(saved) = resolve_config(&args)? else {
        return Ok(());
    };
    let config = ClientConfig {
        host: saved.host,
        port: saved.port,
        nickname: saved.nickname,
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
    };

    let runtime = Runtime::new().map_err(|err| format!("tokio runtime init failed: {err}"))?;
    let (events, event_rx) = EventSink::channel();

    println!("connecting to {} as {}...", config.server_addr(), config.nickname);
    let client = runtime
        .block_on(Client::connect(&config, staging, events.clone()))
        .map_err(|err| format!("could not connect to {}: {err}", config.server_addr()))?;
    let handle = client.handle();
    println!("connected. type /help for commands.");

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    runtime.spawn(run_commands(command_rx, handle.clone(), events));

    let received = ReceivedFiles::default();
    let printer = std::thread::spawn({
        let received = Arc::clone(&received);
        move || print_events(event_rx, received)
    });

    // Blocked on stdin; never joined, the process exits once the connection
    // is gone.
    let runtime_handle = runtime.handle().clone();
    std::thread::spawn(move || read_console(command_tx, handle, received, runtime_handle));

    let reason = runtime.block_on(client.wait());
    if printer.join().is_err() {
        warn!("event printer panicked");
    }
    info!(%reason, "client exiting");
    Ok(())
}

fn resolve_config(args: &ClientArgs) -> Result<Option<SavedClientConfig>, String> {
    let path = config_path();

    if let Some(nickname) = args.nickname.as_deref() {
        let cfg = SavedClientConfig {
            host: args.host.clone(),
            port: args.port,
            nickname: nickname.to_owned(),
        };
        validate_saved_config(&cfg).map_err(|err| err.to_string())?;
        if let Err(err) = save_saved_config(&path, &cfg) {
            warn!("failed to save config: {err}");
        }
        return Ok(Some(cfg));
    }

    match load_saved_config(&path) {
        Ok(Some(cfg)) => {
            info!(path = %path.display(), "using saved config");
            return Ok(Some(cfg));
        }
        Ok(None) => {}
        Err(err) => {
            warn!("saved config invalid; will prompt: {err}");
            println!("saved config was invalid and will be replaced: {err}");
        }
    }

    let Some(nickname) = prompt_nickname()? else {
        return Ok(None);
    };
    let cfg = SavedClientConfig {
        host: args.host.clone(),
        port: args.port,
        nickname,
    };
    validate_saved_config(&cfg).map_err(|err| err.to_string())?;
    if let Err(err) = save_saved_config(&path, &cfg) {
        warn!("failed to save config: {err}");
    }
    Ok(Some(cfg))
}

/// `None` when stdin closes before a valid nickname is entered.
fn prompt_nickname() -> Result<Option<String>, String> {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("nickname: ");
        io::stdout().flush().map_err(|err| err.to_string())?;

        line.clear();
        let read = stdin
            .lock()
            .read_line(&mut line)
            .map_err(|err| format!("failed to read nickname: {err}"))?;
        if read == 0 {
            return Ok(None);
        }

        let nickname = line.trim();
        match validate_nickname(nickname) {
            Ok(()) => return Ok(Some(nickname.to_owned())),
            Err(err) => println!("{err}"),
        }
    }
}

fn print_events(event_rx: std_mpsc::Receiver<ClientEvent>, received: ReceivedFiles) {
    for event in event_rx {
        match &event {
            ClientEvent::RosterChanged(peers) if peers.is_empty() => {
                println!("* nobody else is online");
            }
            ClientEvent::RosterChanged(peers) => println!("* online: {}", peers.join(", ")),
            ClientEvent::ConversationOpened { peer } => {
                println!("* conversation with {peer} opened");
            }
            ClientEvent::FileReceived {
                from,
                file_name,
                path,
            } => {
                let mut files = received.lock().unwrap_or_else(|p| p.into_inner());
                files.push((file_name.clone(), path.clone()));
                println!(
                    "[{from}] {from} sent {file_name} ({}), /save {} <dest> to keep it",
                    path.display(),
                    files.len()
                );
            }
            ClientEvent::LocalError { peer, message } => match peer {
                Some(peer) => println!("[{peer}] error: {message}"),
                None => println!("error: {message}"),
            },
            ClientEvent::ConnectionClosed { reason } => {
                println!("* disconnected: {reason}");
                break;
            }
            other => {
                if let (Some(peer), Some(line)) = (other.peer(), other.transcript_line()) {
                    println!("[{peer}] {line}");
                }
            }
        }
    }
}

fn read_console(
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    handle: ClientHandle,
    received: ReceivedFiles,
    runtime: tokio::runtime::Handle,
) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("stdin read failed: {err}");
                break;
            }
        };

        match parse_line(&line) {
            None => {}
            Some(ConsoleInput::Command(command)) => {
                let quitting = command == ClientCommand::Shutdown;
                if command_tx.send(command).is_err() || quitting {
                    return;
                }
            }
            Some(ConsoleInput::Save { index, dest }) => {
                save_to(&received, index, &dest, &runtime);
            }
            Some(ConsoleInput::Who) => {
                let peers = handle.roster();
                if peers.is_empty() {
                    println!("* nobody else is online");
                } else {
                    println!("* online: {}", peers.join(", "));
                }
            }
            Some(ConsoleInput::Help) => println!("{HELP}"),
            Some(ConsoleInput::Invalid(message)) => println!("{message}"),
        }
    }

    let _ = command_tx.send(ClientCommand::Shutdown);
}

fn save_to(received: &ReceivedFiles, index: usize, dest: &Path, runtime: &tokio::runtime::Handle) {
    let entry = received
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .get(index - 1)
        .cloned();
    let Some((file_name, staged)) = entry else {
        println!("no received file #{index}");
        return;
    };

    let dest = if dest.is_dir() {
        unique_destination(dest, &file_name)
    } else {
        dest.to_path_buf()
    };
    match runtime.block_on(save_received_file(&staged, &dest)) {
        Ok(bytes) => println!("* saved {file_name} to {} ({bytes} bytes)", dest.display()),
        Err(err) => println!("error: {err}"),
    }
}

fn init_logging(log_file: Option<&Path>) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();

    let log_path = log_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config_path().with_file_name("relaychat.log"));
    let file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", log_path.display());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
            return;
        }
    };

    let make_writer = FileMakeWriter {
        file: Arc::new(Mutex::new(file)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .init();
}

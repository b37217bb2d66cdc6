use adb_wire::{ConnectOptions, Session, Transport};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "adb-wire")]
#[command(about = "Wire-level ADB client - talks directly to a device's adbd")]
struct Cli {
    /// Device address.
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Device adbd port.
    #[arg(short = 'P', long, default_value_t = 5555)]
    port: u16,

    /// Timeout in seconds for handshake and stream operations.
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Query the peer's version.
    Version,

    /// List devices known to the peer.
    Devices {
        /// Long listing with product/model columns.
        #[arg(short, long)]
        long: bool,
    },

    /// Run a shell command on the device.
    Shell {
        /// Shell command to execute.
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Push a local file to the device.
    Push {
        /// Local file path.
        local: PathBuf,
        /// Remote file path on device.
        remote: String,
    },

    /// Pull a file from the device.
    Pull {
        /// Remote file path on device.
        remote: String,
        /// Local file path.
        local: PathBuf,
    },

    /// Stream device logs (logcat).
    Logcat,

    /// Stat a remote file on the device.
    Stat {
        /// Remote path on device.
        path: String,
    },

    /// List a remote directory on the device.
    Ls {
        /// Remote directory path on device.
        path: String,
    },

    /// Ask the peer to connect to a networked device.
    Connect {
        /// Target as host:port.
        target: String,
    },

    /// Ask the peer to drop a networked device.
    Disconnect {
        /// Target as host:port.
        target: String,
    },

    /// Restart adbd listening on TCP.
    Tcpip {
        /// Port to listen on.
        port: u16,
    },
}

fn split_target(target: &str) -> Result<(String, u16), String> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| format!("Invalid target {:?}, expected host:port", target))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("Invalid port in target {:?}", target))?;
    Ok((host.to_string(), port))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        }
    };

    let addr = format!("{}:{}", cli.host, cli.port);
    let timeout = Duration::from_secs(cli.timeout);
    let opts = ConnectOptions::default()
        .with_handshake_timeout(timeout)
        .with_io_timeout(timeout);

    // Key material lives outside the core; run unauthenticated. Devices that
    // demand auth fail with AuthenticationFailed.
    let transport = Transport::tcp(&addr).await?;
    let session = Session::connect(transport, &[], opts).await?;

    match command {
        Commands::Version => {
            let version = session.host_version().await?;
            println!("Peer version: {}", version);
        }
        Commands::Devices { long } => {
            let devices = session.list_devices(long).await?;
            if devices.is_empty() {
                println!("No devices connected.");
            } else {
                println!("{:<24} State", "Serial");
                for d in &devices {
                    println!("{:<24} {}", d.serial, d.state);
                }
            }
        }
        Commands::Shell { command } => {
            if command.is_empty() {
                eprintln!("Error: no shell command specified");
                std::process::exit(1);
            }
            let cmd = command.join(" ");
            let output = session.shell(&cmd).await?;
            print!("{}", String::from_utf8_lossy(&output));
        }
        Commands::Push { local, remote } => {
            let data = tokio::fs::read(&local).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    adb_wire::AdbError::FileNotFound(local.display().to_string())
                } else {
                    adb_wire::AdbError::Io(e)
                }
            })?;
            let metadata = tokio::fs::metadata(&local).await?;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0);

            let mut sync = session.sync().await?;
            sync.push(&remote, 0o644, mtime, &data).await?;
            sync.quit().await?;
            println!("Pushed {} -> {}", local.display(), remote);
        }
        Commands::Pull { remote, local } => {
            let mut sync = session.sync().await?;
            let data = sync.pull(&remote).await?;
            sync.quit().await?;
            tokio::fs::write(&local, &data).await?;
            println!("Pulled {} -> {}", remote, local.display());
        }
        Commands::Logcat => {
            let mut stream = session.logcat().await?;
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = stream.read().await? {
                tokio::io::AsyncWriteExt::write_all(&mut stdout, &chunk).await?;
            }
        }
        Commands::Stat { path } => {
            let mut sync = session.sync().await?;
            let stat = sync.stat(&path).await?;
            sync.quit().await?;
            println!("Mode:     {:o}", stat.mode);
            println!("Size:     {} bytes", stat.size);
            println!("Modified: {} (unix timestamp)", stat.mtime);
            if stat.is_file() {
                println!("Type:     regular file");
            } else if stat.is_directory() {
                println!("Type:     directory");
            }
        }
        Commands::Ls { path } => {
            let mut sync = session.sync().await?;
            let entries = sync.list(&path).await?;
            sync.quit().await?;
            if entries.is_empty() {
                println!("(empty)");
            } else {
                for entry in &entries {
                    let type_char = if (entry.mode & 0o170000) == 0o040000 {
                        'd'
                    } else {
                        '-'
                    };
                    println!(
                        "{}{:o}  {:>8}  {}",
                        type_char,
                        entry.mode & 0o7777,
                        entry.size,
                        entry.name
                    );
                }
            }
        }
        Commands::Connect { target } => {
            let (host, port) = split_target(&target)?;
            session.host_connect(&host, port).await?;
            println!("Connected to {}", target);
        }
        Commands::Disconnect { target } => {
            let (host, port) = split_target(&target)?;
            session.host_disconnect(&host, port).await?;
            println!("Disconnected from {}", target);
        }
        Commands::Tcpip { port } => {
            let reply = session.tcpip(port).await?;
            print!("{}", reply);
        }
    }

    Ok(())
}

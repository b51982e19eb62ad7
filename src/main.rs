use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use syncr::config::Config;
use syncr::logging::*;
use syncr::session::Session;
use syncr::transport::{ControlMessage, Frame};
use syncr::types::Origin;

#[derive(Parser)]
#[command(name = "syncr", version, author, about = "2-way directory sync utility")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Run as the authoritative host: watch `dir`, accept peer connections on `bind`.
	Host {
		#[arg(long)]
		dir: PathBuf,
		#[arg(long = "host-id")]
		host_id: String,
		#[arg(long, default_value = "0.0.0.0:7862")]
		bind: String,
	},
	/// Run as a peer: connect to a host and mirror `dir` against it.
	Peer {
		#[arg(long)]
		dir: PathBuf,
		#[arg(long = "host-id")]
		host_id: String,
		#[arg(long)]
		connect: String,
		#[arg(long, default_value = "auto")]
		mode: String,
	},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	init_tracing();
	let cli = Cli::parse();

	match cli.command {
		Commands::Host { dir, host_id, bind } => run_host(dir, host_id, bind).await,
		Commands::Peer { dir, host_id, connect, mode } => run_peer(dir, host_id, connect, mode).await,
	}
}

async fn run_host(dir: PathBuf, host_id: String, bind: String) -> Result<(), Box<dyn Error>> {
	let mut config = Config::default();
	config.sync_directory = dir.clone();
	config.host_id = host_id.clone();
	let config = Arc::new(config);

	let listener = TcpListener::bind(&bind).await?;
	info!(bind = %bind, dir = %dir.display(), "host listening");

	loop {
		let (stream, peer_addr) = listener.accept().await?;
		let dir = dir.clone();
		let host_id = host_id.clone();
		let config = config.clone();
		tokio::spawn(async move {
			info!(peer = %peer_addr, "peer connected");
			if let Err(e) = serve_peer_connection(stream, dir, host_id, &config).await {
				warn!(peer = %peer_addr, error = %e, "session ended with error");
			}
		});
	}
}

async fn serve_peer_connection(
	stream: TcpStream,
	dir: PathBuf,
	host_id: String,
	config: &Config,
) -> Result<(), Box<dyn Error>> {
	let session = Session::new(dir, Origin::Host, stream, config);
	session
		.authenticate_as_host(&host_id, Duration::from_secs(config.auth_deadline_secs))
		.await?;
	session.send_initial_snapshot().await?;

	let mut emitted = session.spawn_local_emitters(
		Duration::from_millis(config.watcher_settle_ms),
		Duration::from_millis(config.reconciler_interval_ms),
	);

	loop {
		tokio::select! {
			record = emitted.recv() => {
				match record {
					Some(record) => { session.transport.send_change(&record).await?; }
					None => break,
				}
			}
			frame = session.transport.recv() => {
				session.handle_frame(frame?).await?;
			}
		}
	}
	Ok(())
}

async fn run_peer(
	dir: PathBuf,
	host_id: String,
	connect: String,
	mode: String,
) -> Result<(), Box<dyn Error>> {
	let mut config = Config::default();
	config.sync_directory = dir.clone();
	config.host_id = host_id.clone();

	let stream = TcpStream::connect(&connect).await?;
	info!(connect = %connect, dir = %dir.display(), "peer connecting");

	let session = Arc::new(Session::new(dir, Origin::Peer, stream, &config));
	session
		.authenticate_as_peer(&host_id, Duration::from_secs(config.auth_deadline_secs))
		.await?;
	info!("authenticated, waiting for initial snapshot");

	session.orchestrator.set_auto(mode != "manual").await.ok();

	let mut emitted = if mode != "manual" {
		Some(session.spawn_local_emitters(
			Duration::from_millis(config.watcher_settle_ms),
			Duration::from_millis(config.reconciler_interval_ms),
		))
	} else {
		None
	};

	let stdin = BufReader::new(tokio::io::stdin());
	let mut commands = stdin.lines();

	loop {
		tokio::select! {
			frame = session.transport.recv() => {
				session.handle_frame(frame?).await?;
			}
			record = async {
				match &mut emitted {
					Some(rx) => rx.recv().await,
					None => std::future::pending().await,
				}
			} => {
				match record {
					Some(record) => { session.transport.send_change(&record).await?; }
					None => break,
				}
			}
			line = commands.next_line() => {
				match line? {
					Some(line) => handle_command(&session, line.trim()).await?,
					None => break,
				}
			}
		}
	}
	Ok(())
}

/// Minimal line-oriented control loop standing in for the external GUI
/// shell: `pull`, `push`, `auto`, `manual`.
async fn handle_command<S>(session: &Session<S>, line: &str) -> Result<(), Box<dyn Error>>
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
	match line {
		"pull" => {
			let transport = session.transport.clone();
			session
				.orchestrator
				.pull(|| async move {
					let _ = transport.send_control(ControlMessage::RequestAllFiles { origin: "peer".to_string() }).await;
				})
				.await
				.map(|n| info!(drained = n, "pull complete"))
				.unwrap_or_else(|e| warn!(error = %e, "pull rejected"));
		}
		"push" => {
			let transport = session.transport.clone();
			session
				.orchestrator
				.push(|record| {
					let transport = transport.clone();
					async move {
						let _ = transport.send_change(&record).await;
					}
				})
				.await
				.map(|n| info!(emitted = n, "push complete"))
				.unwrap_or_else(|e| warn!(error = %e, "push rejected"));
		}
		"auto" => {
			session.orchestrator.set_auto(true).await.unwrap_or_else(|e| warn!(error = %e, "mode switch rejected"));
		}
		"manual" => {
			session.orchestrator.set_auto(false).await.unwrap_or_else(|e| warn!(error = %e, "mode switch rejected"));
		}
		"" => {}
		other if other.starts_with("resolve ") => {
			handle_resolve_command(session, &other["resolve ".len()..]).await;
		}
		other => warn!(command = %other, "unrecognized control command"),
	}
	Ok(())
}

/// `resolve <path> <strategy>`, e.g. `resolve notes.md keep-newest`. Clears
/// a detected conflict the way the external GUI shell would after the user
/// picks a strategy in a merge dialog.
async fn handle_resolve_command<S>(session: &Session<S>, args: &str)
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
	let Some((path, strategy)) = args.trim().rsplit_once(' ') else {
		warn!(args = %args, "usage: resolve <path> <strategy>");
		return;
	};
	let Ok(strategy) = strategy.parse::<syncr::conflict::ConflictResolution>() else {
		warn!(strategy = %strategy, "unrecognized conflict resolution strategy");
		return;
	};
	match session.apply.resolve_conflict(path, strategy).await {
		Ok(()) => info!(path = %path, "conflict resolved"),
		Err(e) => warn!(path = %path, error = %e, "conflict resolution failed"),
	}
}

// vim: ts=4

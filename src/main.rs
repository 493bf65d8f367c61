use netpunch::conn::{logging, signing, Builder, LogSink};
use netpunch::{punch, serve, Cancel};
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "netpunch")]
enum Opt {
    /// Run the rendezvous server
    Server(ServerOpt),
    /// Punch a hole to the peer paired with our slot
    Peer(PeerOpt),
}

#[derive(StructOpt, Debug)]
struct CommonOpt {
    /// Listening address for the server, outgoing address for a peer. `:port` binds all interfaces
    #[structopt(long = "local")]
    local: String,

    /// Shared secret to sign messages
    #[structopt(long = "secret")]
    secret: Option<String>,

    /// Read the shared secret from a file
    #[structopt(long = "secret-file", parse(from_os_str))]
    secret_file: Option<PathBuf>,

    /// Log raw messages, signatures included
    #[structopt(long = "raw-logging")]
    raw_logging: bool,

    #[structopt(long = "silent")]
    silent: bool,
}

#[derive(StructOpt, Debug)]
struct ServerOpt {
    #[structopt(flatten)]
    common: CommonOpt,
}

#[derive(StructOpt, Debug)]
struct PeerOpt {
    /// a-z, a pairs with b, c with d and so on up to y and z
    #[structopt(long = "slot")]
    slot: char,

    /// Public address of the rendezvous server
    #[structopt(long = "remote")]
    remote: String,

    #[structopt(flatten)]
    common: CommonOpt,
}

#[tokio::main]
async fn main() {
    let opt: Opt = StructOpt::from_args();

    if let Err(e) = run(opt).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(opt: Opt) -> Result<(), Box<dyn Error>> {
    let cancel = Cancel::new();

    match opt {
        Opt::Server(opt) => {
            let chain = connection(&opt.common, format!("[{}] ", std::process::id()))?;
            shutdown_on_signal(cancel.clone());

            log::info!("start rendezvous server on {}", opt.common.local);
            serve(&cancel, &opt.common.local, &chain).await?;
        }
        Opt::Peer(opt) => {
            let prefix = format!("[{}] [{}] ", std::process::id(), opt.slot);
            let chain = connection(&opt.common, prefix)?;
            shutdown_on_signal(cancel.clone());

            log::info!(
                "start peer {} on {} to server at {}",
                opt.slot,
                opt.common.local,
                opt.remote
            );
            let (local, remote) =
                punch(&cancel, opt.slot, &opt.common.local, &opt.remote, &chain).await?;
            print_result(local, remote);
        }
    }

    Ok(())
}

fn read_secret(opt: &CommonOpt) -> Result<Vec<u8>, Box<dyn Error>> {
    let secret = match (&opt.secret, &opt.secret_file) {
        (Some(s), None) => s.as_bytes().to_vec(),
        (None, Some(path)) => std::fs::read(path)?,
        (Some(_), Some(_)) => return Err("use either --secret or --secret-file".into()),
        (None, None) => return Err("you have to specify secret".into()),
    };

    if secret.is_empty() {
        return Err("secret is empty".into());
    }
    Ok(secret)
}

/// logging ends up outside signing unless raw logging is asked for
fn connection(opt: &CommonOpt, prefix: String) -> Result<Builder, Box<dyn Error>> {
    init_logger(opt.silent);

    let sign = signing(read_secret(opt)?);
    let log = logging(Arc::new(LogSink::new(prefix)));

    Ok(if opt.raw_logging {
        Builder::new().with(log).with(sign)
    } else {
        Builder::new().with(sign).with(log)
    })
}

fn init_logger(silent: bool) {
    let mut b =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if silent {
        b.filter_level(log::LevelFilter::Off);
    }
    b.init();
}

fn print_result(local: SocketAddr, remote: SocketAddr) {
    println!(
        "LADDR/LHOST/LPORT/RADDR/RHOST/RPORT: {} {} {} {} {} {}",
        local,
        local.ip(),
        local.port(),
        remote,
        remote.ip(),
        remote.port()
    );
}

fn shutdown_on_signal(cancel: Cancel) {
    tokio::spawn(async move {
        let sig = shutdown_signal().await;
        log::info!("shutting down due to signal: {}", sig);
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = term.recv() => "SIGTERM",
        },
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

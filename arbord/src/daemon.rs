use anyhow::Result;
use clap::Parser;
use libarbor::conn::WireConn;
use libarbor::dispatch::DispatchOpts;
use libarbor::error::ArborResultExt;
use libarbor::repo::SharedRepo;
use libarbor::serve::{serve_ctx, ServeCtx};
use std::ffi::OsString;
use std::net::{TcpListener, TcpStream};

#[derive(Parser)]
#[command(name = "arbord", about = "serve a versioned tree over the arbor wire protocol")]
struct ArbordOpts {
    /// address to accept connections on
    #[arg(long, default_value = "127.0.0.1:3690")]
    listen: String,
    /// merge concurrent changes with identical effect instead of rejecting
    /// them as out of date
    #[arg(long)]
    permissive: bool,
}

pub fn run<T: Into<OsString> + Clone>(args: impl IntoIterator<Item = T>) -> Result<()> {
    let opts = ArbordOpts::parse_from(args);
    let listener = TcpListener::bind(&opts.listen)?;
    info!("listening on {}", opts.listen);

    let repo = SharedRepo::new();
    loop {
        let (stream, peer) = listener.accept()?;
        info!("connection from {}", peer);
        let repo = repo.clone();
        let permissive = opts.permissive;
        std::thread::spawn(move || {
            if let Err(err) = drive_connection(stream, repo, permissive) {
                warn!("connection from {} failed: {:#}", peer, err);
            } else {
                info!("connection from {} closed", peer);
            }
        });
    }
}

/// serve edits on one connection until the peer hangs up
///
/// each terminal command ends one dispatcher run; the next command on the
/// same connection starts a fresh transaction context
fn drive_connection(stream: TcpStream, repo: SharedRepo, permissive: bool) -> Result<()> {
    let mut conn = WireConn::new(stream);
    loop {
        let ctx = if permissive {
            ServeCtx::permissive(repo.clone())
        } else {
            ServeCtx::new(repo.clone())
        };
        match serve_ctx(&mut conn, ctx, DispatchOpts::default()) {
            Ok(()) => continue,
            Err(err) if err.is_connection_closed() => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

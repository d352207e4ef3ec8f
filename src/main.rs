use std::io::{IoSlice, Write};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use sockpal::{
    AddressFamily, EndpointAddress, Libc, Options, Pal, ProtocolType, SafeHandle, SelectMode,
    SocketFlags, SocketShutdown, SocketType,
};
use triomphe::Arc;

/// Drive the socket layer against real loopback or remote peers.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Do not create descriptors with close-on-exec.
    #[clap(long)]
    no_cloexec: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Echo every byte received on each accepted connection.
    EchoServer {
        #[clap(short, long, default_value = "127.0.0.1:7007")]
        bind: SocketAddr,
    },
    /// Send a message to an echo server and print the reply.
    EchoClient {
        #[clap(short, long, default_value = "127.0.0.1:7007")]
        connect: SocketAddr,
        #[clap(short, long, default_value = "hello")]
        message: String,
        /// Send the message as three regions in one vectored call.
        #[clap(short, long)]
        vectored: bool,
    },
    /// Connect and report readiness without reading anything.
    Poll {
        #[clap(short, long)]
        connect: SocketAddr,
        #[clap(short, long, default_value_t = 0)]
        timeout_us: i64,
    },
}

fn family_of(addr: &SocketAddr) -> AddressFamily {
    match addr {
        SocketAddr::V4(_) => AddressFamily::InterNetwork,
        SocketAddr::V6(_) => AddressFamily::InterNetworkV6,
    }
}

fn tcp_socket(pal: &Pal, addr: &SocketAddr) -> Result<SafeHandle> {
    Ok(pal.socket(family_of(addr), SocketType::Stream, ProtocolType::Tcp)?)
}

fn serve(pal: Pal, conn: Arc<SafeHandle>) {
    let mut buf = [0u8; 4096];
    loop {
        let res = pal
            .receive(&conn, &mut buf, SocketFlags::empty(), true)
            .and_then(|n| {
                let mut sent = 0;
                while sent < n {
                    sent += pal.send(&conn, &buf[sent..n], SocketFlags::empty(), true)?;
                }
                Ok(n)
            });
        match res {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) if err.is_handle_closed() => break,
            Err(err) => {
                log::warn!("connection fd {}: {err}", conn.raw_descriptor());
                break;
            }
        }
    }
    pal.close(&conn);
}

fn echo_server(pal: Pal, bind: SocketAddr) -> Result<()> {
    let term = std::sync::Arc::new(AtomicBool::new(false));
    {
        let term = term.clone();
        ctrlc::set_handler(move || {
            term.store(true, Ordering::SeqCst);
        })
        .context("Error setting Ctrl-C handler")?;
    }

    let listener = tcp_socket(&pal, &bind)?;
    pal.bind(&listener, &EndpointAddress::from(bind))?;
    pal.listen(&listener, 128)?;
    let local = pal.local_endpoint(&listener, family_of(&bind))?;
    println!("Listening on {local:?}");

    let conns: Mutex<Vec<Arc<SafeHandle>>> = Mutex::new(Vec::new());
    thread::scope(|s| -> Result<()> {
        while !term.load(Ordering::SeqCst) {
            if !pal.poll(&listener, 100_000, SelectMode::Read)? {
                continue;
            }
            let conn = match pal.accept(&listener, false) {
                Ok(conn) => Arc::new(conn),
                Err(err) if err.code() == Some(libc::EWOULDBLOCK) => continue,
                Err(err) => return Err(err.into()),
            };
            if let Ok(peer) = pal.remote_endpoint(&conn, family_of(&bind)) {
                println!("Accepted {peer:?}");
            }
            conns.lock().unwrap().push(conn.clone());
            let pal = pal.clone();
            s.spawn(move || serve(pal, conn));
        }

        println!("Shutting down");
        for conn in conns.lock().unwrap().drain(..) {
            // Wakes a blocked receive; the close happens once it unpins.
            let _ = pal.shutdown(&conn, SocketShutdown::Both);
            pal.close(&conn);
        }
        Ok(())
    })?;
    pal.close(&listener);
    Ok(())
}

fn echo_client(pal: Pal, connect: SocketAddr, message: &str, vectored: bool) -> Result<()> {
    let conn = tcp_socket(&pal, &connect)?;
    pal.connect(&conn, &EndpointAddress::from(connect))?;

    let bytes = message.as_bytes();
    let sent = if vectored {
        let (a, rest) = bytes.split_at(bytes.len() / 3);
        let (b, c) = rest.split_at(rest.len() / 2);
        let bufs = [IoSlice::new(a), IoSlice::new(b), IoSlice::new(c)];
        pal.send_buffers(&conn, &bufs, SocketFlags::empty(), true)?
    } else {
        pal.send(&conn, bytes, SocketFlags::empty(), true)?
    };
    if sent != bytes.len() {
        bail!("short send: {sent} of {} bytes", bytes.len());
    }

    let mut reply = vec![0u8; bytes.len()];
    let mut got = 0;
    while got < reply.len() {
        let n = pal.receive(&conn, &mut reply[got..], SocketFlags::empty(), true)?;
        if n == 0 {
            bail!("peer closed after {got} bytes");
        }
        got += n;
    }
    std::io::stdout().write_all(&reply)?;
    println!();
    Ok(())
}

fn poll_probe(pal: Pal, connect: SocketAddr, timeout_us: i64) -> Result<()> {
    let conn = tcp_socket(&pal, &connect)?;
    pal.connect(&conn, &EndpointAddress::from(connect))?;
    for mode in [SelectMode::Read, SelectMode::Write, SelectMode::Error] {
        let start = Instant::now();
        let ready = pal.poll(&conn, timeout_us, mode)?;
        println!(
            "* {mode:?}: {} ({:?})",
            if ready { "ready" } else { "not ready" },
            start.elapsed()
        );
    }
    println!("* available: {}", pal.available(&conn)?);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let pal = Pal::new(Libc::new(Options::default().close_on_exec(!args.no_cloexec)));

    match args.command {
        Command::EchoServer { bind } => echo_server(pal, bind),
        Command::EchoClient {
            connect,
            message,
            vectored,
        } => echo_client(pal, connect, &message, vectored),
        Command::Poll {
            connect,
            timeout_us,
        } => poll_probe(pal, connect, timeout_us),
    }
}

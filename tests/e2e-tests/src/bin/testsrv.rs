use clap::Parser;
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Fake framework server for fwbench E2E testing
#[derive(Parser, Debug)]
#[command(name = "testsrv")]
#[command(about = "Fake framework server for benchmark runner testing", long_about = None)]
struct Args {
    /// Port to listen on (defaults to $PORT, then 3000)
    #[arg(long)]
    port: Option<u16>,

    /// Milliseconds to wait before binding the port
    #[arg(long, default_value = "0")]
    startup_delay_ms: u64,

    /// Exit with --exit-code this many milliseconds after startup
    #[arg(long)]
    crash_after_ms: Option<u64>,

    /// Exit code used by --crash-after-ms
    #[arg(long, default_value = "1")]
    exit_code: i32,

    /// Stay alive without ever listening
    #[arg(long)]
    no_listen: bool,

    /// Re-launch this binary as a child that does the listening, then idle.
    /// The parent never listens itself.
    #[arg(long)]
    forked_listener: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .init();

    let args = Args::parse();
    info!("Starting testsrv with args: {:?}", args);

    let port = args
        .port
        .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(3000);

    if let Some(ms) = args.crash_after_ms {
        let code = args.exit_code;
        tokio::spawn(async move {
            sleep(Duration::from_millis(ms)).await;
            error!("Crashing with exit code {}", code);
            std::process::exit(code);
        });
    }

    if args.forked_listener {
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(e) => {
                error!("Failed to locate own executable: {}", e);
                std::process::exit(1);
            }
        };
        // Inherits our process group, environment, and stdio.
        match std::process::Command::new(exe)
            .arg("--port")
            .arg(port.to_string())
            .arg("--startup-delay-ms")
            .arg(args.startup_delay_ms.to_string())
            .spawn()
        {
            Ok(child) => info!("Forked listener PID {}", child.id()),
            Err(e) => {
                error!("Failed to fork listener: {}", e);
                std::process::exit(1);
            }
        }
        idle().await;
    }

    if args.startup_delay_ms > 0 {
        info!("Delaying startup for {} ms", args.startup_delay_ms);
        sleep(Duration::from_millis(args.startup_delay_ms)).await;
    }

    if args.no_listen {
        info!("Not listening, idling");
        idle().await;
    }

    run_server(port).await;
}

async fn idle() -> ! {
    loop {
        sleep(Duration::from_secs(3600)).await;
    }
}

async fn run_server(port: u16) {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    let addr = format!("127.0.0.1:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => {
            info!("Listening on http://{}", addr);
            l
        }
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(2);
        }
    };

    let pid = std::process::id();

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };

        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            let service = service_fn(move |_req: Request<hyper::body::Incoming>| async move {
                let body = format!("{{\"port\":{},\"pid\":{}}}\n", port, pid);
                Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!("Error serving connection: {}", e);
            }
        });
    }
}

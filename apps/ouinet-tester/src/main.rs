use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use core_lifecycle::{spawn_state_poller, BackgroundService, ChannelObserver, ChildProcessService, ServiceController};
use core_tagging::{tag_with, RoutingTag, TagFormat};
use core_trust::{load_anchor, TrustPolicy};
use ouinet_tester::tunnel::{parse_route, TunnelProxy};
use ouinet_tester::{build_client, logging, render_outcome, Config};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ouinet-tester", version, about = "Fetch through the local content-delivery proxy with pinned TLS trust")]
struct Cli {
    /// TOML config file (default: ./ouinet-tester.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the routing tag for a URL
    Tag {
        url: String,
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },
    /// Fetch a URL through the proxy and print the response headers
    Fetch(FetchArgs),
    /// Show trust anchor and proxy endpoint status
    Status,
    /// Run the loopback tunnel proxy on the configured endpoint
    ServeTunnel(TunnelArgs),
    /// Start the background service, report its state and fetch URLs read from stdin
    Run,
}

#[derive(Parser, Debug)]
struct FetchArgs {
    url: String,
    /// Send this tag instead of the one derived from the URL
    #[arg(long, conflicts_with = "no_tag")]
    tag: Option<String>,
    /// Send no group header
    #[arg(long, default_value_t = false)]
    no_tag: bool,
    /// Also print the body
    #[arg(long, default_value_t = false)]
    body: bool,
}

#[derive(Parser, Debug)]
struct TunnelArgs {
    /// Listen address (default: the configured proxy endpoint)
    #[arg(long)]
    listen: Option<String>,
    /// Route override, `host:port=ip:port`; repeatable
    #[arg(long = "route")]
    routes: Vec<String>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatArg {
    Authority,
    SchemeSpecific,
}

impl From<FormatArg> for TagFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Authority => TagFormat::Authority,
            FormatArg::SchemeSpecific => TagFormat::SchemeSpecific,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;
    let _guard = logging::init(&cfg.log_dir);
    info!(proxy = %cfg.endpoint().authority(), trust = cfg.trust_policy().name(), "config loaded");

    match cli.command {
        Commands::Tag { url, format } => {
            let format = format.map(TagFormat::from).unwrap_or(cfg.tag_format);
            println!("{}", tag_with(&url, format));
            Ok(())
        }
        Commands::Fetch(args) => fetch(&cfg, args).await,
        Commands::Status => status(&cfg).await,
        Commands::ServeTunnel(args) => serve_tunnel(cfg, args).await,
        Commands::Run => run(&cfg).await,
    }
}

async fn fetch(cfg: &Config, args: FetchArgs) -> Result<()> {
    let client = build_client(cfg)?;
    let tag = match (&args.tag, args.no_tag) {
        (_, true) => RoutingTag::empty(),
        (Some(t), false) => RoutingTag::from(t.as_str()),
        (None, false) => client.tag(&args.url),
    };
    println!("Loading: {}", args.url);
    let result = client.fetch(&args.url, &tag).await;
    print!("{}", render_outcome(&result));
    let resp = result?;
    if args.body {
        println!();
        println!("{}", String::from_utf8_lossy(&resp.body));
    }
    Ok(())
}

async fn status(cfg: &Config) -> Result<()> {
    let policy = cfg.trust_policy();
    println!("trust policy: {}", policy.name());
    match &policy {
        TrustPolicy::PinnedAnchor(path) => match load_anchor(path) {
            Ok(a) => println!("anchor: {} (issuer {}, serial {})", a.subject(), a.issuer(), a.serial()),
            Err(e) => println!("anchor: {e}"),
        },
        TrustPolicy::PinnedSet(_) | TrustPolicy::SystemDefault => match policy.store().anchors() {
            Ok(set) => println!("anchors: {} loaded", set.len()),
            Err(e) => println!("anchors: {e}"),
        },
    }

    let endpoint = cfg.endpoint();
    let probe = tokio::time::timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
    )
    .await;
    let reachable = matches!(probe, Ok(Ok(_)));
    println!("proxy {}: {}", endpoint.authority(), if reachable { "reachable" } else { "unreachable" });
    Ok(())
}

async fn serve_tunnel(cfg: Config, args: TunnelArgs) -> Result<()> {
    let mut tunnel_cfg = cfg.tunnel.clone();
    for r in &args.routes {
        let (from, to) = parse_route(r).with_context(|| format!("bad --route '{r}', expected host:port=ip:port"))?;
        tunnel_cfg.routes.insert(from, to);
    }
    let listen = args.listen.unwrap_or_else(|| cfg.endpoint().authority());
    let proxy = TunnelProxy::bind(listen.as_str(), tunnel_cfg)
        .await
        .with_context(|| format!("bind {listen}"))?;
    let addr = proxy.local_addr()?;
    println!("tunnel proxy listening on {addr}");
    let server = proxy.spawn();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        j = server => {
            match j {
                Ok(Ok(())) => warn!("tunnel proxy exited"),
                Ok(Err(e)) => eprintln!("tunnel proxy error: {e}"),
                Err(e) => eprintln!("tunnel task join error: {e}"),
            }
        }
    }
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    let service = Arc::new(ChildProcessService::new(cfg.service_config()));
    let controller = ServiceController::new(service.clone() as Arc<dyn BackgroundService>);
    controller.startup().await.context("start background service")?;
    println!("service started ({}); enter a URL to fetch, 'restart' or 'quit'", cfg.service_config().program.display());

    let (tx, mut states) = mpsc::unbounded_channel();
    let poller = spawn_state_poller(service, Arc::new(ChannelObserver(tx)), cfg.poller_config());
    let client = build_client(cfg)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            Some(state) = states.recv() => {
                println!("state: {state}");
            }
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else { break };
                match line.trim() {
                    "" => {}
                    "quit" | "exit" => break,
                    "restart" => {
                        let pending = controller.spawn_restart();
                        tokio::spawn(async move {
                            match pending.await {
                                Ok(Ok(())) => println!("service restarted"),
                                Ok(Err(e)) => println!("restart failed: {e}"),
                                Err(e) => println!("restart task failed: {e}"),
                            }
                        });
                    }
                    url => {
                        println!("Loading: {url}");
                        let tag = client.tag(url);
                        client.fetch_with(url, tag, |result| print!("{}", render_outcome(&result)));
                    }
                }
            }
        }
    }

    let published = poller.shutdown().await;
    info!(published, "poller stopped");
    if let Err(e) = controller.stop().await {
        warn!(error = %e, "service stop failed");
    }
    Ok(())
}

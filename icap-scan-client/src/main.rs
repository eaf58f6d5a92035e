use clap::Parser;
use icap_scan::error::{IcapError, IcapResult};
use icap_scan::{Client, ClientBuilder, Config, ScanRequest, Vendor, Verdict};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "icap-scan-client",
    about = "Scan files with an ICAP antivirus server",
    disable_version_flag = true,
    long_about = "Submits a file over ICAP RESPMOD to a Kaspersky or Symantec engine and prints the verdict"
)]
struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Full ICAP URI like icap://host[:port]/service (overrides the config file)
    #[arg(short = 'u', long)]
    uri: Option<String>,

    /// AV engine behind the ICAP port: kaspersky|symantec
    #[arg(long)]
    vendor: Option<Vendor>,

    /// File to scan
    #[arg(short = 'f', long)]
    filename: Option<PathBuf>,

    /// Name reported to the server instead of the file's base name
    #[arg(long)]
    name: Option<String>,

    /// Send OPTIONS and print the raw answer
    #[arg(long, action = clap::ArgAction::SetTrue)]
    options: bool,

    /// Also print the engine version and the raw ICAP response
    #[arg(long, action = clap::ArgAction::SetTrue)]
    deep: bool,

    /// Print the generated RESPMOD request without sending it
    #[arg(long = "print-request", action = clap::ArgAction::SetTrue)]
    print_request: bool,

    /// Debug level info to stdout
    #[arg(short = 'd', long)]
    debug_level: Option<u8>,
}

const DEFAULT_URI: &str = "icap://127.0.0.1:1344";

#[tokio::main]
async fn main() -> IcapResult<()> {
    let args = Args::parse();

    let debug_level = args.debug_level.unwrap_or(0);
    if debug_level > 0 {
        tracing_subscriber::fmt()
            .with_max_level(match debug_level {
                1 => tracing::Level::ERROR,
                2 => tracing::Level::WARN,
                3 => tracing::Level::INFO,
                4 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            })
            .init();
    }

    info!("Starting icap-scan-client");
    debug!("Arguments: {:?}", args);

    let client = build_client(&args)?;
    info!("Using {} ({})", client.endpoint(), client.vendor());

    if args.print_request {
        let request = match &args.filename {
            Some(path) => ScanRequest::new(std::fs::read(path)?, &display_name(&args, path)),
            None => ScanRequest::new(Vec::new(), args.name.as_deref().unwrap_or_default()),
        };
        println!("{}", String::from_utf8_lossy(&client.respmod_bytes(&request)));
        return Ok(());
    }

    if args.options || args.filename.is_none() {
        match client.query_options().await {
            Ok(response) => print!("{response}"),
            Err(e) => {
                report(&client, "OPTIONS", &e);
                return Err(e);
            }
        }
    }

    if let Some(path) = &args.filename {
        if let Err(e) = scan(&client, &args, path).await {
            report(&client, &format!("Scan of {}", path.display()), &e);
            return Err(e);
        }
    }

    Ok(())
}

/// Log a failure, blaming the server or the local side.
fn report(client: &Client, what: &str, e: &IcapError) {
    if e.is_remote() {
        error!("{} failed at {}: {}", what, client.endpoint(), e);
    } else {
        error!("{} failed locally: {}", what, e);
    }
}

fn build_client(args: &Args) -> IcapResult<Client> {
    let mut builder = match &args.config {
        Some(path) => ClientBuilder::from_config(&Config::load(path)?),
        None => ClientBuilder::new().from_uri(DEFAULT_URI)?,
    };
    if let Some(uri) = &args.uri {
        builder = builder.from_uri(uri)?;
    }
    if let Some(vendor) = args.vendor {
        builder = builder.vendor(vendor);
    }
    builder.build()
}

fn display_name(args: &Args, path: &Path) -> String {
    match &args.name {
        Some(name) => name.clone(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

async fn scan(client: &Client, args: &Args, path: &Path) -> IcapResult<()> {
    let payload = tokio::fs::read(path).await?;
    let name = display_name(args, path);
    debug!("Read {} bytes from {}", payload.len(), path.display());

    let (raw, verdict) = client.scan_verdict(payload, &name).await?;
    match &verdict {
        Verdict::Clean => println!("{name}: clean"),
        Verdict::Infected { virus_name } => println!("{name}: infected ({virus_name})"),
        Verdict::Heuristic { signature_name } => {
            println!("{name}: suspicious ({signature_name})")
        }
    }
    if client.vendor().verdict_is_partial() {
        warn!("{} verdicts only reflect X-Virus-ID", client.vendor());
    }

    if args.deep {
        match client.engine_version().await {
            Ok(version) => println!("Engine: {version}"),
            Err(e) => warn!("Could not read engine version: {}", e),
        }
        println!();
        print!("{raw}");
    }
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ldif_directory::backend::MemoryBackend;
use ldif_directory::ber::decode_length;
use ldif_directory::import::{configured_plugins, import_ldif, ImportConfig};
use ldif_directory::ldap_handler::LdapHandler;
use ldif_directory::ldap_protocol::parse_ldap_message;
use ldif_directory::ldif_writer::LdifWriter;
use ldif_directory::metrics::{BackendStatus, StatusFn};
use ldif_directory::{run_metrics_server, Config, LdapServer, Metrics};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ldif-directory")]
#[command(about = "LDAP v3 directory server with an in-memory backend loaded from LDIF")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the configured LDIF files and serve LDAP.
    Serve {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Listen URL (overrides config; e.g. ldap://:1389)
        #[arg(short = 'l', long, value_name = "URL")]
        listen: Option<String>,
    },
    /// Read LDIF files, report what would be imported and optionally write the result.
    Import {
        /// Configuration file supplying suffixes, schema and import defaults
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// LDIF files, read in order as one stream
        #[arg(long = "ldif", value_name = "FILE", num_args = 1.., required = true)]
        ldif: Vec<PathBuf>,

        /// Write rejected entries here
        #[arg(long, value_name = "FILE")]
        reject: Option<PathBuf>,

        /// Write skipped entries here
        #[arg(long, value_name = "FILE")]
        skip: Option<PathBuf>,

        /// Do not check entries against the schema
        #[arg(long)]
        no_schema_check: bool,

        /// Write the imported entries as LDIF
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Decode a raw capture of BER-encoded LDAP messages and print them.
    Decode {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("ldif_directory={},info", log_level))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Serve { config, listen } => serve(config, listen).await,
        Command::Import {
            config,
            ldif,
            reject,
            skip,
            no_schema_check,
            output,
        } => import(config, ldif, reject, skip, no_schema_check, output).await,
        Command::Decode { file } => decode(file),
    }
}

async fn serve(config_path: PathBuf, listen: Option<String>) -> Result<()> {
    info!("Starting LDIF directory server");
    let config = Config::from_file(&config_path)?;
    let listen_url = listen.unwrap_or_else(|| config.listen.url.clone());

    let schema = Arc::new(config.build_schema());
    let backend = Arc::new(MemoryBackend::new(config.suffix_dns()?).with_schema(Arc::clone(&schema)));
    let metrics = Arc::new(Metrics::new());

    info!("Configuration loaded:");
    info!("  Listen URL: {}", listen_url);
    info!("  Suffixes: {}", config.suffixes.join("; "));
    info!("  Syntax enforcement: {}", config.schema.syntax_enforcement);
    info!("  LDIF files: {}", config.import.ldif_files.len());

    let ready = Arc::new(AtomicBool::new(false));
    if let Some(addr) = config.metrics_listen.clone() {
        let metrics_for_http = Arc::clone(&metrics);
        let backend_for_status = Arc::clone(&backend);
        let ready_for_status = Arc::clone(&ready);
        let status: StatusFn = Arc::new(move || BackendStatus {
            ready: ready_for_status.load(Ordering::Relaxed),
            entries: backend_for_status.len(),
        });
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&addr, metrics_for_http, status).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    if !config.import.ldif_files.is_empty() {
        let import_config = ImportConfig::from_settings(&config.import)?;
        let plugins = configured_plugins(&config.import);
        let import_schema = Arc::clone(&schema);
        let import_backend = Arc::clone(&backend);
        let summary = tokio::task::spawn_blocking(move || {
            import_ldif(import_config, import_schema, plugins, &import_backend)
        })
        .await
        .context("LDIF import task failed")??;
        metrics.record_import(&summary);
    }
    ready.store(true, Ordering::Relaxed);

    let handler = Arc::new(LdapHandler::new(
        backend,
        schema,
        config.import.validate_schema,
    ));
    let server = LdapServer::new(listen_url, handler, metrics);
    server.start().await
}

async fn import(
    config_path: Option<PathBuf>,
    ldif: Vec<PathBuf>,
    reject: Option<PathBuf>,
    skip: Option<PathBuf>,
    no_schema_check: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let mut settings = config.import.clone();
    settings.ldif_files = ldif;
    if reject.is_some() {
        settings.reject_file = reject;
    }
    if skip.is_some() {
        settings.skip_file = skip;
    }
    if no_schema_check {
        settings.validate_schema = false;
    }

    let schema = Arc::new(config.build_schema());
    let backend = Arc::new(MemoryBackend::new(config.suffix_dns()?).with_schema(Arc::clone(&schema)));
    let import_config = ImportConfig::from_settings(&settings)?;
    let plugins = configured_plugins(&settings);
    let import_backend = Arc::clone(&backend);
    let summary = tokio::task::spawn_blocking(move || {
        import_ldif(import_config, schema, plugins, &import_backend)
    })
    .await
    .context("LDIF import task failed")??;

    if let Some(path) = output {
        let file = File::create(&path)
            .with_context(|| format!("Failed to create output file {}", path.display()))?;
        let mut writer = LdifWriter::new(BufWriter::new(file));
        for entry in backend.entries() {
            writer.write_entry(&entry)?;
        }
        writer.flush()?;
        info!("Wrote {} entries to {}", backend.len(), path.display());
    }

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &summary)?;
    writeln!(stdout)?;
    Ok(())
}

fn decode(path: PathBuf) -> Result<()> {
    let data = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut offset = 0;
    let (mut decoded, mut failed) = (0usize, 0usize);
    while offset < data.len() {
        let (content_len, length_len) = decode_length(&data, offset + 1)
            .with_context(|| format!("Invalid message length at offset {}", offset))?;
        let end = offset + 1 + length_len + content_len;
        if end > data.len() {
            warn!("Truncated message at offset {} ({} bytes missing)", offset, end - data.len());
            break;
        }
        match parse_ldap_message(&data[offset..end]) {
            Ok(message) => {
                println!("# offset {}\n{:#?}", offset, message);
                decoded += 1;
            }
            Err(e) => {
                println!("# offset {}: {}", offset, e);
                failed += 1;
            }
        }
        offset = end;
    }
    info!("Decoded {} messages, {} failed", decoded, failed);
    Ok(())
}

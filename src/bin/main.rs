//! PDF Signer CLI
//!
//! Lists signing candidates from the configured credential stores, signs PDF
//! documents with a chosen credential, and manages the configuration file.

use clap::{Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use pdf_signer::adapters::keystore::os_store::serial_matches;
use pdf_signer::adapters::keystore::{CredentialProvider, Pkcs11Provider, Pkcs12Provider};
use pdf_signer::infra::config::ExportFormat;
use pdf_signer::{
    eligible_candidates, provider_for, AppearanceConfiguration, CertificateValidator,
    CertificationLevel, ConfigManager, CredentialDescriptor, HttpCrlSource, KeystoreKind,
    PlacementRect, Secret, SecretPrompt, SecretRequest, SignatureEngine, SignerConfiguration,
    SigningError, TimestampClient, TimestampHttpClient, TimestampUrl,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pdf-signer")]
#[command(about = "Digitally sign PDF documents with certificate stores, tokens and PKCS#12 files")]
#[command(long_about = "
PDF Signer - detached CAdES signatures for PDF documents

EXAMPLES:
    # List certificates usable for signing
    pdf-signer list --pfx me.p12

    # Invisible signature from a PKCS#12 file
    pdf-signer sign contract.pdf -o signed.pdf --pfx me.p12

    # Visible, timestamped signature from a hardware token certificate
    pdf-signer sign contract.pdf -o signed.pdf --cert 3A7F01 \\
        --page 1 --rect 36,36,220,80 --reason Approved --timestamp

ENVIRONMENT VARIABLES:
    PDF_SIGNER_SECRET   PIN or password used for the first unlock attempt
    RUST_LOG            Logging level (debug, info, warn, error)
")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List certificates eligible for signing
    List {
        /// PKCS#12 files to include
        #[arg(long, value_name = "FILE")]
        pfx: Vec<PathBuf>,

        /// Show validity details for each certificate
        #[arg(short, long)]
        detailed: bool,
    },

    /// Sign a PDF document
    Sign(SignArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(clap::Args)]
struct SignArgs {
    /// PDF file to sign
    #[arg(value_name = "INPUT_FILE")]
    input_file: PathBuf,

    /// Output file path (defaults to overwriting the input file)
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    output: Option<PathBuf>,

    /// Sign with this PKCS#12 file
    #[arg(long, value_name = "FILE", conflicts_with = "cert")]
    pfx: Option<PathBuf>,

    /// Sign with the listed certificate that has this serial (hex)
    #[arg(long, value_name = "SERIAL")]
    cert: Option<String>,

    /// 1-based page for a visible signature
    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Visible rectangle as x,y,width,height in points; omit for invisible
    #[arg(long, value_name = "RECT")]
    rect: Option<PlacementRect>,

    #[arg(long)]
    reason: Option<String>,

    #[arg(long)]
    location: Option<String>,

    /// Extra note drawn in the signature (60 characters at most)
    #[arg(long, value_name = "TEXT")]
    text: Option<String>,

    /// Image drawn beside the description
    #[arg(long, value_name = "IMAGE")]
    graphic: Option<PathBuf>,

    /// Image drawn faintly behind the signature
    #[arg(long, value_name = "IMAGE")]
    watermark: Option<PathBuf>,

    /// Show the whole subject DN instead of the common name
    #[arg(long)]
    full_subject: bool,

    /// Add the organization line
    #[arg(long)]
    organization: bool,

    /// Certify the document instead of adding an approval signature
    #[arg(long, value_enum, default_value = "none")]
    certify: CertifyArg,

    /// Request an RFC 3161 timestamp
    #[arg(long)]
    timestamp: bool,

    /// Timestamp authority URL (overrides config)
    #[arg(long, value_name = "URL")]
    tsa_url: Option<String>,

    /// Embed CRLs for long-term validation
    #[arg(long)]
    ltv: bool,

    /// Draw the legacy validity mark layer
    #[arg(long)]
    ok_mark: bool,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Create default configuration file
    Init,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },

    /// Print the configuration file location
    Path,

    /// Export configuration
    Export {
        /// Export format
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ExportFormatArg,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import configuration
    Import {
        /// Configuration file to import
        file: PathBuf,
        /// Import format
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ExportFormatArg,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum CertifyArg {
    None,
    NoChanges,
    FormFilling,
    FormFillingAndAnnotations,
}

impl From<CertifyArg> for CertificationLevel {
    fn from(arg: CertifyArg) -> Self {
        match arg {
            CertifyArg::None => CertificationLevel::NotCertified,
            CertifyArg::NoChanges => CertificationLevel::NoChangesAllowed,
            CertifyArg::FormFilling => CertificationLevel::FormFilling,
            CertifyArg::FormFillingAndAnnotations => CertificationLevel::FormFillingAndAnnotations,
        }
    }
}

#[derive(ValueEnum, Clone)]
enum ExportFormatArg {
    Toml,
    Json,
    Yaml,
}

impl From<ExportFormatArg> for ExportFormat {
    fn from(arg: ExportFormatArg) -> Self {
        match arg {
            ExportFormatArg::Toml => ExportFormat::Toml,
            ExportFormatArg::Json => ExportFormat::Json,
            ExportFormatArg::Yaml => ExportFormat::Yaml,
        }
    }
}

/// Secrets from `PDF_SIGNER_SECRET` first, then from the terminal.
struct TerminalPrompt {
    preset: Option<Secret>,
}

impl TerminalPrompt {
    fn from_env() -> Self {
        Self {
            preset: std::env::var("PDF_SIGNER_SECRET").ok().map(Secret::new),
        }
    }
}

impl SecretPrompt for TerminalPrompt {
    fn request_secret(&mut self, request: &SecretRequest) -> Option<Secret> {
        if let Some(secret) = self.preset.take() {
            return Some(secret);
        }
        eprint!("{} [{}] ", request.message, request.target);
        std::io::stderr().flush().ok()?;
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(Secret::from(line.trim_end_matches(['\r', '\n']))),
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::List { pfx, detailed } => handle_list_command(pfx, detailed),
        Commands::Sign(args) => handle_sign_command(args),
        Commands::Config(config_cmd) => handle_config_command(config_cmd),
    };

    if let Err(report) = result {
        if report
            .downcast_ref::<SigningError>()
            .is_some_and(SigningError::is_cancellation)
        {
            println!("Operation cancelled.");
            return;
        }
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

fn load_config() -> Result<SignerConfiguration> {
    let manager = ConfigManager::new()?;
    Ok(manager.load_or_create_default()?)
}

/// Providers for the stores the CLI can reach. The OS store needs a platform
/// backend supplied by an embedding application.
fn cli_providers(config: &SignerConfiguration, pfx: &[PathBuf]) -> Vec<Box<dyn CredentialProvider>> {
    let mut providers: Vec<Box<dyn CredentialProvider>> = Vec::new();
    if config.is_store_active(KeystoreKind::OsStore) {
        log::warn!("OS certificate store is active but not available from the command line");
    }
    if config.is_store_active(KeystoreKind::HardwareToken) {
        providers.push(Box::new(Pkcs11Provider::new(
            config.pkcs11_library_paths.clone(),
            Box::new(TerminalPrompt::from_env()),
        )));
    }
    for path in pfx {
        providers.push(Box::new(Pkcs12Provider::new(
            path,
            Box::new(TerminalPrompt::from_env()),
        )));
    }
    providers
}

fn handle_list_command(pfx: Vec<PathBuf>, detailed: bool) -> Result<()> {
    let mut config = load_config()?;
    if !pfx.is_empty() && !config.is_store_active(KeystoreKind::File) {
        config.active_stores.push(KeystoreKind::File);
    }
    let mut providers = cli_providers(&config, &pfx);
    let candidates = eligible_candidates(&config, &mut providers);

    if candidates.is_empty() {
        println!("No eligible signing certificates found.");
        return Ok(());
    }
    println!("Eligible signing certificates:");
    for candidate in &candidates {
        print_candidate(candidate, detailed);
    }
    Ok(())
}

fn print_candidate(candidate: &CredentialDescriptor, detailed: bool) {
    let location = match candidate.kind {
        KeystoreKind::File => candidate
            .file_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        KeystoreKind::HardwareToken => format!(
            "token {}",
            candidate.token_serial.as_deref().unwrap_or("?")
        ),
        KeystoreKind::OsStore => candidate.label.clone().unwrap_or_default(),
    };
    match &candidate.certificate {
        Some(cert) => {
            println!("  [{}] {} ({location})", candidate.kind, cert.subject_name());
            println!("      serial: {}", cert.serial_hex());
            if detailed {
                let analysis = CertificateValidator::analyze(cert);
                println!("      issuer: {}", analysis.issuer);
                println!("      days until expiry: {}", analysis.days_until_expiry);
                for warning in &analysis.warnings {
                    println!("      warning: {warning}");
                }
            }
        }
        None => println!("  [{}] {location} (locked)", candidate.kind),
    }
}

fn handle_sign_command(args: SignArgs) -> Result<()> {
    let config = load_config()?;
    let output_path = args.output.clone().unwrap_or_else(|| args.input_file.clone());

    let mut provider = select_provider(&config, &args)?;

    let mut appearance = AppearanceConfiguration::new(args.page, args.rect);
    appearance.show_graphic = args.graphic.is_some();
    appearance.graphic_path = args.graphic;
    appearance.watermark_path = args.watermark;
    appearance.show_entire_subject = args.full_subject;
    appearance.include_organization = args.organization;
    appearance.certification_level = args.certify.into();
    appearance.reason = args.reason;
    appearance.location = args.location;
    appearance.custom_text = args.text;
    appearance.enable_timestamp = args.timestamp;
    appearance.enable_ltv = args.ltv;
    appearance.enable_visual_ok_mark = args.ok_mark;

    let timestamp_client = match &args.tsa_url {
        Some(url) => Some(TimestampHttpClient::new(
            TimestampUrl::new(url)?,
            config.network_timeout(),
        )?),
        None => TimestampHttpClient::from_config(&config)?,
    };

    let mut engine = SignatureEngine::new().with_author(config.author.clone());
    if args.ltv {
        engine =
            engine.with_revocation_source(Box::new(HttpCrlSource::new(config.network_timeout())?));
    }

    let document = std::fs::read(&args.input_file)
        .into_diagnostic()
        .with_context(|| format!("Failed to read {}", args.input_file.display()))?;

    let signed = engine.sign(
        document,
        provider.as_mut(),
        &appearance,
        timestamp_client.as_ref().map(|c| c as &dyn TimestampClient),
    )?;
    signed.write_to(&output_path)?;

    println!("Document signed: {}", output_path.display());
    println!("  Field: {}", signed.field_name());
    println!(
        "  Container: {} of {} reserved bytes",
        signed.container_len(),
        signed.reserved_len()
    );
    if let Some(client) = &timestamp_client {
        if args.timestamp {
            println!("  Timestamp authority: {}", client.url());
        }
    }
    Ok(())
}

fn select_provider(
    config: &SignerConfiguration,
    args: &SignArgs,
) -> Result<Box<dyn CredentialProvider>> {
    if let Some(path) = &args.pfx {
        let descriptor = CredentialDescriptor::file(path.clone());
        return Ok(provider_for(
            &descriptor,
            config,
            Box::new(TerminalPrompt::from_env()),
            None,
        )?);
    }

    let serial = args.cert.as_deref().ok_or_else(|| {
        miette::miette!("Choose a credential with --pfx FILE or --cert SERIAL (see `pdf-signer list`)")
    })?;
    let mut providers = cli_providers(config, &[]);
    let candidates = eligible_candidates(config, &mut providers);
    let descriptor = candidates
        .iter()
        .find(|c| {
            c.certificate
                .as_ref()
                .is_some_and(|cert| serial_matches(cert, serial))
        })
        .ok_or_else(|| {
            SigningError::CertificateNotFound(format!("Certificate with serial {serial} not found"))
        })?;

    Ok(provider_for(
        descriptor,
        config,
        Box::new(TerminalPrompt::from_env()),
        None,
    )?)
}

fn handle_config_command(config_cmd: ConfigCommands) -> Result<()> {
    let config_manager = ConfigManager::new()?;

    match config_cmd {
        ConfigCommands::Show => match config_manager.load() {
            Ok(config) => {
                let stores: Vec<_> = config.active_stores.iter().map(|k| k.as_str()).collect();
                println!("Current Configuration:");
                println!("  Active stores: {}", stores.join(", "));
                for path in &config.pkcs11_library_paths {
                    println!("  PKCS#11 module: {}", path.display());
                }
                if config.timestamp.url.is_empty() {
                    println!("  Timestamp authority: (none)");
                } else {
                    println!("  Timestamp authority: {}", config.timestamp.url);
                }
                println!("  Network timeout: {}s", config.network_timeout_seconds);
                println!("  Author: {}", config.author);
                println!(
                    "  Configuration file: {}",
                    config_manager.config_path().display()
                );
            }
            Err(_) => {
                println!("No configuration file found. Use 'config init' to create one.");
            }
        },

        ConfigCommands::Init => {
            config_manager.load_or_create_default()?;
            println!(
                "Configuration initialized: {}",
                config_manager.config_path().display()
            );
        }

        ConfigCommands::Set { key, value } => {
            config_manager.update_value(&key, &value)?;
            println!("Configuration updated: {key}");
        }

        ConfigCommands::Path => {
            println!("{}", config_manager.config_path().display());
        }

        ConfigCommands::Export { format, output } => {
            let content = config_manager.export_config(format.into())?;
            if let Some(output_path) = output {
                std::fs::write(&output_path, content).into_diagnostic()?;
                println!("Configuration exported to: {}", output_path.display());
            } else {
                println!("{content}");
            }
        }

        ConfigCommands::Import { file, format } => {
            let content = std::fs::read_to_string(&file).into_diagnostic()?;
            config_manager.import_config(&content, format.into())?;
            println!("Configuration imported from: {}", file.display());
        }
    }

    Ok(())
}

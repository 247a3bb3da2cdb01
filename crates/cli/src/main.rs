use clap::{Parser, Subcommand};
use medst_core::config::client_config_from_env;
use medst_core::models::{ClinicQuery, ClinicResult, NewUser, RecordId, ServiceType, UploadFile};
use medst_core::records::{download_record_to, fetch_record};
use medst_core::shared_upload::SharedUploadPage;
use medst_core::{
    AccountService, GuardOutcome, HttpPortalApi, PortalApi, PortalError, RecordsViewModel,
    RequestDialog, Session, SessionGuard, SharedUploadStatus,
};
use medst_types::{EmailAddress, NonEmptyText};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "medst")]
#[command(about = "medst patient portal CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the access token
    Login {
        /// Account email
        email: String,
        /// Account password
        password: String,
    },
    /// Create a patient account
    Register {
        email: String,
        password: String,
        /// Full name (optional)
        #[arg(long)]
        full_name: Option<String>,
        /// Date of birth, YYYY-MM-DD (optional)
        #[arg(long)]
        dob: Option<String>,
    },
    /// Forget the stored access token
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Manage health records
    Records {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Search clinics by name
    Clinics {
        /// Clinic name
        name: String,
        /// Location filter (optional)
        #[arg(long)]
        location: Option<String>,
    },
    /// Ask a clinic to upload your records
    Request {
        /// Clinic name
        clinic: String,
        /// Clinic email address
        email: String,
        /// Service type (doctor, pathology, radiology, physiotherapy, other)
        #[arg(long, default_value = "doctor")]
        service: ServiceType,
    },
    /// Upload a file through a shared upload link
    SharedUpload {
        /// Link containing ?token=
        link: String,
        /// File to upload
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum RecordCommands {
    /// List all records
    List,
    /// Show one record
    Show { id: String },
    /// Upload a document
    Upload { file: PathBuf },
    /// Download a record's file
    Download {
        id: String,
        /// Target directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Delete a record
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("medst=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'medst --help' for commands");
        return Ok(());
    };

    let cfg = client_config_from_env()?;
    tracing::debug!("using backend {}", cfg.api_base_url());
    let api = Arc::new(HttpPortalApi::new(&cfg)?);
    let session = Session::from_file(cfg.token_file());

    match run(command, api, session).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_redirect_to_login() => {
            eprintln!("{} Run 'medst login <email> <password>'.", e.user_message());
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            std::process::exit(1);
        }
    }
}

/// Refuses protected commands before any request is made.
fn require_login(session: &Session) -> Result<(), PortalError> {
    match SessionGuard::check(session) {
        GuardOutcome::Allowed => Ok(()),
        GuardOutcome::RedirectToLogin => Err(PortalError::NotAuthenticated),
    }
}

async fn run(command: Commands, api: Arc<HttpPortalApi>, session: Session) -> Result<(), PortalError> {
    match command {
        Commands::Login { email, password } => {
            AccountService::new(api, session)
                .login(&email, &password)
                .await?;
            println!("Signed in as {}", email.trim());
        }
        Commands::Register {
            email,
            password,
            full_name,
            dob,
        } => {
            let user = NewUser::patient(EmailAddress::parse(&email)?, password, full_name, dob)?;
            let created = AccountService::new(api, session).register(&user).await?;
            println!("Registered {} (id {}). You can now log in.", created.email, created.id);
        }
        Commands::Logout => {
            AccountService::new(api, session).logout()?;
            println!("Signed out.");
        }
        Commands::Whoami => {
            require_login(&session)?;
            let me = AccountService::new(api, session).current_user().await?;
            println!("{} <{}>", me.display_name(), me.email);
        }
        Commands::Records { command } => {
            require_login(&session)?;
            run_records(command, api, session).await?;
        }
        Commands::Clinics { name, location } => {
            let query = ClinicQuery {
                name: NonEmptyText::new(&name)?,
                location: location.and_then(|l| NonEmptyText::new(l).ok()),
            };
            let response = api.search_clinics(&query).await?;
            if response.results.is_empty() {
                println!("No clinics found.");
            }
            for clinic in response.results {
                println!(
                    "{}  {}  {}",
                    clinic.name,
                    clinic.address.as_deref().unwrap_or("-"),
                    clinic.rating_display()
                );
            }
        }
        Commands::Request {
            clinic,
            email,
            service,
        } => {
            require_login(&session)?;
            let mut dialog = RequestDialog::new(api, session);
            dialog.open(ClinicResult {
                place_id: String::new(),
                name: clinic,
                address: None,
                rating: None,
                review_count: None,
            });
            dialog.set_email(&email);
            dialog.set_service_type(service);
            let receipt = dialog.submit().await?;
            println!("{}", receipt.message);
            println!("Upload link: {}", receipt.link);
        }
        Commands::SharedUpload { link, file } => {
            let mut page = SharedUploadPage::mount(api, &link);
            if page.has_token() {
                page.select(UploadFile::from_path(&file).await?);
            }
            match page.upload().await {
                SharedUploadStatus::Succeeded(message) => println!("{message}"),
                other => {
                    let message = other.message().unwrap_or("Upload failed.").to_owned();
                    return Err(PortalError::InvalidInput(message));
                }
            }
        }
    }
    Ok(())
}

async fn run_records(
    command: RecordCommands,
    api: Arc<HttpPortalApi>,
    session: Session,
) -> Result<(), PortalError> {
    match command {
        RecordCommands::List => {
            let (view, loaded) = RecordsViewModel::mount(api, session).await;
            loaded?;
            let records = view.records();
            if records.is_empty() {
                println!("No health records yet.");
            }
            for record in records {
                println!("{:>6}  {}", record.id, record.title());
                println!("        {}", record.context_summary());
            }
        }
        RecordCommands::Show { id } => {
            let record = fetch_record(api.as_ref(), &session, &id.parse::<RecordId>()?).await?;
            println!("{}", record.title());
            println!("Uploaded: {}", record.created_at.format("%Y-%m-%d %H:%M"));
            if let Some(clinic) = &record.provider_clinic {
                println!("Clinic: {clinic}");
            }
            if let Some(specialty) = &record.provider_specialty {
                println!("Specialty: {specialty}");
            }
            println!("{}", record.context_summary());
            if let Some(text) = &record.content_text {
                println!();
                println!("{text}");
            }
        }
        RecordCommands::Upload { file } => {
            let view = RecordsViewModel::new(api, session);
            let record = view.upload(UploadFile::from_path(&file).await?).await?;
            println!("Uploaded as record {}: {}", record.id, record.title());
        }
        RecordCommands::Download { id, dir } => {
            let path =
                download_record_to(api.as_ref(), &session, &id.parse::<RecordId>()?, &dir).await?;
            println!("Saved {}", path.display());
        }
        RecordCommands::Delete { id } => {
            let view = RecordsViewModel::new(api, session);
            view.delete(&id.parse::<RecordId>()?).await?;
            println!("Record {id} deleted.");
        }
    }
    Ok(())
}

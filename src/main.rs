use medst_core::config::client_config_from_env;
use medst_core::models::{RecordId, ServiceType, UploadFile};
use medst_core::records::{download_record_to, fetch_record};
use medst_core::{
    AccountService, ClinicSearchController, GuardOutcome, HttpPortalApi, PortalError,
    RecordsViewModel, RequestDialog, Session, SessionGuard, SharedUploadPage,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
Account
  login <email> <password>   sign in
  register <email> <password> [full name]
  logout                     sign out
  whoami                     show the signed-in user
Records page
  records                    open the page and load records
  reload                     load again
  upload <path>              upload a document
  show <id>                  show one record
  download <id> [dir]        save a record's file
  delete <id>                delete a record
Clinic search page
  search <text>              type into the search box
  location <text>            set the location filter
  go                         search now
  results                    list current results
  select <n>                 request records from result n
Request dialog
  email <address>            clinic email
  service <type>             doctor, pathology, radiology, physiotherapy, other
  send                       submit the request
  cancel                     close the dialog
Shared link
  shared <link> <path>       upload a file through a shared link
  help | quit";

/// Interactive session holding one instance of each page.
struct Shell {
    api: Arc<HttpPortalApi>,
    session: Session,
    records: Option<RecordsViewModel<HttpPortalApi>>,
    search: ClinicSearchController<HttpPortalApi>,
    dialog: RequestDialog<HttpPortalApi>,
}

impl Shell {
    fn new(api: Arc<HttpPortalApi>, session: Session, debounce: std::time::Duration) -> Self {
        Self {
            search: ClinicSearchController::new(api.clone(), debounce),
            dialog: RequestDialog::new(api.clone(), session.clone()),
            records: None,
            api,
            session,
        }
    }

    fn account(&self) -> AccountService<HttpPortalApi> {
        AccountService::new(self.api.clone(), self.session.clone())
    }

    /// Leaves every protected page, as a redirect to the login screen does.
    fn redirect_to_login(&mut self) {
        if let Some(view) = self.records.take() {
            view.teardown();
        }
        self.dialog.close();
        println!("Please log in to continue. Use: login <email> <password>");
    }

    fn records_page(&self) -> Result<&RecordsViewModel<HttpPortalApi>, PortalError> {
        self.records
            .as_ref()
            .ok_or_else(|| PortalError::InvalidInput("Open the records page first: records".into()))
    }

    async fn dispatch(&mut self, command: &str, args: &str) -> Result<(), PortalError> {
        match command {
            "login" => {
                let mut parts = args.split_whitespace();
                let email = parts.next().unwrap_or_default();
                let password = parts.next().unwrap_or_default();
                self.account().login(email, password).await?;
                println!("Signed in as {email}");
            }
            "register" => {
                let mut parts = args.splitn(3, ' ');
                let email = medst_types::EmailAddress::parse(parts.next().unwrap_or_default())?;
                let password = parts.next().unwrap_or_default();
                let full_name = parts.next().map(str::to_owned);
                let user = medst_core::models::NewUser::patient(email, password, full_name, None)?;
                let created = self.account().register(&user).await?;
                println!("Registered {}. You can now log in.", created.email);
            }
            "logout" => {
                self.account().logout()?;
                self.redirect_to_login();
            }
            "whoami" => {
                let me = self.account().current_user().await?;
                println!("{} <{}>", me.display_name(), me.email);
            }
            "records" => {
                if SessionGuard::check(&self.session) == GuardOutcome::RedirectToLogin {
                    return Err(PortalError::NotAuthenticated);
                }
                if let Some(previous) = self.records.take() {
                    previous.teardown();
                }
                let (view, loaded) =
                    RecordsViewModel::mount(self.api.clone(), self.session.clone()).await;
                self.records = Some(view);
                if let Err(e) = loaded {
                    if e.is_redirect_to_login() {
                        return Err(e);
                    }
                }
                self.print_records()?;
            }
            "reload" => {
                self.records_page()?.load().await?;
                self.print_records()?;
            }
            "upload" => {
                let file = UploadFile::from_path(args.trim()).await?;
                let record = self.records_page()?.upload(file).await?;
                println!("Uploaded: {}", record.title());
                self.print_records()?;
            }
            "show" => {
                let id: RecordId = args.trim().parse()?;
                let record = fetch_record(self.api.as_ref(), &self.session, &id).await?;
                println!("{}", record.title());
                println!("{}", record.context_summary());
                if let Some(text) = &record.content_text {
                    println!("{text}");
                }
            }
            "download" => {
                let mut parts = args.split_whitespace();
                let id: RecordId = parts.next().unwrap_or_default().parse()?;
                let dir = PathBuf::from(parts.next().unwrap_or("."));
                let path = download_record_to(self.api.as_ref(), &self.session, &id, &dir).await?;
                println!("Saved {}", path.display());
            }
            "delete" => {
                let id: RecordId = args.trim().parse()?;
                self.records_page()?.delete(&id).await?;
                println!("Record {id} deleted.");
                self.print_records()?;
            }
            "search" => {
                self.search.set_query(args);
                if args.trim().is_empty() {
                    println!("Search cleared.");
                }
            }
            "location" => self.search.set_location(args),
            "go" => {
                self.search.search_now().await;
                self.print_results();
            }
            "results" => self.print_results(),
            "select" => {
                let index: usize = args
                    .trim()
                    .parse()
                    .map_err(|_| PortalError::InvalidInput("select takes a result number".into()))?;
                let clinic = index
                    .checked_sub(1)
                    .and_then(|i| self.search.select(i))
                    .ok_or_else(|| PortalError::InvalidInput(format!("no result {index}")))?;
                println!("Requesting records from {}", clinic.name);
                self.dialog.open(clinic);
                println!(
                    "email: {:?}  service: {}",
                    self.dialog.email(),
                    self.dialog.service_type()
                );
            }
            "email" => self.dialog.set_email(args),
            "service" => self.dialog.set_service_type(args.parse::<ServiceType>()?),
            "send" => {
                let receipt = self.dialog.submit().await?;
                println!("{}", receipt.message);
            }
            "cancel" => self.dialog.close(),
            "shared" => {
                let (link, path) = args.trim().split_once(' ').unwrap_or((args.trim(), ""));
                let mut page = SharedUploadPage::mount(self.api.clone(), link);
                if page.has_token() && !path.trim().is_empty() {
                    page.select(UploadFile::from_path(path.trim()).await?);
                }
                let status = page.upload().await;
                println!("{}", status.message().unwrap_or_default());
            }
            "help" => println!("{HELP}"),
            other => println!("Unknown command {other:?}. Type help."),
        }
        Ok(())
    }

    fn print_records(&self) -> Result<(), PortalError> {
        let view = self.records_page()?;
        if let Some(message) = view.status().error() {
            println!("! {message}");
        }
        let records = view.records();
        if records.is_empty() {
            println!("No health records yet.");
        }
        for record in records {
            println!("{:>6}  {}", record.id, record.title());
            println!("        {}", record.context_summary());
        }
        Ok(())
    }

    fn print_results(&self) {
        if let Some(message) = self.search.error() {
            println!("! {message}");
        }
        let results = self.search.results();
        if results.is_empty() {
            println!("No results.");
        }
        for (i, clinic) in results.iter().enumerate() {
            println!(
                "{:>3}. {}  {}  {}",
                i + 1,
                clinic.name,
                clinic.address.as_deref().unwrap_or("-"),
                clinic.rating_display()
            );
        }
    }
}

/// Main entry point for the interactive medst shell.
///
/// # Environment Variables
/// - `MEDST_API_URL`: backend base URL (default: "http://localhost:8000")
/// - `MEDST_TOKEN_FILE`: where the access token is kept (default: "~/.medst/session.json")
/// - `MEDST_REQUEST_TIMEOUT_SECS`: per-request timeout (default: 30)
/// - `MEDST_SEARCH_DEBOUNCE_MS`: clinic search quiet period (default: 300)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("medst=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = client_config_from_env()?;
    tracing::info!("medst shell using {}", cfg.api_base_url());

    let api = Arc::new(HttpPortalApi::new(&cfg)?);
    let session = Session::from_file(cfg.token_file());
    let mut shell = Shell::new(api, session, cfg.search_debounce());

    println!("medst patient portal. Type help for commands.");
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"medst> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, args) = line.split_once(' ').unwrap_or((line, ""));
        if matches!(command, "quit" | "exit") {
            break;
        }

        if let Err(e) = shell.dispatch(command, args).await {
            if e.is_redirect_to_login() {
                shell.redirect_to_login();
            } else {
                println!("! {}", e.user_message());
            }
        }
    }

    shell.search.teardown();
    if let Some(view) = shell.records.take() {
        view.teardown();
    }
    Ok(())
}

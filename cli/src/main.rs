use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use todo_client::App;
use todo_client::config::{ClientConfig, ConfigError};
use todo_client::net::types::{ApiError, TaskId};
use todo_client::pages::login::{LoginFlow, LoginState};
use todo_client::pages::register::RegisterState;
use todo_client::pages::todos::{AlwaysConfirm, Confirm, Outcome, TodoList};
use todo_client::routes::{MemoryNavigator, NavigationError};
use todo_client::state::auth::SessionStatus;
use todo_client::state::toast::ToastBus;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("client setup failed: {0}")]
    Api(#[from] ApiError),
    #[error("{0}")]
    Navigation(#[from] NavigationError),
    #[error("{field}: {message}")]
    InvalidField { field: &'static str, message: &'static str },
    #[error("{title}. {message} {recovery}")]
    LoginFailed { title: &'static str, message: &'static str, recovery: &'static str },
    #[error("registration failed: {0}")]
    RegisterFailed(String),
    #[error("not signed in; run `todo login` first")]
    NotSignedIn,
    #[error("task {0} is not in your list")]
    UnknownTask(TaskId),
    #[error("{0}")]
    Failed(String),
}

#[derive(Parser, Debug)]
#[command(name = "todo", about = "To Do List client")]
struct Cli {
    #[arg(long, env = "TODO_IDENTITY_URL")]
    identity_url: Option<String>,

    #[arg(long, env = "TODO_TASKS_URL")]
    tasks_url: Option<String>,

    #[arg(long, env = "TODO_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account, then sign in with it.
    Register(Credentials),
    Login(Credentials),
    /// Check the stored token with the identity service.
    Whoami,
    Logout,
    Tasks(TasksCommand),
}

#[derive(Args, Debug)]
struct Credentials {
    #[arg(long)]
    email: String,

    #[arg(long, env = "TODO_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args, Debug)]
struct TasksCommand {
    #[command(subcommand)]
    command: TasksSubcommand,
}

#[derive(Subcommand, Debug)]
enum TasksSubcommand {
    List,
    Add {
        title: String,
    },
    Toggle {
        id: TaskId,
    },
    Delete {
        id: TaskId,
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let navigator = Arc::new(MemoryNavigator::new());
    let app = App::from_config(&config, navigator)?;

    let result = match cli.command {
        Command::Register(creds) => run_register(&app, &config, creds).await,
        Command::Login(creds) => run_login(&app, app.login_flow(), &config, creds).await,
        Command::Whoami => run_whoami(&app).await,
        Command::Logout => {
            app.logout();
            Ok(())
        }
        Command::Tasks(tasks) => run_tasks(&app, tasks).await,
    };
    print_toasts(app.toasts());
    result
}

/// Flags override the environment, which overrides the defaults.
fn load_config(cli: &Cli) -> Result<ClientConfig, ConfigError> {
    ClientConfig::from_lookup(|key| match key {
        "TODO_IDENTITY_URL" => cli.identity_url.clone(),
        "TODO_TASKS_URL" => cli.tasks_url.clone(),
        "TODO_TOKEN_FILE" => cli.token_file.as_ref().map(|p| p.display().to_string()),
        _ => std::env::var(key).ok(),
    })
}

async fn run_register(app: &App, config: &ClientConfig, creds: Credentials) -> Result<(), CliError> {
    let mut flow = app.register_flow();
    flow.set_email(creds.email.as_str());
    flow.set_password(creds.password.as_str());

    let state = flow.submit().await.clone();
    if let Some(message) = flow.form().email_error {
        return Err(CliError::InvalidField { field: "email", message });
    }
    if let Some(message) = flow.form().password_error {
        return Err(CliError::InvalidField { field: "password", message });
    }
    match state {
        RegisterState::Registered { email } => {
            let login = app.referred_login_flow(email);
            if let Some(banner) = login.banner() {
                println!("{banner}");
            }
            run_login(app, login, config, creds).await
        }
        RegisterState::Form { error } => Err(CliError::RegisterFailed(error.unwrap_or_default())),
        RegisterState::Submitting => Ok(()),
    }
}

async fn run_login(app: &App, mut flow: LoginFlow, config: &ClientConfig, creds: Credentials) -> Result<(), CliError> {
    flow.set_email(creds.email);
    flow.set_password(creds.password);

    let state = flow.submit().await.clone();
    if let Some(message) = flow.form().email_error {
        return Err(CliError::InvalidField { field: "email", message });
    }
    if let Some(message) = flow.form().password_error {
        return Err(CliError::InvalidField { field: "password", message });
    }
    if let LoginState::Form { error: Some(e) } = state {
        return Err(CliError::LoginFailed { title: e.title, message: e.message, recovery: e.recovery });
    }

    flow.run_countdown(app.navigator(), config.countdown_tick, |remaining| {
        eprintln!("Redirecting to home in {remaining}...");
    })
    .await;
    if let LoginState::Redirecting { error: Some(_) } = flow.state() {
        flow.go_home(app.navigator())?;
    }
    println!("Signed in as {}", flow.form().email);
    Ok(())
}

async fn run_whoami(app: &App) -> Result<(), CliError> {
    match app.mount().await {
        SessionStatus::Authenticated => {
            if let Some(welcome) = app.nav_bar().welcome {
                println!("{welcome}");
            }
            Ok(())
        }
        SessionStatus::Error => Err(CliError::Failed(app.session().snapshot().error.unwrap_or_default())),
        _ => Err(CliError::NotSignedIn),
    }
}

async fn run_tasks(app: &App, tasks: TasksCommand) -> Result<(), CliError> {
    let mut list = app.todo_list();
    if !list.mount().await {
        return Err(CliError::NotSignedIn);
    }
    if let Some(error) = list.load_error() {
        return Err(CliError::Failed(error.to_owned()));
    }
    if app.session().snapshot().session_expired {
        return Err(CliError::NotSignedIn);
    }

    match tasks.command {
        TasksSubcommand::List => {
            print_tasks(&list);
            Ok(())
        }
        TasksSubcommand::Add { title } => {
            list.set_draft(title);
            finish(list.add().await, &list, None)
        }
        TasksSubcommand::Toggle { id } => {
            let outcome = list.toggle(&id).await;
            finish(outcome, &list, Some(id))
        }
        TasksSubcommand::Delete { id, yes } => {
            let outcome = if yes {
                list.delete(&id, &AlwaysConfirm(true)).await
            } else {
                list.delete(&id, &StdinConfirm).await
            };
            finish(outcome, &list, Some(id))
        }
    }
}

fn finish(outcome: Outcome, list: &TodoList, id: Option<TaskId>) -> Result<(), CliError> {
    match outcome {
        Outcome::Done => {
            print_tasks(list);
            Ok(())
        }
        Outcome::Skipped => match id {
            Some(id) if !list.tasks().iter().any(|t| t.id == id) => Err(CliError::UnknownTask(id)),
            _ => Ok(()),
        },
        Outcome::Failed(message) => Err(CliError::Failed(message)),
        Outcome::SessionExpired => Err(CliError::NotSignedIn),
    }
}

fn print_tasks(list: &TodoList) {
    if list.tasks().is_empty() {
        println!("You don't have any tasks yet.");
        return;
    }
    for task in list.tasks() {
        let mark = if task.is_completed { 'x' } else { ' ' };
        println!("[{mark}] {:>6}  {}", task.id, task.title);
    }
}

fn print_toasts(toasts: &ToastBus) {
    for toast in toasts.toasts() {
        eprintln!("{}: {}", toast.severity.as_str(), toast.message);
    }
}

struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        eprint!("{prompt} [y/N] ");
        let _ = io::stderr().flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

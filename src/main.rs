use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use innkeep::api::{AdminBackend, HttpBackend};
use innkeep::booking::{matches_search, Desk};
use innkeep::config::Config;
use innkeep::model::*;
use innkeep::session::Session;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Front-desk console for the lodging reservation API.
#[derive(Parser)]
#[command(name = "innkeep", version)]
struct Cli {
    /// API base URL (overrides INNKEEP_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List rooms, optionally by housekeeping status.
    Rooms {
        /// AVAILABLE, CLEANING or REPAIRS_NEEDED.
        #[arg(long)]
        status: Option<String>,
    },
    /// Rooms free for a stay.
    Available {
        #[arg(long)]
        check_in: String,
        #[arg(long)]
        check_out: String,
    },
    /// List reservations.
    Reservations {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        room: Option<RoomId>,
        /// CONFIRMED, CANCELLED, CHECKED_IN or CHECKED_OUT.
        #[arg(long)]
        status: Option<String>,
        /// Match on room or guest name.
        #[arg(long)]
        search: Option<String>,
    },
    /// Create a reservation from a JSON file.
    Reserve {
        #[arg(long)]
        file: PathBuf,
    },
    CheckIn {
        id: ReservationId,
    },
    CheckOut {
        id: ReservationId,
    },
    Cancel {
        id: ReservationId,
    },
    /// List staff accounts.
    Users,
}

fn instant_arg(name: &str, value: &str) -> CliResult<Ms> {
    parse_instant(value).ok_or_else(|| format!("--{name}: expected YYYY-MM-DD or RFC 3339, got {value:?}").into())
}

/// Parse an upper-case wire enum such as `CHECKED_IN`.
fn enum_arg<T: DeserializeOwned>(name: &str, value: &str) -> CliResult<T> {
    serde_json::from_value(serde_json::Value::String(value.to_uppercase()))
        .map_err(|_| format!("--{name}: unknown value {value:?}").into())
}

fn print<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_session(backend: &HttpBackend, config: &Config) -> CliResult<Session> {
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        return Ok(Session::login(backend, username, password).await?);
    }
    Session::restore(backend)
        .await?
        .ok_or_else(|| "not logged in: set INNKEEP_USERNAME and INNKEEP_PASSWORD".into())
}

#[tokio::main]
async fn main() -> CliResult<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    innkeep::observability::init(config.metrics_port)?;
    info!("api: {}", config.api_url);

    let backend = Arc::new(HttpBackend::from_config(&config)?);
    let session = open_session(&backend, &config).await?;
    let desk = Desk::new(backend.clone());

    match cli.command {
        Command::Rooms { status } => {
            let status = status.map(|s| enum_arg::<RoomStatus>("status", &s)).transpose()?;
            print(&backend.list_rooms(status).await?)?;
        }
        Command::Available { check_in, check_out } => {
            let check_in = instant_arg("check-in", &check_in)?;
            let check_out = instant_arg("check-out", &check_out)?;
            print(&desk.find_available_rooms(&session, Some(check_in), Some(check_out)).await?)?;
        }
        Command::Reservations {
            start,
            end,
            room,
            status,
            search,
        } => {
            let filter = ReservationFilter {
                start_date: start.map(|s| instant_arg("start", &s)).transpose()?,
                end_date: end.map(|s| instant_arg("end", &s)).transpose()?,
                room_id: room,
                status: status.map(|s| enum_arg("status", &s)).transpose()?,
            };
            let mut reservations = desk.list_reservations(&session, &filter).await?;
            if let Some(term) = search {
                reservations.retain(|r| matches_search(r, &term));
            }
            print(&reservations)?;
        }
        Command::Reserve { file } => {
            let text = std::fs::read_to_string(&file)?;
            let candidate: ReservationCandidate = serde_json::from_str(&text)?;
            print(&desk.create_reservation(&session, &candidate).await?)?;
        }
        Command::CheckIn { id } => transition(&desk, &session, id, Action::CheckIn).await?,
        Command::CheckOut { id } => transition(&desk, &session, id, Action::CheckOut).await?,
        Command::Cancel { id } => transition(&desk, &session, id, Action::Cancel).await?,
        Command::Users => print(&backend.list_users().await?)?,
    }
    Ok(())
}

async fn transition(desk: &Desk<HttpBackend>, session: &Session, id: ReservationId, action: Action) -> CliResult<()> {
    let reservation = desk.get_reservation(session, id).await?;
    print(&desk.apply_action(session, &reservation, action).await?)
}

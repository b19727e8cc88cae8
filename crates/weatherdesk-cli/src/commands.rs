//! Command parsing and execution for the `weatherdesk` binary.

use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;
use weatherdesk_core::models::{NewCity, NewWeather};
use weatherdesk_core::{AppContext, SessionEvent};

/// Environment variable that supplies the password without a prompt
const ENV_PASSWORD: &str = "WEATHERDESK_PASSWORD";

pub const USAGE: &str = "\
Usage: weatherdesk <command>

Account:
  login [username]                 Sign in (password from prompt or WEATHERDESK_PASSWORD)
  register <username> <email>      Create an account, then sign in with `login`
  logout                           Sign out and forget the stored session
  status                           Show who is signed in

Cities:
  cities [list]
  cities get <id>
  cities add <name> <country>
  cities update <id> <name> <country>
  cities delete <id>

Weather:
  weather [list]
  weather city <city-id>
  weather status <status>
  weather range <city-id> <start> <end>      Dates as YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS
  weather add <city-id> <temp> <humidity> <wind> <pressure> <status> [date]
  weather update <id> <city-id> <temp> <humidity> <wind> <pressure> <status> <date>
  weather delete <id>";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { username: Option<String> },
    Register { username: String, email: String },
    Logout,
    Status,
    Cities(CityCommand),
    Weather(WeatherCommand),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CityCommand {
    List,
    Get(i64),
    Add { name: String, country: String },
    Update { id: i64, name: String, country: String },
    Delete(i64),
}

/// Fields shared by `weather add` and `weather update`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherFields {
    pub city_id: i64,
    pub temperature: f64,
    pub humidity: i32,
    pub wind_speed: f64,
    pub pressure: f64,
    pub status: String,
    pub date_recorded: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeatherCommand {
    List,
    ByCity(i64),
    ByStatus(String),
    Range {
        city_id: i64,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    Add(WeatherFields),
    Update { id: i64, fields: WeatherFields },
    Delete(i64),
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse the command line. `Ok(None)` means the usage text was asked for.
pub fn parse_args(args: &[String]) -> Result<Option<Command>> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let command = match args.as_slice() {
        [] | ["help"] | ["--help"] | ["-h"] => return Ok(None),
        ["login"] => Ok(Command::Login { username: None }),
        ["login", username] => Ok(Command::Login {
            username: Some(username.to_string()),
        }),
        ["register", username, email] => Ok(Command::Register {
            username: username.to_string(),
            email: email.to_string(),
        }),
        ["logout"] => Ok(Command::Logout),
        ["status"] | ["whoami"] => Ok(Command::Status),
        ["cities", rest @ ..] => parse_cities(rest).map(Command::Cities),
        ["weather", rest @ ..] => parse_weather(rest).map(Command::Weather),
        _ => Err(anyhow::anyhow!("Unrecognized command: {}", args.join(" "))),
    }?;
    Ok(Some(command))
}

fn parse_cities(args: &[&str]) -> Result<CityCommand> {
    match args {
        [] | ["list"] => Ok(CityCommand::List),
        ["get", id] => Ok(CityCommand::Get(parse_id(id)?)),
        ["add", name, country] => Ok(CityCommand::Add {
            name: name.to_string(),
            country: country.to_string(),
        }),
        ["update", id, name, country] => Ok(CityCommand::Update {
            id: parse_id(id)?,
            name: name.to_string(),
            country: country.to_string(),
        }),
        ["delete", id] => Ok(CityCommand::Delete(parse_id(id)?)),
        _ => Err(anyhow::anyhow!("Unrecognized cities command")),
    }
}

fn parse_weather(args: &[&str]) -> Result<WeatherCommand> {
    match args {
        [] | ["list"] => Ok(WeatherCommand::List),
        ["city", id] => Ok(WeatherCommand::ByCity(parse_id(id)?)),
        ["status", status] => Ok(WeatherCommand::ByStatus(status.to_string())),
        ["range", city_id, start, end] => Ok(WeatherCommand::Range {
            city_id: parse_id(city_id)?,
            start: parse_date_time(start, false)?,
            end: parse_date_time(end, true)?,
        }),
        ["add", rest @ ..] if rest.len() == 6 || rest.len() == 7 => {
            Ok(WeatherCommand::Add(parse_weather_fields(rest)?))
        }
        ["update", id, rest @ ..] if rest.len() == 7 => Ok(WeatherCommand::Update {
            id: parse_id(id)?,
            fields: parse_weather_fields(rest)?,
        }),
        ["delete", id] => Ok(WeatherCommand::Delete(parse_id(id)?)),
        _ => Err(anyhow::anyhow!("Unrecognized weather command")),
    }
}

fn parse_weather_fields(args: &[&str]) -> Result<WeatherFields> {
    Ok(WeatherFields {
        city_id: parse_id(args[0])?,
        temperature: args[1].parse().context("Invalid temperature")?,
        humidity: args[2].parse().context("Invalid humidity")?,
        wind_speed: args[3].parse().context("Invalid wind speed")?,
        pressure: args[4].parse().context("Invalid pressure")?,
        status: args[5].to_string(),
        date_recorded: args
            .get(6)
            .map(|s| parse_date_time(s, false))
            .transpose()?,
    })
}

fn parse_id(s: &str) -> Result<i64> {
    s.parse().with_context(|| format!("Invalid id: {}", s))
}

/// Accept a full date-time or a bare date. A bare date means the start of
/// the day, or its last second when `end_of_day` is set.
fn parse_date_time(s: &str, end_of_day: bool) -> Result<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M") {
        return Ok(dt);
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date: {}", s))?;
    let time = if end_of_day { (23, 59, 59) } else { (0, 0, 0) };
    date.and_hms_opt(time.0, time.1, time.2)
        .ok_or_else(|| anyhow::anyhow!("Invalid date: {}", s))
}

// ============================================================================
// Execution
// ============================================================================

pub async fn run(ctx: &AppContext, command: Command) -> Result<()> {
    match command {
        Command::Login { username } => login(ctx, username).await,
        Command::Register { username, email } => {
            let password = read_password()?;
            let registered = ctx.session.register(&username, &email, &password).await?;
            println!(
                "Registered {}. Run `weatherdesk login {}` to sign in.",
                registered, registered
            );
            Ok(())
        }
        Command::Logout => {
            ctx.session.logout().await;
            println!("Signed out.");
            Ok(())
        }
        Command::Status => {
            let session = ctx.session.current_session();
            print_json(&json!({
                "authenticated": session.is_authenticated(),
                "username": session.username(),
                "api": ctx.api.base_url(),
            }))
        }
        Command::Cities(cmd) => run_cities(ctx, cmd).await,
        Command::Weather(cmd) => run_weather(ctx, cmd).await,
    }
}

async fn login(ctx: &AppContext, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| ctx.config.last_username.clone()) {
        Some(name) => name,
        None => prompt_username()?,
    };
    let password = read_password()?;

    // The login prompt is on screen; a forced logout should not ask again
    ctx.session.set_login_view_active(true);
    let result = ctx.session.login(&username, &password).await;
    ctx.session.set_login_view_active(false);
    let data = result?;

    let mut config = ctx.config.clone();
    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Signed in as {}.", data.username);
    Ok(())
}

async fn run_cities(ctx: &AppContext, cmd: CityCommand) -> Result<()> {
    let api = &ctx.api;
    match cmd {
        CityCommand::List => print_json(&api.list_cities().await?),
        CityCommand::Get(id) => print_json(&api.get_city(id).await?),
        CityCommand::Add { name, country } => {
            print_json(&api.create_city(&NewCity::new(name, country)).await?)
        }
        CityCommand::Update { id, name, country } => {
            print_json(&api.update_city(id, &NewCity::new(name, country)).await?)
        }
        CityCommand::Delete(id) => {
            api.delete_city(id).await?;
            println!("Deleted city {}.", id);
            Ok(())
        }
    }
}

async fn run_weather(ctx: &AppContext, cmd: WeatherCommand) -> Result<()> {
    let api = &ctx.api;
    match cmd {
        WeatherCommand::List => print_json(&api.list_weather().await?),
        WeatherCommand::ByCity(id) => print_json(&api.weather_by_city(id).await?),
        WeatherCommand::ByStatus(status) => print_json(&api.weather_by_status(&status).await?),
        WeatherCommand::Range { city_id, start, end } => {
            print_json(&api.weather_by_date_range(city_id, start, end).await?)
        }
        WeatherCommand::Add(fields) => {
            let weather = build_weather(ctx, fields).await?;
            print_json(&api.create_weather(&weather).await?)
        }
        WeatherCommand::Update { id, fields } => {
            let weather = build_weather(ctx, fields).await?;
            print_json(&api.update_weather(id, &weather).await?)
        }
        WeatherCommand::Delete(id) => {
            api.delete_weather(id).await?;
            println!("Deleted weather record {}.", id);
            Ok(())
        }
    }
}

/// Resolve the city and validate the observation before sending it.
async fn build_weather(ctx: &AppContext, fields: WeatherFields) -> Result<NewWeather> {
    let city = ctx.api.get_city(fields.city_id).await?;
    let date_recorded = match fields.date_recorded {
        Some(dt) => dt,
        None => {
            let now = Local::now().naive_local();
            now.with_nanosecond(0).unwrap_or(now)
        }
    };

    let weather = NewWeather {
        city,
        temperature: fields.temperature,
        humidity: fields.humidity,
        wind_speed: fields.wind_speed,
        pressure: fields.pressure,
        status: fields.status,
        date_recorded,
    };
    weather.validate()?;
    Ok(weather)
}

/// Print hints for session changes the command caused.
pub fn report_session_events(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::ForcedLogout { show_login: true } = event {
            eprintln!("Your session has expired. Run `weatherdesk login` to sign in again.");
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    let username = username.trim().to_string();
    if username.is_empty() {
        return Err(anyhow::anyhow!("Username required"));
    }
    Ok(username)
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        return Ok(password);
    }
    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        return Err(anyhow::anyhow!("Password required"));
    }
    Ok(password)
}

// ============================================================================
// Tests
// ============================================================================

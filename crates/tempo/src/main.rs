//! Tempo: interval and one-shot scheduling demo.
//!
//! Prompts for a repeat interval (seconds) and a time of day (HH:MM:SS,
//! 24-hour), registers one recurring and one one-shot print job against the
//! in-process scheduler, then waits for Enter before shutting down. Both
//! inputs can also be supplied up front with `--every` and `--at`.

use std::io::{self, Write};

use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use clap::Parser;
use miette::{IntoDiagnostic, Result, miette};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tempo_scheduler::{Job, Scheduler, Trigger};

/// Upper bound on the repeat interval: one year in seconds. Keeps the
/// interval safely inside chrono's duration range.
const MAX_INTERVAL_SECS: i64 = 31_556_952;

/// Parse a repeat interval as a positive number of seconds, capped at a year.
fn parse_interval(s: &str) -> Result<i64, String> {
    match s.trim().parse::<i64>() {
        Ok(seconds) if (1..=MAX_INTERVAL_SECS).contains(&seconds) => Ok(seconds),
        _ => Err(format!(
            "expected a positive whole number of seconds, at most {MAX_INTERVAL_SECS} (one year)"
        )),
    }
}

/// Parse a time of day in 24-hour HH:MM:SS format.
fn parse_time_of_day(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .map_err(|_| format!("invalid time '{s}', expected HH:MM:SS (for example 10:30:00)"))
}

#[derive(Parser)]
#[command(name = "tempo")]
#[command(about = "Interval and one-shot scheduling demo", long_about = None)]
struct Cli {
    /// Repeat interval in seconds (prompted for when omitted)
    #[arg(long, value_parser = parse_interval)]
    every: Option<i64>,

    /// Time of day for the one-shot job, HH:MM:SS 24-hour (prompted for when omitted)
    #[arg(long, value_parser = parse_time_of_day)]
    at: Option<NaiveTime>,
}

/// Prompt until the user enters a positive whole number of seconds.
fn prompt_interval() -> Result<i64> {
    loop {
        print!("Enter the repeat interval in seconds: ");
        io::stdout().flush().into_diagnostic()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line).into_diagnostic()? == 0 {
            return Err(miette!("stdin closed before an interval was entered"));
        }
        match parse_interval(line.trim()) {
            Ok(seconds) => return Ok(seconds),
            Err(message) => println!("{message}"),
        }
    }
}

/// Prompt until the user enters a valid HH:MM:SS time of day.
fn prompt_time_of_day() -> Result<NaiveTime> {
    loop {
        print!("Enter the one-shot time of day (HH:MM:SS): ");
        io::stdout().flush().into_diagnostic()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line).into_diagnostic()? == 0 {
            return Err(miette!("stdin closed before a time was entered"));
        }
        match parse_time_of_day(line.trim()) {
            Ok(time) => return Ok(time),
            Err(message) => println!("{message}"),
        }
    }
}

/// Combine a time of day with today's local date into an absolute instant.
///
/// An instant already in the past is returned as-is: the scheduler's misfire
/// policy fires it immediately.
fn fire_instant_today(at: NaiveTime) -> Result<DateTime<Utc>> {
    Local::now()
        .date_naive()
        .and_time(at)
        .and_local_timezone(Local)
        .earliest()
        .map(|instant| instant.with_timezone(&Utc))
        .ok_or_else(|| miette!("{at} does not exist today in the local timezone"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tempo=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let every = match cli.every {
        Some(seconds) => seconds,
        None => prompt_interval()?,
    };
    let at = match cli.at {
        Some(time) => time,
        None => prompt_time_of_day()?,
    };
    let fire_at = fire_instant_today(at)?;

    let scheduler = Scheduler::new();
    scheduler.start().await;

    let interval_job = Job::new("print-seconds", |_ctx| async {
        println!(
            "[{}] interval job fired",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        Ok(())
    });
    scheduler
        .schedule(
            interval_job,
            Trigger::every("interval-trigger", Duration::seconds(every)).into_diagnostic()?,
        )
        .await
        .into_diagnostic()?;

    let one_shot_job = Job::new("print-time", |_ctx| async {
        println!(
            "[{}] one-shot job fired",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        Ok(())
    });
    scheduler
        .schedule(one_shot_job, Trigger::once("time-trigger", fire_at))
        .await
        .into_diagnostic()?;

    info!(every, fire_at = %fire_at, "jobs registered");
    println!("Press Enter to exit...");
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let _ = io::stdin().read_line(&mut line);
    })
    .await
    .into_diagnostic()?;

    scheduler.shutdown(false).await;
    Ok(())
}

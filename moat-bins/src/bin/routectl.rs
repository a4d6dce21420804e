//! Operator tool for the route health surface
//!
//! Talks to a running status server:
//! - `routectl report` renders the route health table (or raw JSON)
//! - `routectl reset chain:venue:pair` forces one route back to healthy
//! - `routectl reset --all` resets every tracked route
//!
//! Resetting a route the server does not know is reported as "not found"
//! and exits 0; only transport and usage errors are tool failures.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use moat_bins::common::init_logging;
use moat_core::routes::RouteReport;

#[derive(Parser, Debug)]
#[command(version, about = "Operator tool for the moat route health surface")]
struct Cli {
    /// Status server endpoint
    #[arg(long, default_value = "http://127.0.0.1:9464")]
    endpoint: String,

    /// Log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the route health report
    Report {
        /// Emit the raw JSON report instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Reset a route (or every route) back to healthy
    Reset {
        /// Route as chain:venue:pair
        route: Option<String>,

        /// Reset every tracked route
        #[arg(long)]
        all: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .context("Failed to build HTTP client")?;

    match cli.command {
        Command::Report { json } => report(&client, &cli.endpoint, json),
        Command::Reset { route, all } => reset(&client, &cli.endpoint, route.as_deref(), all),
    }
}

fn report(client: &reqwest::blocking::Client, endpoint: &str, raw_json: bool) -> Result<()> {
    let url = format!("{}/routes", endpoint);
    let resp = client
        .get(&url)
        .send()
        .with_context(|| format!("Failed to reach status server at {}", endpoint))?;

    if !resp.status().is_success() {
        bail!("status server answered {}", resp.status());
    }

    let body = resp.text().context("Failed to read report body")?;
    if raw_json {
        println!("{}", body);
        return Ok(());
    }

    let report: RouteReport = serde_json::from_str(&body).context("Malformed route report")?;
    if report.routes.is_empty() {
        println!("no routes tracked");
        return Ok(());
    }

    let route_width = report
        .routes
        .iter()
        .map(|r| r.route.len())
        .max()
        .unwrap_or(5)
        .max("ROUTE".len());

    println!(
        "{:<width$}  {:<11}  {:>6}  {:>8}  {:>8}  {:>8}",
        "ROUTE",
        "STATE",
        "STREAK",
        "ATTEMPTS",
        "WINS",
        "WINRATE",
        width = route_width
    );
    for route in &report.routes {
        println!(
            "{:<width$}  {:<11}  {:>6}  {:>8}  {:>8}  {:>7.1}%",
            route.route,
            route.state.as_str(),
            route.consecutive_failures,
            route.total_attempts,
            route.total_successes,
            route.win_rate * 100.0,
            width = route_width
        );
    }

    Ok(())
}

fn reset(
    client: &reqwest::blocking::Client,
    endpoint: &str,
    route: Option<&str>,
    all: bool,
) -> Result<()> {
    let url = match (route, all) {
        (_, true) => format!("{}/routes/reset?all=true", endpoint),
        (Some(route), false) => format!("{}/routes/reset?route={}", endpoint, route),
        (None, false) => bail!("pass a route as chain:venue:pair, or --all"),
    };

    let resp = client
        .post(&url)
        .send()
        .with_context(|| format!("Failed to reach status server at {}", endpoint))?;

    let status = resp.status();
    let body = resp.text().unwrap_or_default();

    if status.is_success() {
        println!("{}", body);
        return Ok(());
    }

    // An unknown route is an outcome, not a tool failure
    if status.as_u16() == 404 {
        println!("not found: {}", body);
        return Ok(());
    }

    bail!("reset failed: {} {}", status, body)
}

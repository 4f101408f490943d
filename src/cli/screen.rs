use super::ui;
use crate::AppState;
use crate::core::ReturnPeriod;
use crate::screening::{JobOutcome, JobState, ScreeningQuery, StartOptions, strategies};
use anyhow::{Result, bail};
use comfy_table::Cell;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(clap::Args, Debug, Clone)]
pub struct ScreenArgs {
    /// Only screen funds whose type contains one of these values
    #[arg(short = 't', long = "type")]
    pub fund_types: Vec<String>,

    /// Upper bound on the number of funds fetched
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Funds fetched in parallel
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Preset to filter results with (4433, steady_growth, low_drawdown, momentum)
    #[arg(short, long)]
    pub strategy: Option<String>,

    /// Rank percentile ceiling per period, e.g. `1y=25` (repeatable)
    #[arg(long = "max-rank", value_parser = parse_rank_limit)]
    pub max_rank: Vec<(ReturnPeriod, f64)>,

    /// Number of funds to display
    #[arg(long, default_value_t = 20)]
    pub top: usize,

    /// Query stored results without refreshing them
    #[arg(long)]
    pub no_refresh: bool,
}

fn parse_rank_limit(value: &str) -> Result<(ReturnPeriod, f64), String> {
    let (period, limit) = value
        .split_once('=')
        .ok_or_else(|| format!("expected PERIOD=PERCENT, got '{value}'"))?;
    let period = period.trim().parse::<ReturnPeriod>().map_err(|e| e.to_string())?;
    let limit = limit
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid percentile '{limit}': {e}"))?;
    Ok((period, limit))
}

/// Runs a screening pass with a progress bar, then prints the best ranked
/// funds. Ctrl-C stops the pass and keeps what was already fetched.
pub async fn run(state: &AppState, args: ScreenArgs) -> Result<()> {
    let mut query = match &args.strategy {
        Some(name) => match strategies().into_iter().find(|s| &s.name == name) {
            Some(strategy) => strategy.query,
            None => bail!("Unknown strategy '{name}'"),
        },
        None => ScreeningQuery::default(),
    };
    if !args.fund_types.is_empty() {
        query.fund_types = args.fund_types.clone();
    }
    query.max_rank.extend(args.max_rank.iter().copied());
    query.limit = Some(args.top);

    if !args.no_refresh {
        refresh(state, &args).await?;
    }

    let page = state.screening.query(&query);
    ui::print_separator();
    if page.items.is_empty() {
        println!("No screened funds match.");
        return Ok(());
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Code"),
        ui::header_cell("Name"),
        ui::header_cell("Type"),
        ui::header_cell("1Y Return"),
        ui::header_cell("1Y Rank"),
        ui::header_cell("Sharpe 1Y"),
        ui::header_cell("Max DD 1Y"),
        ui::header_cell("4433"),
    ]);
    for record in &page.items {
        table.add_row(vec![
            Cell::new(&record.fund_code),
            Cell::new(&record.fund_name),
            Cell::new(ui::style_text(&record.fund_type, ui::StyleType::Subtle)),
            ui::change_cell(record.returns.one_year),
            ui::format_optional_cell(record.ranks.one_year, |v| format!("{v:.2}%")),
            ui::format_optional_cell(record.metrics.sharpe_ratio_1y, |v| format!("{v:.2}")),
            ui::format_optional_cell(record.metrics.max_drawdown_1y, |v| format!("{v:.2}%")),
            Cell::new(if record.pass_4433 { "✓" } else { "" }),
        ]);
    }
    println!("{table}");
    println!(
        "{}",
        ui::style_text(
            &format!("Showing {} of {} matching funds", page.items.len(), page.total),
            ui::StyleType::Subtle
        )
    );
    Ok(())
}

async fn refresh(state: &AppState, args: &ScreenArgs) -> Result<()> {
    let options = StartOptions {
        fund_codes: None,
        fund_types: (!args.fund_types.is_empty()).then(|| args.fund_types.clone()),
        limit: args.limit,
        concurrency: args.concurrency,
    };
    state.screening.start(options).await?;

    let pb = ui::new_progress_bar(0, true);
    pb.set_message("Screening");
    let mut interrupt: Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>> =
        Box::pin(tokio::signal::ctrl_c());
    let status = loop {
        tokio::select! {
            _ = &mut interrupt => {
                pb.set_message("Stopping");
                if let Err(e) = state.screening.stop().await {
                    warn!("Failed to stop screening: {}", e);
                }
                interrupt = Box::pin(std::future::pending());
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
        let status = state.screening.status().await;
        pb.set_length(status.total_count as u64);
        pb.set_position(status.progress_count as u64);
        if status.state == JobState::Idle {
            break status;
        }
    };
    pb.finish_and_clear();

    match status.last_outcome {
        Some(JobOutcome::Failed) => bail!(
            "Screening failed: {}",
            status.error.unwrap_or_else(|| "unknown error".to_string())
        ),
        Some(JobOutcome::Cancelled) => println!(
            "{}",
            ui::style_text("Screening stopped early", ui::StyleType::Error)
        ),
        _ => {}
    }
    if status.failed_count > 0 {
        println!(
            "{}",
            ui::style_text(
                &format!("{} of {} funds could not be fetched", status.failed_count, status.total_count),
                ui::StyleType::Subtle
            )
        );
    }
    Ok(())
}

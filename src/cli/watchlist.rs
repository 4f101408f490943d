use super::ui;
use crate::AppState;
use crate::watchlist::EstimateOutcome;
use anyhow::Result;
use comfy_table::Cell;
use std::collections::HashMap;

/// Prints every watchlist partition with the latest realtime estimates.
pub async fn run(state: &AppState) -> Result<()> {
    let sections = state.watchlist.list().await;
    if sections.iter().all(|s| s.items.is_empty()) {
        println!("The watchlist is empty.");
        return Ok(());
    }

    let spinner = ui::new_spinner("Fetching estimates");
    let estimates: HashMap<String, EstimateOutcome> = state
        .watchlist
        .refresh_estimates()
        .await
        .into_iter()
        .map(|o| (o.fund_code.clone(), o))
        .collect();
    spinner.finish_and_clear();

    for section in sections.iter().filter(|s| !s.items.is_empty()) {
        let title = section
            .group
            .as_ref()
            .map_or("Ungrouped", |g| g.name.as_str());
        println!("\n{}", ui::style_text(title, ui::StyleType::Title));

        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("#"),
            ui::header_cell("Code"),
            ui::header_cell("Name"),
            ui::header_cell("Type"),
            ui::header_cell("Estimate"),
            ui::header_cell("Est. Change"),
            ui::header_cell("Time"),
        ]);

        for item in &section.items {
            let estimate = estimates.get(&item.fund_code);
            let value = estimate.and_then(|o| o.estimate.as_ref());
            let time_cell = match estimate {
                Some(EstimateOutcome {
                    error: Some(_), ..
                }) => Cell::new(ui::style_text("unavailable", ui::StyleType::Error)),
                _ => Cell::new(
                    value
                        .and_then(|e| e.estimate_time.clone())
                        .unwrap_or_default(),
                ),
            };
            table.add_row(vec![
                Cell::new(item.position + 1),
                Cell::new(&item.fund_code),
                Cell::new(&item.fund_name),
                Cell::new(ui::style_text(&item.fund_type, ui::StyleType::Subtle)),
                ui::format_optional_cell(value.and_then(|e| e.estimate_value), |v| {
                    format!("{v:.4}")
                }),
                ui::change_cell(value.and_then(|e| e.estimate_change_pct)),
                time_cell,
            ]);
        }
        println!("{table}");
    }
    Ok(())
}

use super::ui;
use crate::AppState;
use anyhow::Result;
use comfy_table::Cell;

pub async fn run(state: &AppState, keyword: &str, limit: usize) -> Result<()> {
    if !state.search.status().await.has_cache {
        let spinner = ui::new_spinner("Downloading fund list");
        let populated = state.search.ensure_populated().await;
        spinner.finish_and_clear();
        populated?;
    }

    let hits = state.search.search(keyword, limit).await?;
    if hits.is_empty() {
        println!("No funds match '{keyword}'.");
        return Ok(());
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Code"),
        ui::header_cell("Name"),
        ui::header_cell("Type"),
        ui::header_cell("Score"),
    ]);
    for hit in &hits {
        table.add_row(vec![
            Cell::new(&hit.fund.code),
            Cell::new(&hit.fund.name),
            Cell::new(&hit.fund.fund_type),
            Cell::new(hit.score),
        ]);
    }
    println!("{table}");
    Ok(())
}

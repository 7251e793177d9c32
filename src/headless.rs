use anyhow::Result;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};
use std::time::Duration;

use crate::config::AppConfig;
use crate::market::BitstampClient;
use crate::refresh::{self, Selection, Snapshot};

fn format_value(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v))
}

fn styled_table(header: Vec<Cell>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// Renders the latest bar, the selected indicator and the heatmap as text.
pub fn render(snapshot: &Snapshot) -> String {
    let sel = &snapshot.selection;
    let title = format!(
        "(Data taken at {} UTC) {} | {} | span {} | range {}..{}",
        snapshot.taken_at.format("%d-%m-%Y %H:%M:%S"),
        sel.pair.label(),
        sel.interval.label(),
        sel.span.bars(),
        sel.range.start,
        sel.range.end,
    );

    let candles = &snapshot.candles;
    let last = candles.close.len().checked_sub(1);
    let mut latest = styled_table(vec![
        Cell::new("Series").add_attribute(Attribute::Bold),
        Cell::new("Latest")
            .add_attribute(Attribute::Bold)
            .set_alignment(CellAlignment::Right),
    ]);

    latest.add_row(vec![
        Cell::new("Close").fg(Color::Cyan),
        Cell::new(format_value(last.map(|i| candles.close[i]))).set_alignment(CellAlignment::Right),
    ]);
    for trace in candles.overlays.iter().chain(snapshot.indicator.traces.iter()) {
        latest.add_row(vec![
            Cell::new(&trace.name).fg(Color::Cyan),
            Cell::new(format_value(trace.values.last().copied().flatten()))
                .set_alignment(CellAlignment::Right),
        ]);
    }
    for fib in &candles.fibonacci {
        latest.add_row(vec![
            Cell::new(&fib.name).fg(Color::Yellow),
            Cell::new(format_value(Some(fib.price))).set_alignment(CellAlignment::Right),
        ]);
    }

    let heatmap = &snapshot.heatmap;
    let mut movers = styled_table(vec![
        Cell::new("Asset").add_attribute(Attribute::Bold),
        Cell::new("Price Change (%)")
            .add_attribute(Attribute::Bold)
            .set_alignment(CellAlignment::Right),
    ]);
    for (label, change) in heatmap.labels.iter().zip(heatmap.changes.iter()) {
        let cell = match change {
            Some(c) if *c >= 0.0 => Cell::new(format!("{:+.2}%", c * 100.0)).fg(Color::Green),
            Some(c) => Cell::new(format!("{:+.2}%", c * 100.0)).fg(Color::Red),
            None => Cell::new("n/a").fg(Color::DarkGrey),
        };
        movers.add_row(vec![
            Cell::new(label).fg(Color::Cyan),
            cell.set_alignment(CellAlignment::Right),
        ]);
    }

    format!(
        "\n{}\n{}\n{}\n{}\n{}",
        title, snapshot.indicator.title, latest, heatmap.title, movers
    )
}

/// Headless mode: refresh on the configured period and print each snapshot.
/// Failed refreshes are logged and the loop carries on.
pub async fn run(config: AppConfig, source: BitstampClient) -> Result<()> {
    let selection = Selection::from(config.defaults);
    let mut ticker = tokio::time::interval(Duration::from_secs(config.refresh.interval_secs));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }

        match refresh::refresh(&source, &config, selection).await {
            Ok(snapshot) => println!("{}", render(&snapshot)),
            Err(e) => tracing::error!(error = %e, "refresh failed"),
        }
    }
}

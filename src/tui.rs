use anyhow::Result;
use chrono::{DateTime, Utc};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        Axis, Block, Borders, Cell, Chart, Clear, Dataset, GraphType, Paragraph, Row, Table,
        canvas::{self, Canvas},
    },
};
use std::io;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::analysis::DisplayRange;
use crate::charts::{CandlestickChart, HeatmapChart, IndicatorChart};
use crate::config::AppConfig;
use crate::error::DashboardError;
use crate::market::{self, BitstampClient, Interval, Pair};
use crate::refresh::{self, IndicatorKind, Selection, Snapshot};

type RefreshResult = (u64, Result<Snapshot, DashboardError>);

// --- App State ---

struct App {
    config: AppConfig,
    source: BitstampClient,
    selection: Selection,
    snapshot: Option<Snapshot>,
    last_error: Option<String>,
    show_overlays: bool,
    show_fibonacci: bool,
    /// Generation handed to the most recently spawned refresh.
    issued: u64,
    /// Generation of the result currently on screen.
    applied: u64,
}

impl App {
    fn new(config: AppConfig, source: BitstampClient) -> Self {
        let selection = Selection::from(config.defaults);
        Self {
            config,
            source,
            selection,
            snapshot: None,
            last_error: None,
            show_overlays: false,
            show_fibonacci: false,
            issued: 0,
            applied: 0,
        }
    }

    fn is_refreshing(&self) -> bool {
        self.applied < self.issued
    }

    /// Publishes a finished refresh unless a newer one is already on screen.
    fn apply(&mut self, generation: u64, result: Result<Snapshot, DashboardError>) {
        if generation <= self.applied {
            tracing::debug!(generation, applied = self.applied, "discarding stale refresh");
            return;
        }
        self.applied = generation;
        match result {
            Ok(snapshot) => {
                self.snapshot = Some(snapshot);
                self.last_error = None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "refresh failed, keeping previous charts");
                self.last_error = Some(e.to_string());
            }
        }
    }

    fn spawn_refresh(&mut self, tx: &mpsc::Sender<RefreshResult>) {
        self.issued += 1;
        let generation = self.issued;
        let source = self.source.clone();
        let config = self.config.clone();
        let selection = self.selection;
        let tx = tx.clone();

        tokio::spawn(async move {
            let result = refresh::refresh(&source, &config, selection).await;
            let _ = tx.send((generation, result)).await;
        });
    }
}

fn next_in<T: Copy + PartialEq>(all: &[T], current: T) -> T {
    let idx = all.iter().position(|v| *v == current).unwrap_or(0);
    all[(idx + 1) % all.len()]
}

// --- TUI ---

pub async fn run_tui(config: AppConfig, source: BitstampClient) -> Result<()> {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, App::new(config, source)).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, mut app: App) -> Result<()> {
    let (data_tx, mut data_rx) = mpsc::channel::<RefreshResult>(8);
    let tick_rate = Duration::from_secs(app.config.refresh.interval_secs);

    app.spawn_refresh(&data_tx);
    let mut last_tick = Instant::now();

    loop {
        while let Ok((generation, result)) = data_rx.try_recv() {
            app.apply(generation, result);
        }

        terminal.draw(|f| ui(f, &app))?;

        if last_tick.elapsed() >= tick_rate {
            app.spawn_refresh(&data_tx);
            last_tick = Instant::now();
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match handle_key_event(key, &mut app) {
                    KeyOutcome::Quit => return Ok(()),
                    KeyOutcome::Refresh => {
                        app.spawn_refresh(&data_tx);
                        last_tick = Instant::now();
                    }
                    KeyOutcome::Redraw => {}
                }
            }
            // Resize events fall through; the next draw picks up the new size.
        }
    }
}

enum KeyOutcome {
    Quit,
    Refresh,
    Redraw,
}

fn handle_key_event(key: KeyEvent, app: &mut App) -> KeyOutcome {
    let sel = &mut app.selection;
    let span = sel.span.bars();

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return KeyOutcome::Quit,
        KeyCode::F(5) | KeyCode::Char('r') => {}
        KeyCode::Char('p') => sel.pair = next_in(&Pair::ALL, sel.pair),
        KeyCode::Char('t') => sel.interval = next_in(&Interval::ALL, sel.interval),
        KeyCode::Char('s') => {
            sel.span = next_in(&market::Span::ALL, sel.span);
            sel.range = DisplayRange::full(sel.span.bars());
        }
        KeyCode::Up => {
            let idx = IndicatorKind::ALL.iter().position(|k| *k == sel.indicator).unwrap_or(0);
            sel.indicator = IndicatorKind::ALL[idx.checked_sub(1).unwrap_or(IndicatorKind::ALL.len() - 1)];
        }
        KeyCode::Down => sel.indicator = next_in(&IndicatorKind::ALL, sel.indicator),
        KeyCode::Left if sel.range.start > 0 => sel.range.start -= 1,
        KeyCode::Right if sel.range.start + 1 < sel.range.end => sel.range.start += 1,
        KeyCode::Char('[') if sel.range.end > sel.range.start + 1 => sel.range.end -= 1,
        KeyCode::Char(']') if sel.range.end < span => sel.range.end += 1,
        KeyCode::Char('m') => {
            app.show_overlays = !app.show_overlays;
            return KeyOutcome::Redraw;
        }
        KeyCode::Char('f') => {
            app.show_fibonacci = !app.show_fibonacci;
            return KeyOutcome::Redraw;
        }
        KeyCode::Char(c) if c.is_ascii_digit() => {
            let digit = c.to_digit(10).unwrap_or(0) as usize;
            if digit == 0 || digit > IndicatorKind::ALL.len() {
                return KeyOutcome::Redraw;
            }
            sel.indicator = IndicatorKind::ALL[digit - 1];
        }
        _ => return KeyOutcome::Redraw,
    }
    KeyOutcome::Refresh
}

fn ui(f: &mut Frame, app: &App) {
    let main_layout = Layout::horizontal([Constraint::Percentage(20), Constraint::Percentage(80)])
        .split(f.size());

    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Percentage(50),
        Constraint::Min(8),
        Constraint::Length(5),
    ])
    .split(main_layout[1]);

    render_sidebar(f, app, main_layout[0]);

    let time_str = app
        .snapshot
        .as_ref()
        .map(|s| format_timestamp(s.taken_at))
        .unwrap_or_else(|| "Never".to_string());
    let mut status = vec![Span::raw(format!("Last Updated: {} UTC", time_str))];
    if let Some(err) = &app.last_error {
        status.push(Span::styled(format!("  |  {}", err), Style::default().fg(Color::Red)));
    }
    f.render_widget(
        Paragraph::new(Line::from(status))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Crypto Price Tracker")),
        chunks[0],
    );

    match &app.snapshot {
        Some(snapshot) => {
            render_candles(f, app, &snapshot.candles, snapshot.selection.pair, chunks[1]);
            render_indicator(f, &snapshot.indicator, chunks[2]);
            render_heatmap(f, &snapshot.heatmap, chunks[3]);
        }
        None => {
            f.render_widget(
                Paragraph::new("Waiting for market data...")
                    .alignment(Alignment::Center)
                    .block(Block::default().borders(Borders::ALL)),
                chunks[1],
            );
        }
    }

    if app.is_refreshing() && app.snapshot.is_none() {
        let area = centered_rect(60, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new("Fetching market data...\nPlease wait.")
                .block(Block::default().title("Refreshing").borders(Borders::ALL))
                .alignment(Alignment::Center),
            area,
        );
    }
}

fn render_sidebar(f: &mut Frame, app: &App, area: Rect) {
    let sel = &app.selection;
    let highlight = Style::default().fg(Color::Yellow);

    let mut lines = vec![
        Line::from(vec![Span::raw("Coin Pair: "), Span::styled(sel.pair.label(), highlight)]),
        Line::from(vec![Span::raw("Timeframe: "), Span::styled(sel.interval.label(), highlight)]),
        Line::from(vec![
            Span::raw("Span: "),
            Span::styled(sel.span.bars().to_string(), highlight),
        ]),
        Line::from(vec![
            Span::raw("Range: "),
            Span::styled(format!("{}..{}", sel.range.start, sel.range.end), highlight),
        ]),
        Line::from(""),
    ];

    lines.extend(IndicatorKind::ALL.iter().enumerate().map(|(i, kind)| {
        let line = Line::from(format!("{} {}", i + 1, kind.label()));
        if *kind == sel.indicator {
            line.style(Style::default().fg(Color::Yellow).bg(Color::DarkGray))
        } else {
            line
        }
    }));

    lines.extend(
        [
            "",
            "p pair  t timeframe  s span",
            "Up/Down indicator",
            "Left/Right range start",
            "[ ] range end",
            "m MA/EMA  f Fibonacci",
            "F5 refresh  q quit",
        ]
        .into_iter()
        .map(|s| Line::from(s).style(Style::default().fg(Color::DarkGray))),
    );

    if app.is_refreshing() {
        lines.push(Line::from("refreshing...").style(Style::default().fg(Color::Cyan)));
    }

    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn bounds(values: impl Iterator<Item = f64>) -> Option<[f64; 2]> {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return None;
    }
    let pad = ((hi - lo) * 0.05).max(hi.abs() * 1e-6).max(f64::EPSILON);
    Some([lo - pad, hi + pad])
}

fn render_candles(f: &mut Frame, app: &App, chart: &CandlestickChart, pair: Pair, area: Rect) {
    let n = chart.close.len();
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!("Candlestick Chart - {}", pair.label()));

    let Some(y_bounds) = bounds(chart.low.iter().chain(chart.high.iter()).copied()) else {
        f.render_widget(block, area);
        return;
    };

    let canvas = Canvas::default()
        .block(block)
        .marker(Marker::Braille)
        .x_bounds([0.0, n as f64])
        .y_bounds(y_bounds)
        .paint(|ctx| {
            for i in 0..n {
                let x = i as f64 + 0.5;
                let (open, close) = (chart.open[i], chart.close[i]);
                let color = if close >= open { Color::Green } else { Color::Red };
                ctx.draw(&canvas::Line {
                    x1: x,
                    y1: chart.low[i],
                    x2: x,
                    y2: chart.high[i],
                    color,
                });
                ctx.draw(&canvas::Rectangle {
                    x: x - 0.3,
                    y: open.min(close),
                    width: 0.6,
                    height: (close - open).abs(),
                    color,
                });
            }

            if app.show_overlays {
                for (trace, color) in chart.overlays.iter().zip([Color::Cyan, Color::Magenta]) {
                    let points: Vec<(f64, f64)> = trace
                        .values
                        .iter()
                        .enumerate()
                        .filter_map(|(i, v)| v.map(|v| (i as f64 + 0.5, v)))
                        .collect();
                    for w in points.windows(2) {
                        ctx.draw(&canvas::Line {
                            x1: w[0].0,
                            y1: w[0].1,
                            x2: w[1].0,
                            y2: w[1].1,
                            color,
                        });
                    }
                }
            }

            if app.show_fibonacci {
                for fib in &chart.fibonacci {
                    ctx.draw(&canvas::Line {
                        x1: 0.0,
                        y1: fib.price,
                        x2: n as f64,
                        y2: fib.price,
                        color: Color::Yellow,
                    });
                }
            }
        });

    f.render_widget(canvas, area);
}

fn render_indicator(f: &mut Frame, chart: &IndicatorChart, area: Rect) {
    let colors = [Color::Cyan, Color::Magenta, Color::Yellow];
    let series: Vec<Vec<(f64, f64)>> = chart
        .traces
        .iter()
        .map(|t| {
            t.values
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.map(|v| (i as f64, v)))
                .collect()
        })
        .collect();

    let block = Block::default().borders(Borders::ALL).title(chart.title);
    let Some(y_bounds) = bounds(series.iter().flatten().map(|&(_, y)| y)) else {
        f.render_widget(
            Paragraph::new("No indicator values for this window").block(block),
            area,
        );
        return;
    };

    let datasets: Vec<Dataset> = chart
        .traces
        .iter()
        .zip(series.iter())
        .zip(colors.iter().cycle())
        .map(|((trace, points), color)| {
            Dataset::default()
                .name(trace.name.clone())
                .marker(Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(*color))
                .data(points)
        })
        .collect();

    let x_max = chart.timestamps.len().saturating_sub(1).max(1) as f64;
    let x_labels: Vec<Span> = [chart.timestamps.first(), chart.timestamps.last()]
        .into_iter()
        .flatten()
        .map(|t| Span::raw(t.format("%H:%M").to_string()))
        .collect();
    let y_labels = vec![
        Span::raw(format!("{:.2}", y_bounds[0])),
        Span::raw(format!("{:.2}", y_bounds[1])),
    ];

    f.render_widget(
        Chart::new(datasets)
            .block(block)
            .x_axis(Axis::default().title("Time").bounds([0.0, x_max]).labels(x_labels))
            .y_axis(Axis::default().title(chart.y_axis).bounds(y_bounds).labels(y_labels)),
        area,
    );
}

fn render_heatmap(f: &mut Frame, heatmap: &HeatmapChart, area: Rect) {
    let top = heatmap
        .changes
        .iter()
        .flatten()
        .fold(0.0_f64, |acc, c| acc.max(c.abs()));

    let header = Row::new(heatmap.labels.iter().map(|l| Cell::from(*l)))
        .style(Style::default().bg(Color::DarkGray));

    let cells = heatmap.changes.iter().map(|change| match change {
        Some(c) => {
            let level = (255.0 * get_visibility_ratio(c.abs(), top)) as u8;
            let color = if *c >= 0.0 {
                Color::Rgb(0, level, 0)
            } else {
                Color::Rgb(level, 0, 0)
            };
            Cell::from(format!("{:+.2}%", c * 100.0)).style(Style::default().fg(color))
        }
        None => Cell::from("n/a").style(Style::default().fg(Color::DarkGray)),
    });

    let n = heatmap.labels.len().max(1) as u32;
    let widths = vec![Constraint::Ratio(1, n); n as usize];

    f.render_widget(
        Table::new([Row::new(cells)], widths)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(heatmap.title)),
        area,
    );
}

fn get_visibility_ratio(current: f64, top: f64) -> f64 {
    if top <= 0.0 {
        1.0
    } else {
        (0.4 + 0.6 * (current / top)).max(0.4)
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%d-%m-%Y %H:%M:%S").to_string()
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}

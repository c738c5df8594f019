/// barcache - local minute-bar cache with on-demand timeframe views
///
/// Usage:
///   barcache                                  sync, then show 5min/30min/D views of the last 3 days
///   barcache sync                             fetch missing days up to yesterday
///   barcache query <timeframe> <start> <end>  compose bars for an inclusive date range
///   barcache status                           list cached days
use anyhow::{bail, Context};
use chrono::{Duration, Local};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use barcache::{
    config::load_config_or_default,
    data::{MarketDataCache, SyncReport, YahooProvider},
    events::{EventSink, FanoutSink, JsonlSink, TracingSink},
    Bar, Config,
};

const PREVIEW_ROWS: usize = 5;
const DEMO_DAYS: i64 = 3;
const DEMO_TIMEFRAMES: [&str; 3] = ["5min", "30min", "D"];

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("barcache={0},{0}", config.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_sink(config: &Config) -> anyhow::Result<Arc<dyn EventSink>> {
    let Some(path) = config.event_log_path.as_deref() else {
        return Ok(Arc::new(TracingSink));
    };

    let jsonl = JsonlSink::open(path).with_context(|| format!("opening event log {}", path))?;
    info!("Recording cache events to {}", jsonl.path().display());
    Ok(Arc::new(
        FanoutSink::new()
            .with(Arc::new(TracingSink))
            .with(Arc::new(jsonl)),
    ))
}

fn print_report(report: &SyncReport) {
    if report.is_noop() {
        println!("✅ Cache already up to date");
        return;
    }

    println!("📥 Sync summary:");
    println!("   Stored:  {} days ({} bars)", report.days_stored.len(), report.bars_written);
    println!("   Retried: {} days", report.days_retried.len());
    println!("   Empty:   {} days", report.days_empty.len());
    println!("   Skipped: {} days", report.days_skipped.len());
    println!("   Failed:  {} days", report.days_failed.len());
    for err in &report.errors {
        println!("   ⚠️  {}", err);
    }
}

fn print_bar(bar: &Bar) {
    println!(
        "   {}  {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>12}",
        bar.timestamp.format("%Y-%m-%d %H:%M"),
        bar.open,
        bar.high,
        bar.low,
        bar.close,
        bar.volume
    );
}

fn print_table(title: &str, bars: &[Bar]) {
    println!("\n📊 {} ({} bars)", title, bars.len());
    if bars.is_empty() {
        println!("   (no data)");
        return;
    }

    println!(
        "   {:<16}  {:>10} {:>10} {:>10} {:>10} {:>12}",
        "Datetime", "Open", "High", "Low", "Close", "Volume"
    );
    if bars.len() <= PREVIEW_ROWS * 2 {
        bars.iter().for_each(print_bar);
        return;
    }

    bars[..PREVIEW_ROWS].iter().for_each(print_bar);
    println!("   ...");
    bars[bars.len() - PREVIEW_ROWS..].iter().for_each(print_bar);
}

async fn run_sync(cache: &MarketDataCache) -> anyhow::Result<()> {
    let report = cache.sync().await?;
    print_report(&report);
    Ok(())
}

fn run_query(cache: &MarketDataCache, args: &[String]) -> anyhow::Result<()> {
    let [timeframe, start, end] = args else {
        bail!("usage: barcache query <timeframe> <start YYYY-MM-DD> <end YYYY-MM-DD>");
    };

    let bars = cache.query(timeframe, start, end)?;
    print_table(
        &format!("{} {} from {} to {}", cache.symbol(), timeframe, start, end),
        &bars,
    );
    Ok(())
}

fn run_status(cache: &MarketDataCache) -> anyhow::Result<()> {
    let dates = cache.cached_dates()?;
    println!("🗂️  {}: {} cached days", cache.symbol(), dates.len());
    if let (Some(first), Some(last)) = (dates.first(), dates.last()) {
        println!("   First: {}", first);
        println!("   Last:  {}", last);
    }

    let failed = cache.failed_dates()?;
    if !failed.is_empty() {
        println!("   ⚠️  Waiting for retry: {:?}", failed);
    }
    Ok(())
}

async fn run_demo(cache: &MarketDataCache) -> anyhow::Result<()> {
    run_sync(cache).await?;

    let end = Local::now().date_naive();
    let start = end - Duration::days(DEMO_DAYS);
    for timeframe in DEMO_TIMEFRAMES {
        let bars = cache.query_dates(timeframe, start, end)?;
        print_table(
            &format!("{} {} from {} to {}", cache.symbol(), timeframe, start, end),
            &bars,
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = load_config_or_default(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    init_logging(&config);
    info!("barcache starting for {} (data dir {})", config.symbol, config.data_dir);

    let sink = build_sink(&config)?;
    let provider = Arc::new(YahooProvider::from_config(&config)?);
    let cache = MarketDataCache::open(&config, provider, sink)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        None => run_demo(&cache).await,
        Some("sync") => run_sync(&cache).await,
        Some("query") => run_query(&cache, &args[1..]),
        Some("status") => run_status(&cache),
        Some(other) => Err(anyhow::anyhow!(
            "unknown command '{}' (expected sync, query or status)",
            other
        )),
    };

    if let Err(e) = &result {
        error!("barcache failed: {:#}", e);
    }
    result
}

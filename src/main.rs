use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::env;
use std::path::Path;

use cashbook::{
    init_tracing, load_csv, Config, PeriodKind, SqliteStore, StatsAggregator, StatsResponse,
    TransactionFilter,
};

const USAGE: &str = "usage:
  cashbook import <csv> <user-id>
  cashbook stats <user-id> [daily|weekly|monthly|yearly]
  cashbook list <user-id>";

fn main() -> Result<()> {
    init_tracing();
    let args: Vec<String> = env::args().skip(1).collect();
    let config = Config::from_env().context("Invalid configuration")?;

    match args.first().map(String::as_str) {
        Some("import") => match (args.get(1), args.get(2)) {
            (Some(csv), Some(user)) => run_import(&config, Path::new(csv), user),
            _ => bail!("{USAGE}"),
        },
        Some("stats") => match args.get(1) {
            Some(user) => run_stats(&config, user, args.get(2).map(String::as_str)),
            None => bail!("{USAGE}"),
        },
        Some("list") => match args.get(1) {
            Some(user) => run_list(&config, user),
            None => bail!("{USAGE}"),
        },
        _ => {
            println!("cashbook v{}", cashbook::VERSION);
            println!("{USAGE}");
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {:?}", config.database_path))
}

fn run_import(config: &Config, csv_path: &Path, user_id: &str) -> Result<()> {
    println!("📂 Loading {}...", csv_path.display());
    let rows = load_csv(csv_path).context("Failed to read CSV file")?;
    println!("✓ Parsed {} rows", rows.len());

    let store = open_store(config)?;
    let summary = store
        .import(user_id, &rows)
        .context("Failed to import transactions")?;

    println!("✓ Inserted: {} transactions", summary.inserted);
    println!("✓ Skipped duplicates: {}", summary.duplicates);
    println!("✓ {} now has {} transactions", user_id, store.count(user_id)?);
    Ok(())
}

fn run_stats(config: &Config, user_id: &str, period: Option<&str>) -> Result<()> {
    let aggregator = StatsAggregator::new(open_store(config)?).with_week_start(config.week_start);
    let kind = PeriodKind::from_param(period);
    let now = Utc::now().with_timezone(&config.utc_offset);

    // Same path as GET /api/stats; the store answers synchronously, so a
    // current-thread runtime is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .context("Failed to start runtime")?;
    let result = runtime.block_on(aggregator.compute(user_id, kind, now))?;
    let window = result.window;
    let stats: StatsResponse = result.into();

    let local = |instant: chrono::DateTime<Utc>| instant.with_timezone(&config.utc_offset);
    println!("📊 {} stats for {}", stats.period, user_id);
    println!("   {} → {}", local(window.start), local(window.end));
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("   Income:   {:>12.2}", stats.summary.income);
    println!("   Expense:  {:>12.2}", stats.summary.expense);
    println!("   Balance:  {:>12.2}", stats.summary.balance);
    println!("   Transactions: {}", stats.transaction_count);

    if !stats.category_breakdown.is_empty() {
        println!("\n   {:<20} {:>12} {:>12}", "Category", "Income", "Expense");
        for (category, totals) in &stats.category_breakdown {
            println!(
                "   {:<20} {:>12.2} {:>12.2}",
                category, totals.income, totals.expense
            );
        }
    }
    Ok(())
}

fn run_list(config: &Config, user_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let transactions = store.list(user_id, &TransactionFilter::default())?;

    for tx in &transactions {
        println!(
            "{}  {:<7}  {:>10.2}  {:<16}  {}",
            tx.occurred_at
                .with_timezone(&config.utc_offset)
                .format("%Y-%m-%d %H:%M"),
            tx.kind,
            tx.amount,
            tx.category,
            tx.description
        );
    }
    println!("✓ {} transactions", transactions.len());
    Ok(())
}

mod config;
mod crawler;
mod db;
mod document;
mod parser;
mod stats;
mod traversal;

use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "cosmetic_scraper", about = "cosmetic.de catalog crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl all categories and store every product page
    Run {
        /// Max product pages to visit (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Fetch and extract a single product page without storing it
    Inspect {
        url: String,
        /// Category slug to put on the record
        #[arg(short, long, default_value = "")]
        category: String,
    },
    /// Show stored products and the last run's strategy table
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Run { limit } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;

            println!("Crawling {}...", settings.start_url);
            let report = crawler::run(&conn, &settings, limit).await;

            let c = report.crawl?;
            println!(
                "Visited {} pages ({} failed, avg {} ms).",
                c.pages,
                c.failed_pages,
                c.latency_ms / (c.pages + c.failed_pages).max(1) as u128
            );
            println!(
                "Saved {} new products ({} already stored, {} failed) of {} parsed.",
                c.inserted, c.duplicates, c.sink_failures, c.products
            );
            println!("\nRun {}\n\n{}", report.run_id, report.snapshot.render_markdown());
            Ok(())
        }
        Commands::Inspect { url, category } => {
            let product = crawler::inspect_product(&settings, &url, &category).await?;
            println!("{}", serde_json::to_string_pretty(&product.record)?);
            match product.strategy {
                Some(s) => println!("\nIngredients via #{} {}", s.id(), s.label()),
                None => println!("\nNo ingredients found"),
            }
            for d in &product.diagnostics {
                println!("  {:?}", d);
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Products:            {}", s.products);
            println!("Without ingredients: {}", s.without_ingredients);
            println!("Categories:          {}", s.categories);
            if let Some((run_id, rows)) = s.last_run {
                println!("\nLast run {}:", run_id);
                for (strategy, label, count) in rows {
                    println!("  {:>4} | {:<26} | {:>6}", strategy, truncate(&label, 26), count);
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

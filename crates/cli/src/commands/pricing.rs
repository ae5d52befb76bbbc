//! `citeflow pricing`: Show the pricing table used for session budgets.

use super::ask::pricing_from_config;
use citeflow_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let table = pricing_from_config(&config);
    let models = table.models();

    println!("💰 Model Pricing (per 1M tokens)");
    println!("─────────────────────────────────────────────────────");
    println!("{:<40} {:>10} {:>10}", "Model", "Input", "Output");
    println!("{:<40} {:>10} {:>10}", "─────", "─────", "──────");

    for name in &models {
        if let Some(p) = table.get(name) {
            let marker = if config.pricing.contains_key(name) { " *" } else { "" };
            println!(
                "{:<40} ${:>8.3} ${:>8.3}{}",
                name, p.input_per_m, p.output_per_m, marker
            );
        }
    }

    println!();
    println!("  {} models with pricing data", models.len());
    if !config.pricing.is_empty() {
        println!("  * overridden in config");
    }
    println!(
        "  Session budget: ${:.2} per question",
        config.budget.session_usd
    );

    Ok(())
}

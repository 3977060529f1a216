//! `ecotrace doctor`: Diagnose configuration and scorer health.

use ecotrace_config::AppConfig;
use ecotrace_core::ImpactScorer;
use ecotrace_scorer::HttpScorer;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 ecotrace doctor");
    println!("==================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file found: {}", config_path.display());
    } else {
        println!("  ⚠️  No config file, using defaults (run `ecotrace config init`)");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  ⚠️  1 issue found. Fix the config and re-run.");
            return Ok(());
        }
    };

    if config.has_api_key() {
        println!("  ✅ API key configured");
        match HttpScorer::from_config(&config) {
            Ok(scorer) => match scorer.health_check().await {
                Ok(true) => println!("  ✅ Scorer reachable at {}", scorer.impact_url()),
                Ok(false) => {
                    println!("  ❌ Scorer not reachable at {}", scorer.impact_url());
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ Scorer rejected credentials: {e}");
                    issues += 1;
                }
            },
            Err(e) => {
                println!("  ❌ Could not build scorer: {e}");
                issues += 1;
            }
        }
    } else {
        println!("  ❌ No API key, set api_key in config.toml or ECOTRACE_API_KEY");
        issues += 1;
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

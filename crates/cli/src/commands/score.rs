//! `ecotrace score`: Score one usage record end to end.

use clap::Args;
use ecotrace_config::AppConfig;
use ecotrace_core::{AggregateImpact, Task, UsageRecord};
use ecotrace_tracer::{ImpactTracer, TraceOptions, context};
use std::time::Duration;

#[derive(Debug, Args)]
pub struct ScoreArgs {
    /// Model identifier, e.g. gpt-4o
    #[arg(short, long)]
    pub model: String,

    /// Provider / managed service, e.g. openai
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Task kind (chat, text-generation, text-embedding, ...)
    #[arg(short, long)]
    pub task: Option<Task>,

    #[arg(long, default_value_t = 0)]
    pub input_tokens: u64,

    #[arg(long, default_value_t = 0)]
    pub output_tokens: u64,

    /// Request latency in milliseconds
    #[arg(long)]
    pub duration_ms: Option<f64>,

    /// Session to attribute the record to
    #[arg(long)]
    pub session: Option<String>,

    /// How long to wait for the result
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Print the aggregate as JSON
    #[arg(long)]
    pub json: bool,
}

impl ScoreArgs {
    fn record(&self) -> UsageRecord {
        let mut record =
            UsageRecord::new(&self.model).with_tokens(self.input_tokens, self.output_tokens);
        if let Some(provider) = &self.provider {
            record = record.with_provider(provider);
        }
        if let Some(task) = self.task {
            record = record.with_task(task);
        }
        if let Some(ms) = self.duration_ms {
            record = record.with_duration_ms(ms);
        }
        record
    }

    fn trace_options(&self) -> TraceOptions {
        let options = TraceOptions::named("cli");
        match &self.session {
            Some(session) => options.with_session(session),
            None => options,
        }
    }
}

pub async fn run(args: ScoreArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let tracer = ImpactTracer::from_config(&config)?;

    let impact = context::scope(score_one(&tracer, &args)).await;
    let outstanding = tracer.shutdown();
    if outstanding > 0 {
        tracing::warn!(outstanding, "Exiting with scoring jobs still queued");
    }
    let impact = impact?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&impact)?);
    } else {
        print_summary(&args, &impact);
    }
    Ok(())
}

async fn score_one(
    tracer: &ImpactTracer,
    args: &ScoreArgs,
) -> ecotrace_core::Result<AggregateImpact> {
    let trace = tracer.trace(args.trace_options());
    let handle = tracer.submit_usage_async(args.record()).await?;
    tracing::debug!(request_id = handle.request_id().unwrap_or("-"), "Record queued");
    trace
        .impact_async(Some(Duration::from_secs(args.timeout_secs)))
        .await
}

fn print_summary(args: &ScoreArgs, impact: &AggregateImpact) {
    println!("🌱 Impact for {}", args.model);
    println!("   Tokens:     {} in / {} out", args.input_tokens, args.output_tokens);
    println!("   Energy:     {:.6} Wh", impact.total_energy_wh);
    println!("   Emissions:  {:.6} gCO2e", impact.total_gco2e);
    println!("   Water:      {:.6} mL", impact.total_mlh2o);
    for row in &impact.rows {
        if let Some(err) = &row.error {
            println!("   ⚠️  {}: {}", err.code, err.message);
        }
    }
}

use anyhow::Result;
use clap::Parser;
use lims_insights::field_guide::FieldGuide;
use lims_insights::llm::SidecarClient;
use lims_insights::pipeline::QueryPipeline;
use lims_insights::rules::BusinessRules;
use lims_insights::schema::SchemaCatalog;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "insights")]
#[command(about = "Governed question-to-SQL pipeline for laboratory data")]
struct Args {
    /// The question in natural language
    question: String,

    /// Path to configuration directory (default: ./config)
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// Path to the exported schema catalog JSON
    #[arg(short, long, default_value = "config/schema.sample.json")]
    schema: PathBuf,

    /// Conversation session identifier
    #[arg(long)]
    session: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let rules = Arc::new(BusinessRules::load(args.config_dir.join("business-rules.json"))?);
    let guide = Arc::new(FieldGuide::load(args.config_dir.join("field-guide.json"))?);
    let schema = Arc::new(SchemaCatalog::load(&args.schema)?);

    let base_url =
        std::env::var("LLM_SIDECAR_URL").unwrap_or_else(|_| "http://127.0.0.1:3100".to_string());
    let api_secret = std::env::var("LLM_SIDECAR_SECRET").ok();
    let model = std::env::var("LLM_DEFAULT_MODEL").unwrap_or_else(|_| "sonnet".to_string());
    let provider = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "sidecar".to_string());
    let generator = Arc::new(SidecarClient::new(base_url, api_secret, model, provider));

    let pipeline = QueryPipeline::new(rules, guide, schema, generator)?;
    let identity = pipeline.generator_identity();
    info!(provider = %identity.provider, model = %identity.model, "pipeline ready");

    let session = args
        .session
        .clone()
        .unwrap_or_else(lims_insights::conversation::new_session_id);
    let outcome = pipeline
        .process_query(&args.question, Some(&session))
        .await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

use clap::Parser;
use std::sync::Arc;
use vn_txn_extract::config::cli::{Command, PredictArgs};
use vn_txn_extract::core::evaluation::{dataset_categories, evaluate, load_dataset, write_results};
use vn_txn_extract::domain::model::ErrorResponse;
use vn_txn_extract::utils::error::{ErrorSeverity, ExtractError};
use vn_txn_extract::utils::{logger, validation::Validate};
use vn_txn_extract::{CliConfig, LlmClient, PredictRequest, PredictionPipeline, Result, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 載入配置 (檔案 → 環境變數 → 命令列)
    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            logger::init_cli_logger("info", cli.verbose);
            exit_with(&e);
        }
    };

    // 初始化日誌
    logger::init_logger(&settings.logging.level, &settings.logging.format, cli.verbose);
    tracing::info!("🚀 Starting vn-txn-extract v{}", env!("CARGO_PKG_VERSION"));
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = run(cli, settings).await {
        exit_with(&e);
    }

    Ok(())
}

fn load_settings(cli: &CliConfig) -> Result<Settings> {
    cli.validate()?;
    let mut settings = Settings::load(cli.config.as_deref())?;
    cli.apply_to(&mut settings);
    settings.validate()?;
    Ok(settings)
}

async fn run(cli: CliConfig, settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);

    if let Command::Categories = cli.command {
        let vocabulary = settings.vocabulary(&[], true);
        let listing = serde_json::json!({
            "categories": vocabulary.categories(),
            "types": vocabulary.types(),
            "fallback_category": vocabulary.fallback_category(),
        });
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    let client = LlmClient::new(&settings.llm)?;
    tracing::info!("🔗 LLM server: {}", client.base_url());
    let pipeline = PredictionPipeline::new(client, Arc::clone(&settings));

    match cli.command {
        Command::Predict { text, args } => {
            let request = PredictRequest::new(text, args.categories.clone())?;
            let response = pipeline.predict(&request, &args.options()).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Batch { file, args } => {
            let content = std::fs::read_to_string(&file)?;
            let texts: Vec<String> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            tracing::info!("📥 批次處理 {} 筆", texts.len());

            let results = pipeline
                .predict_batch(&texts, &args.categories, &args.options())
                .await;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Evaluate {
            dataset,
            output,
            limit,
            args,
        } => run_evaluation(&pipeline, &dataset, output.as_deref(), limit, &args).await?,
        Command::Health => {
            let health = pipeline.health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
            if !health.llm_available {
                return Err(ExtractError::LlmServiceError {
                    message: format!("LLM server at {} is not reachable", settings.llm.base_url),
                });
            }
        }
        Command::Categories => {}
    }

    Ok(())
}

async fn run_evaluation(
    pipeline: &PredictionPipeline<LlmClient>,
    dataset: &std::path::Path,
    output: Option<&std::path::Path>,
    limit: Option<usize>,
    args: &PredictArgs,
) -> Result<()> {
    let examples = load_dataset(dataset, limit)?;
    tracing::info!("📁 Loaded {} examples from {}", examples.len(), dataset.display());

    let categories = if args.categories.is_empty() {
        dataset_categories(&examples)
    } else {
        args.categories.clone()
    };

    let (rows, summary) = evaluate(pipeline, &examples, &categories, &args.options()).await;

    if let Some(output) = output {
        write_results(output, &rows)?;
        tracing::info!("📁 Results saved to: {}", output.display());
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("📊 Amount accuracy:   {:.2}%", summary.amount_accuracy() * 100.0);
    println!("📊 Category accuracy: {:.2}%", summary.category_accuracy() * 100.0);
    println!("📊 Type accuracy:     {:.2}%", summary.type_accuracy() * 100.0);
    println!("📊 Overall accuracy:  {:.2}%", summary.overall_accuracy() * 100.0);
    Ok(())
}

fn exit_with(e: &ExtractError) -> ! {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    if let Ok(body) = serde_json::to_string_pretty(&ErrorResponse::from(e)) {
        println!("{}", body);
    }
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2, // 服務錯誤，可重試
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}

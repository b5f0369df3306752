use crate::config::settings::Settings;
use crate::core::pipeline::PredictOptions;
use crate::utils::error::Result;
use crate::utils::validation::{
    validate_file_extension, validate_path, validate_positive_number, validate_url, Validate,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "vn-txn-extract")]
#[command(about = "Extract amount, category and type from Vietnamese transaction text")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override llm.base_url
    #[arg(long, global = true)]
    pub llm_url: Option<String>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Predict one transaction text
    Predict {
        text: String,
        #[command(flatten)]
        args: PredictArgs,
    },
    /// Predict every non-empty line of a text file
    Batch {
        file: PathBuf,
        #[command(flatten)]
        args: PredictArgs,
    },
    /// Measure accuracy against a labelled CSV dataset
    Evaluate {
        dataset: PathBuf,
        /// Write per-row results to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[command(flatten)]
        args: PredictArgs,
    },
    /// Check whether the model server is reachable
    Health,
    /// Print the configured categories and transaction types
    Categories,
}

#[derive(Debug, Clone, Default, Args)]
pub struct PredictArgs {
    /// Allowed categories (comma separated); defaults come from the config
    #[arg(long, value_delimiter = ',')]
    pub categories: Vec<String>,

    /// Split the text into several transactions
    #[arg(long)]
    pub multi: bool,

    /// Return the model's answer without repairs
    #[arg(long)]
    pub no_fix: bool,

    /// Without --categories, let the model name any category instead of
    /// using the configured defaults
    #[arg(long)]
    pub open_domain: bool,

    /// Include the raw model output in the response
    #[arg(long)]
    pub raw: bool,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl PredictArgs {
    pub fn options(&self) -> PredictOptions {
        PredictOptions {
            fix_invalid: !self.no_fix,
            multi_transaction: self.multi,
            use_default_categories: !self.open_domain,
            timeout: self.timeout.map(Duration::from_secs),
            include_raw_output: self.raw.then_some(true),
        }
    }
}

impl CliConfig {
    /// 命令列參數覆蓋配置檔
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(url) = &self.llm_url {
            settings.llm.base_url = url.clone();
        }
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        if let Some(url) = &self.llm_url {
            validate_url("llm_url", url)?;
        }

        match &self.command {
            Command::Predict { args, .. } => args.validate(),
            Command::Batch { file, args } => {
                validate_path("file", &file.to_string_lossy())?;
                args.validate()
            }
            Command::Evaluate {
                dataset,
                output,
                args,
                ..
            } => {
                validate_file_extension("dataset", &dataset.to_string_lossy(), &["csv"])?;
                if let Some(output) = output {
                    validate_file_extension("output", &output.to_string_lossy(), &["csv"])?;
                }
                args.validate()
            }
            Command::Health | Command::Categories => Ok(()),
        }
    }
}

impl Validate for PredictArgs {
    fn validate(&self) -> Result<()> {
        if let Some(timeout) = self.timeout {
            validate_positive_number("timeout", timeout, 1)?;
        }
        Ok(())
    }
}

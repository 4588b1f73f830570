use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "lessongen",
    version,
    about = "Generate lesson scripts from topic lists and run them in batches"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse a locale's topic document and list the topics found.
    Topics(TopicsArgs),
    /// Generate lesson scripts for one locale.
    Generate(GenerateArgs),
    /// Run stored lesson scripts.
    Execute(ExecuteArgs),
    /// Generate, then execute, across one or all locales.
    Pipeline(PipelineArgs),
    /// Report configuration, stored scripts and recent runs.
    Status(StatusArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Topics(_) => "topics",
            Self::Generate(_) => "generate",
            Self::Execute(_) => "execute",
            Self::Pipeline(_) => "pipeline",
            Self::Status(_) => "status",
        }
    }

    pub fn common(&self) -> &CommonArgs {
        match self {
            Self::Topics(args) => &args.common,
            Self::Generate(args) => &args.common,
            Self::Execute(args) => &args.common,
            Self::Pipeline(args) => &args.common,
            Self::Status(args) => &args.common,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, default_value = "lessongen.toml")]
    pub config: PathBuf,

    #[arg(long, default_value = ".cache/lessongen")]
    pub work_root: PathBuf,

    /// Append the transcript to this file instead of a new timestamped log.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log to the console only.
    #[arg(long, default_value_t = false, conflicts_with = "log_file")]
    pub no_log_file: bool,
}

impl CommonArgs {
    pub fn manifest_dir(&self) -> PathBuf {
        self.work_root.join("manifests")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.work_root.join("logs")
    }
}

#[derive(Args, Debug, Clone)]
pub struct TopicsArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long)]
    pub locale: String,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long)]
    pub locale: String,

    /// Where to write the run manifest.
    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    /// Only generate the topic with this number (repeatable).
    #[arg(long = "topic")]
    pub topic_ids: Vec<u32>,

    /// Regenerate scripts whose file already exists.
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExecuteArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// One configured locale, or `all`.
    #[arg(long, default_value = "all")]
    pub locale: String,

    /// Run scripts even when their lesson already exists in the catalog.
    #[arg(long, default_value_t = false)]
    pub include_existing: bool,

    /// Stop at the first failing script.
    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,

    /// Keep script output off stdout; it still goes to the run log.
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// One configured locale, or `all`.
    #[arg(long, default_value = "all")]
    pub locale: String,

    #[arg(long, default_value_t = false)]
    pub skip_generation: bool,

    #[arg(long, default_value_t = false)]
    pub skip_execution: bool,

    /// Run scripts even when their lesson already exists in the catalog.
    #[arg(long, default_value_t = false)]
    pub include_existing: bool,

    /// Keep script output off stdout; it still goes to the run log.
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::cli::TopicsArgs;
use crate::config::load_config;
use crate::topics::load_topics;

pub fn run(args: TopicsArgs) -> Result<()> {
    let config = load_config(&args.common.config)?;
    let locale = config.locale(&args.locale)?;

    let topics = load_topics(&locale.topics_path, locale.template_topic_id);
    if topics.is_empty() {
        bail!("no topics parsed from {}", locale.topics_path.display());
    }

    info!(
        locale = %args.locale,
        path = %locale.topics_path.display(),
        topics = topics.len(),
        excluded_template_topic = ?locale.template_topic_id,
        "parsed topic document"
    );

    let rendered = serde_json::to_string_pretty(&topics).context("failed to serialize topics")?;
    println!("{rendered}");
    Ok(())
}

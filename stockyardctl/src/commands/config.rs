use anyhow::{Context, Result};
use stockyard_config::{ConfigSource, StockyardConfig};

use crate::cli::ConfigArgs;

pub fn run(args: ConfigArgs, config: &StockyardConfig, source: &ConfigSource) -> Result<()> {
    if args.json {
        let rendered =
            serde_json::to_string_pretty(config).context("failed to render configuration")?;
        println!("{rendered}");
        return Ok(());
    }

    let origin = match source {
        ConfigSource::Default => "defaults".to_string(),
        ConfigSource::EnvInline => "$STOCKYARD_CONFIG_JSON".to_string(),
        ConfigSource::EnvPath(path) | ConfigSource::File(path) => path.display().to_string(),
    };
    println!("# source: {origin}");
    print!("{}", config.to_toml()?);
    Ok(())
}

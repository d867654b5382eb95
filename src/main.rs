use anyhow::Result;
use grade_submit::orchestrator::{run_compute, ApplyRun};
use grade_submit::utils::logging;
use grade_submit::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志
    logging::init(config.verbose_logging);
    logging::init_log_file(&config.output_log_file)?;
    logging::log_startup(&config);

    if config.phase.includes_compute() {
        run_compute(&config).await?;
    }

    if config.phase.includes_apply() {
        ApplyRun::initialize(config).await?.run().await?;
    }

    Ok(())
}

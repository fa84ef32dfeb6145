use profile_scraper_lib::sheets::{RemoteTable, SheetsClient};
use profile_scraper_lib::{logger, Config, RunLoop, SinkWriter, StopSignal};

use std::error::Error;
use log::info;

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();
    let config = Config::from_env();
    info!(
        "Starting profile scraper against {} ({} mode)...",
        config.base_url,
        if config.continuous { "continuous" } else { "one-shot" }
    );

    let remote: Option<Box<dyn RemoteTable>> = if config.export_to_sheets
        && !config.sheet_url.is_empty()
    {
        Some(Box::new(SheetsClient::new(
            &config.sheet_url,
            config.sheet_token.as_deref(),
        )?))
    } else {
        info!("Remote sheet sync disabled; writing local history only.");
        None
    };

    let sink = SinkWriter::from_config(&config, remote);
    let stop = StopSignal::new();

    let mut run_loop = RunLoop::new(config, sink, stop)?;
    run_loop.run()?;

    info!("Scraper finished.");
    Ok(())
}

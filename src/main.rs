use clap::Parser;

use mcached::cli::CliArgs;
use mcached::daemonize;
use mcached::reactor::Reactor;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();
    let settings = args.into_settings();

    daemonize::ignore_signals(settings.daemonize)?;
    if settings.daemonize {
        daemonize::daemonize()?;
    }

    log::info!(
        "starting mcached v{} on port {} ({} worker thread{}, {} MiB cache)",
        mcached::config::VERSION,
        settings.port,
        settings.threads,
        if settings.threads == 1 { "" } else { "s" },
        settings.cache_bytes / (1024 * 1024),
    );

    let reactor = Reactor::new(&settings)?;
    reactor.run()?;
    Ok(())
}

use anyhow::Result;
use nix::unistd::geteuid;
use tokio::{
    signal::unix::{SignalKind, signal},
    time::{self, MissedTickBehavior},
};
use ulatency_core::{FilterRegistry, ProcessSource, ProcfsSource, Timestamp, log_error};

use crate::cli::UlatencyDaemonOpts;

mod config;
mod scanner;

pub use config::{GENERAL_CONFIG, GeneralConfig, UlatencyConfig};
pub use scanner::Scanner;

pub async fn ulatency_daemon_run(options: &UlatencyDaemonOpts) -> Result<()> {
    log::trace!("ulatency Daemon Options: {:?}", options);

    if !geteuid().is_root() {
        log::warn!("Not running as root: processes of other users can't be fully inspected");
    }

    let mut config = if let Some(custom_file) = &options.config_file {
        UlatencyConfig::with_custom_file(custom_file)?
    } else {
        UlatencyConfig::new()?
    };
    let general = config.general()?;

    let registry = FilterRegistry::new();

    #[cfg(feature = "rules-filter")]
    let mut rules = rules::start(&config, &registry)?;

    let mut scanner = Scanner::new(ProcfsSource::default(), registry, &general);

    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_hup = signal(SignalKind::hangup())?;

    let mut interval = time::interval(general.interval);
    // A slow tick delays the next one, ticks never overlap.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log::info!(
        "Starting scan loop every {}ms",
        general.interval.as_millis()
    );
    loop {
        tokio::select! {
            _ = interval.tick() => run_tick(&mut scanner),
            _ = sig_hup.recv() => {
                log::info!("SIGHUP received, reloading configuration");
                if let Err(err) = config.reload() {
                    log::error!("{err:#}");
                    continue;
                }
                #[cfg(feature = "rules-filter")]
                rules::reload(&mut rules, &config, scanner.registry());
            }
            _ = sig_int.recv() => {
                log::trace!("SIGINT received");
                break;
            }
            _ = sig_term.recv() => {
                log::trace!("SIGTERM received");
                break;
            }
        }
    }

    log::info!("Terminating ulatency Daemon...");
    Ok(())
}

fn run_tick<S: ProcessSource>(scanner: &mut Scanner<S>) {
    match scanner.tick(Timestamp::now()) {
        Ok(report) => {
            for failure in &report.failures {
                log::debug!("{failure}");
            }
        }
        Err(err) => log_error("Error reading processes", err),
    }
}

#[cfg(feature = "rules-filter")]
mod rules {
    use anyhow::Result;
    use rules_filter::{Config, MODULE_NAME, RulesFilter};
    use ulatency_core::{FilterRegistry, log_error};

    use super::UlatencyConfig;

    pub(super) fn start(
        config: &UlatencyConfig,
        registry: &FilterRegistry,
    ) -> Result<Option<RulesFilter>> {
        let rules_config = Config::try_from(&config.section(MODULE_NAME))?;
        if !rules_config.enabled {
            log::info!("Module {MODULE_NAME} disabled");
            return Ok(None);
        }
        log::info!("Starting module {MODULE_NAME}");
        let mut rules = RulesFilter::new(registry.clone(), &rules_config);
        rules.reload()?;
        Ok(Some(rules))
    }

    /// Apply a configuration change. Errors are logged and the previous rules
    /// stay active.
    pub(super) fn reload(
        rules: &mut Option<RulesFilter>,
        config: &UlatencyConfig,
        registry: &FilterRegistry,
    ) {
        let rules_config = match Config::try_from(&config.section(MODULE_NAME)) {
            Ok(rules_config) => rules_config,
            Err(err) => return log_error("Invalid rules-filter configuration", err),
        };

        if !rules_config.enabled {
            if let Some(mut previous) = rules.take() {
                log::info!("Stopping module {MODULE_NAME}");
                previous.unload();
            }
            return;
        }

        let rules = rules.get_or_insert_with(|| RulesFilter::new(registry.clone(), &rules_config));
        if let Err(err) = rules.reload_from(&rules_config.rules_path) {
            log_error("Error reloading rules", err);
        }
    }
}

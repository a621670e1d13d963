use std::{env, ffi::OsString};

use clap::{ArgAction, Parser};

pub const NAME: &str = "ulatencyd";

#[derive(Parser, Debug, Clone)]
#[clap(name = NAME)]
#[clap(about = "ulatency daemon")]
#[clap(version = crate::metadata::VERSION)]
#[clap(disable_help_subcommand = true)]
pub struct UlatencyDaemonOpts {
    #[clap(long)]
    pub config_file: Option<String>,

    /// Pass many times for a more verbose output. Passing `-v` adds debug logs,
    /// `-vv` enables trace logging
    #[clap(short, long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl UlatencyDaemonOpts {
    pub fn log_level(&self) -> log::LevelFilter {
        log_level_from_verbosity_flag_count(self.verbose)
    }
}

pub fn parse_from_args() -> UlatencyDaemonOpts {
    parse_from(std::env::args_os())
}

pub fn parse_from<I, T>(args: I) -> UlatencyDaemonOpts
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    UlatencyDaemonOpts::try_parse_from(args).unwrap_or_else(|e| e.exit())
}

/// Log a fatal error. The full cause chain and backtrace are printed with
/// debug logs enabled or `RUST_BACKTRACE=1`.
pub fn report_error(e: &anyhow::Error) {
    let verbose = log::max_level() >= log::LevelFilter::Debug
        || env::var("RUST_BACKTRACE").is_ok_and(|v| v == "1");
    if verbose {
        log::error!("{e:?}");
    } else {
        log::error!("{e:#}");
    }
}

fn log_level_from_verbosity_flag_count(num: u8) -> log::LevelFilter {
    match num {
        u8::MIN..=0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        2..=u8::MAX => log::LevelFilter::Trace,
    }
}

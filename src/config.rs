use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::job::MAX_JOBS;

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "JSH_LOG";

pub const PROMPT: &str = "jsh> ";

/// A tiny shell with job control.
#[derive(Debug, Parser)]
#[command(name = "jsh", version)]
pub struct Config {
    /// Print additional diagnostic information
    #[arg(short, long)]
    pub verbose: bool,

    /// Do not emit a command prompt
    #[arg(short = 'p', long = "no-prompt")]
    pub no_prompt: bool,

    /// Maximum number of jobs at any point in time
    #[arg(long, default_value_t = MAX_JOBS, value_parser = parse_max_jobs)]
    pub max_jobs: usize,
}

impl Config {
    pub fn prompt(&self) -> Option<&'static str> {
        (!self.no_prompt).then_some(PROMPT)
    }

    /// `JSH_LOG` if set, otherwise `debug` with `-v` and `warn` without.
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
            EnvFilter::new(if self.verbose { "jobsh=debug" } else { "warn" })
        })
    }
}

fn parse_max_jobs(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        Ok(_) => Err("must be at least 1".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Config::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["jsh"]).unwrap();
        assert!(!config.verbose);
        assert_eq!(config.prompt(), Some(PROMPT));
        assert_eq!(config.max_jobs, MAX_JOBS);
    }

    #[test]
    fn short_flags_combine() {
        let config = Config::try_parse_from(["jsh", "-vp", "--max-jobs", "4"]).unwrap();
        assert!(config.verbose);
        assert_eq!(config.prompt(), None);
        assert_eq!(config.max_jobs, 4);
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(Config::try_parse_from(["jsh", "--max-jobs", "0"]).is_err());
    }
}

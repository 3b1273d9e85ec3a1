//! Command-line interface handling for the module host.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Command line arguments. Options here override the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the module directory
    pub module_dir: Option<PathBuf>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Discover modules, print the type catalog and exit
    pub list_types: bool,
    /// Use the bounded forced shutdown instead of the graceful one
    pub fast_shutdown: bool,
}

fn command() -> Command {
    Command::new("modhost")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Loads core mods and plugins from a module directory and drives their lifecycle")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("modhost.toml"),
        )
        .arg(
            Arg::new("modules")
                .short('m')
                .long("modules")
                .value_name("DIR")
                .help("Module directory path"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-types")
                .long("list-types")
                .help("Print every discovered type as JSON and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("fast-shutdown")
                .long("fast-shutdown")
                .help("Stop waiting for plugins after the force shutdown timeout")
                .action(ArgAction::SetTrue),
        )
}

impl CliArgs {
    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list.
    ///
    /// # Arguments
    ///
    /// * `args` - Arguments including the binary name
    ///
    /// # Returns
    ///
    /// The parsed arguments, or the clap error describing the bad input.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("modhost.toml")),
            module_dir: matches.get_one::<String>("modules").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            list_types: matches.get_flag("list-types"),
            fast_shutdown: matches.get_flag("fast-shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_is_well_formed() {
        command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["modhost"]).unwrap();

        assert_eq!(args.config_path, PathBuf::from("modhost.toml"));
        assert_eq!(args.module_dir, None);
        assert_eq!(args.log_level, None);
        assert!(!args.json_logs);
        assert!(!args.list_types);
        assert!(!args.fast_shutdown);
    }

    #[test]
    fn test_overrides() {
        let args = CliArgs::try_parse_from([
            "modhost",
            "-c",
            "/etc/modhost.toml",
            "--modules",
            "/srv/modules",
            "-l",
            "debug",
            "--json-logs",
            "--list-types",
            "--fast-shutdown",
        ])
        .unwrap();

        assert_eq!(args.config_path, PathBuf::from("/etc/modhost.toml"));
        assert_eq!(args.module_dir, Some(PathBuf::from("/srv/modules")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert!(args.list_types);
        assert!(args.fast_shutdown);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(CliArgs::try_parse_from(["modhost", "--bind", "0.0.0.0:80"]).is_err());
    }
}

use clap::{Arg, ArgMatches, Command};
use std::env;
use std::path::PathBuf;

pub struct Config {
    pub config_path: PathBuf,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub project: Option<String>,
}

impl From<ArgMatches> for Config {
    fn from(matches: ArgMatches) -> Self {
        Config {
            config_path: matches
                .get_one::<PathBuf>("config")
                .cloned()
                .unwrap_or_else(|| PathBuf::from("gantry.toml")),
            host: matches.get_one::<String>("host").cloned(),
            port: matches.get_one::<u16>("port").copied(),
            project: matches.get_one::<String>("project").cloned(),
        }
    }
}

fn command() -> Command {
    let default_config = env::var("GANTRY_CONFIG").unwrap_or_else(|_| "gantry.toml".to_string());
    Command::new("gantry")
        .version(env!("CARGO_PKG_VERSION"))
        .about("zero-downtime blue-green deployments of a project's containers")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help(format!("Project file (default: {default_config})"))
                .value_name("FILE")
                .default_value(default_config)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("host")
                .short('H')
                .long("host")
                .help("Deploy over ssh to USER@HOST instead of the local runtime")
                .value_name("USER@HOST"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("ssh port of the target host")
                .value_name("PORT")
                .requires("host")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("project")
                .long("project")
                .help("Override the project name from the project file")
                .value_name("NAME"),
        )
}

pub(crate) fn configure_cli() -> Config {
    command().get_matches().into()
}

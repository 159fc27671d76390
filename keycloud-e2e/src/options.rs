use clap::{arg, command, value_parser, ArgMatches};
use schematic::{Config, ConfigLoader};
use std::{collections::HashMap, env, path::PathBuf};

const CONFIGS: &[&str] = &[
    "keycloud-e2e.json",
    "keycloud-e2e.yml",
    "keycloud-e2e.yaml",
    "keycloud-e2e.toml",
];

pub fn configure() -> KeycloudContext {
    let cli_matches = get_cli_matches();

    let configs: Vec<&str> = CONFIGS
        .iter()
        .filter(|c| std::path::Path::new(c).exists())
        .cloned()
        .collect();
    if configs.len() > 1 {
        eprintln!(
            "Found multiple possible config files: [{}]",
            configs.join(", ")
        );
        eprintln!("keycloud-e2e only supports loading one configuration file format, please ensure only one file exists.");
        std::process::exit(1);
    }

    let mut loader = ConfigLoader::<KeycloudParams>::new();
    for config in configs {
        if let Err(e) = loader.file(config) {
            eprintln!("Failed to load {config}:\n{e}");
            std::process::exit(1);
        }
    }

    match loader.load() {
        Err(e) => {
            eprintln!("Failed to initialize configuration: {e}");
            std::process::exit(1);
        }
        Ok(mut result) => {
            result.config.override_from_cli(cli_matches);

            match KeycloudContext::load(result.config) {
                Ok(ctx) => ctx,
                Err(_) => {
                    eprintln!("Failed to initialize configuration");
                    std::process::exit(1);
                }
            }
        }
    }
}

fn get_cli_matches() -> ArgMatches {
    command!()
        .arg(
            arg!(
                -r --root <DIR> "The location from which to look for scenario files"
            )
            .required(false)
            .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(
                -b --"base-url" <URL> "The origin the dashboard is served on"
            )
            .required(false),
        )
        .arg(
            arg!(
                -c --concurrency <NUM> "How many scenarios should be run concurrently"
            )
            .required(false)
            .value_parser(value_parser!(usize)),
        )
        .arg(
            arg!(--placeholders <PAIRS> "Define placeholders for scenario steps")
                .long_help("e.g. --placeholders key=value second_key=second_value")
                .required(false)
                .num_args(0..),
        )
        .arg(
            arg!(--"placeholder-delimiter" <DELIM> "Define which character delimits placeholders in step arguments")
                .required(false)
        )
        .arg(
            arg!(
                -v --verbose ... "Print each step as scenarios run"
            )
            .action(clap::ArgAction::SetTrue),
        )
        .arg(
            arg!(
                --porcelain ... "Reduce logging to be stable"
            )
            .action(clap::ArgAction::SetTrue),
        )
        .arg(
            arg!(
                --timeout <NUM> "How long in seconds until a step times out"
            )
            .required(false)
            .value_parser(value_parser!(u64)),
        )
        .arg(
            arg!(
                --"browser-timeout" <NUM> "How long in seconds the browser waits for in-page conditions"
            )
            .required(false)
            .value_parser(value_parser!(u64)),
        )
        .arg(
            arg!(
                -n --name <NAME> "Exact name of a scenario to run")
                .long_help("case-sensitive")
                .required(false)
        )
        .arg(
            arg!(
                --screenshots <DIR> "Where to write a viewport screenshot when a scenario fails"
            )
            .required(false)
            .value_parser(value_parser!(PathBuf)),
        )
        .get_matches()
}

#[derive(Config, Debug, Clone)]
#[config(rename_all = "snake_case")]
pub struct KeycloudParams {
    /// The location from which to look for scenario files
    #[setting(env = "KEYCLOUD_E2E_ROOT")]
    pub root: Option<PathBuf>,

    /// The origin the dashboard is served on
    #[setting(env = "KEYCLOUD_E2E_BASE_URL")]
    #[setting(default = "http://localhost:8000/")]
    pub base_url: String,

    /// Print each step as scenarios run
    #[setting(env = "KEYCLOUD_E2E_VERBOSE")]
    pub verbose: bool,

    /// Reduce logging to be stable
    #[setting(env = "KEYCLOUD_E2E_PORCELAIN")]
    pub porcelain: bool,

    /// Run a specific scenario
    #[setting(env = "KEYCLOUD_E2E_RUN_NAME")]
    pub run_name: Option<String>,

    /// How many scenarios should be run concurrently
    #[setting(env = "KEYCLOUD_E2E_CONCURRENCY")]
    #[setting(default = 4)]
    pub concurrency: usize,

    /// How long in seconds until a step times out
    #[setting(env = "KEYCLOUD_E2E_TIMEOUT")]
    #[setting(default = 10)]
    pub timeout: u64,

    /// How long in seconds the browser waits for in-page conditions
    #[setting(env = "KEYCLOUD_E2E_BROWSER_TIMEOUT")]
    #[setting(default = 30)]
    pub browser_timeout: u64,

    /// Where to write a viewport screenshot when a scenario fails
    #[setting(env = "KEYCLOUD_E2E_SCREENSHOTS")]
    pub failure_screenshot_location: Option<PathBuf>,

    /// What delimiter should be used when replacing placeholders
    #[setting(env = "KEYCLOUD_E2E_PLACEHOLDER_DELIM")]
    #[setting(default = "%")]
    pub placeholder_delimiter: String,

    /// Placeholder keys, and the values they should be replaced with
    pub placeholders: HashMap<String, String>,
}

// The configuration object used internally
#[derive(Debug, Clone)]
pub struct KeycloudContext {
    pub version: &'static str,
    pub working_directory: PathBuf,
    pub params: KeycloudParams,
}

impl KeycloudContext {
    fn load(mut config: KeycloudParams) -> Result<Self, ()> {
        let working_directory = env::current_dir().map_err(|_| ())?;

        if let Some(root) = config.root.as_mut() {
            *root = working_directory.join(root.clone());
        }

        Ok(Self {
            working_directory,
            version: env!("CARGO_PKG_VERSION"),
            params: config,
        })
    }
}

impl KeycloudParams {
    fn override_from_cli(&mut self, cli_matches: ArgMatches) {
        if cli_matches.get_flag("verbose") {
            self.verbose = true;
        }

        if cli_matches.get_flag("porcelain") {
            self.porcelain = true;
        }

        if let Some(name) = cli_matches.get_one::<String>("name") {
            self.run_name = Some(name.clone());
        }

        if let Some(root) = cli_matches.get_one::<PathBuf>("root") {
            self.root = Some(root.clone());
        }

        if let Some(base_url) = cli_matches.get_one::<String>("base-url") {
            // Dashboard pages are addressed relative to the origin.
            self.base_url = if base_url.ends_with('/') {
                base_url.clone()
            } else {
                format!("{base_url}/")
            };
        }

        if let Some(concurrency) = cli_matches.get_one::<usize>("concurrency") {
            self.concurrency = *concurrency;
        }

        if let Some(timeout) = cli_matches.get_one::<u64>("timeout") {
            self.timeout = *timeout;
        }

        if let Some(browser_timeout) = cli_matches.get_one::<u64>("browser-timeout") {
            self.browser_timeout = *browser_timeout;
        }

        if let Some(screenshots) = cli_matches.get_one::<PathBuf>("screenshots") {
            self.failure_screenshot_location = Some(screenshots.clone());
        }

        if let Some(placeholder_delimiter) = cli_matches.get_one::<String>("placeholder-delimiter")
        {
            self.placeholder_delimiter = placeholder_delimiter.clone();
        }

        if let Some(placeholders) = cli_matches.get_many::<String>("placeholders") {
            for placeholder in placeholders {
                let Some((key, value)) = placeholder.split_once('=') else {
                    eprintln!("Error parsing --placeholders, expected a value of key=value but received {placeholder}");
                    std::process::exit(1);
                };

                self.placeholders.insert(key.into(), value.into());
            }
        }
    }
}

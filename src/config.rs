//! Command line and config-file parsing into an immutable [`Config`].
//!
//! Options come before the script:
//!
//! ```text
//! phantom [--option=value ...] script.js [script args ...]
//! ```
//!
//! Parsing never fails. Anything malformed ends up in [`Config::unknown_option`],
//! which the host reports and then refuses to run.

use std::path::{Path, PathBuf};

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::Parser;
use serde::Deserialize;

use crate::error::HostError;

pub const DEFAULT_DEBUG_PORT: u16 = 9000;
pub const DEFAULT_PROXY_PORT: u16 = 1080;

pub const USAGE: &str = "\
Usage: phantom [options] script.[js] [script arguments]

Options:
  --config=<file.json>                 Load options from a JSON file
  --debug=[yes|no]                     Run the script in the debug harness
  --remote-debugger-port=<port>        Debug mode, inspector bound to <port>
  --load-images=[yes|no]               Load inlined images (default: yes)
  --load-plugins=[yes|no]              Load plugins (default: no)
  --local-to-remote-url-access=[yes|no] Local content may access remote URLs (default: no)
  --web-security=[yes|no]              Enable web security (default: yes)
  --output-encoding=<enc>              Encoding of terminal output (default: utf8)
  --script-encoding=<enc>              Encoding of the script file (default: utf8)
  --proxy=<host[:port]>                Proxy server
  --proxy-type=[http|socks5]           Proxy type (default: http)
  -v, --version                        Print the version and exit
  -h, --help                           Print this help";

/// Parsed process configuration. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub script_file: Option<PathBuf>,
    pub script_args: Vec<String>,
    pub debug: bool,
    pub remote_debug_port: u16,
    pub proxy_host: Option<String>,
    pub proxy_port: u16,
    pub proxy_type: String,
    pub output_encoding: String,
    pub script_encoding: String,
    pub auto_load_images: bool,
    pub plugins_enabled: bool,
    pub local_to_remote_url_access: bool,
    pub web_security: bool,
    pub version_flag: bool,
    pub help_flag: bool,
    /// Diagnostic for the first option that could not be understood.
    pub unknown_option: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            script_file: None,
            script_args: Vec::new(),
            debug: false,
            remote_debug_port: DEFAULT_DEBUG_PORT,
            proxy_host: None,
            proxy_port: DEFAULT_PROXY_PORT,
            proxy_type: String::from("http"),
            output_encoding: String::from("utf8"),
            script_encoding: String::from("utf8"),
            auto_load_images: true,
            plugins_enabled: false,
            local_to_remote_url_access: false,
            web_security: true,
            version_flag: false,
            help_flag: false,
            unknown_option: None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "phantom", disable_version_flag = true, disable_help_flag = true)]
struct Cli {
    /// Print version information
    #[arg(short = 'v', long)]
    version: bool,

    /// Print usage
    #[arg(short = 'h', long)]
    help: bool,

    /// JSON file with default options
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_parser = parse_switch)]
    debug: Option<bool>,

    #[arg(long)]
    remote_debugger_port: Option<u16>,

    #[arg(long, value_parser = parse_switch)]
    load_images: Option<bool>,

    #[arg(long, value_parser = parse_switch)]
    load_plugins: Option<bool>,

    #[arg(long, value_parser = parse_switch)]
    local_to_remote_url_access: Option<bool>,

    #[arg(long, value_parser = parse_switch)]
    web_security: Option<bool>,

    #[arg(long)]
    output_encoding: Option<String>,

    #[arg(long)]
    script_encoding: Option<String>,

    #[arg(long)]
    proxy: Option<String>,

    #[arg(long)]
    proxy_type: Option<String>,
}

/// Options accepted from `--config=<file.json>`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConfigFile {
    debug: Option<bool>,
    remote_debugger_port: Option<u16>,
    load_images: Option<bool>,
    load_plugins: Option<bool>,
    local_to_remote_url_access_enabled: Option<bool>,
    web_security_enabled: Option<bool>,
    output_encoding: Option<String>,
    script_encoding: Option<String>,
    proxy: Option<String>,
    proxy_type: Option<String>,
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Ok(true),
        "no" | "false" | "off" | "0" => Ok(false),
        other => Err(format!("expected yes or no, got '{}'", other)),
    }
}

/// Split `host[:port]`. A missing or unparsable port falls back to the default.
fn split_proxy(value: &str) -> (String, u16) {
    match value.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            (host.to_string(), port.parse().unwrap_or(DEFAULT_PROXY_PORT))
        }
        _ => (value.to_string(), DEFAULT_PROXY_PORT),
    }
}

/// Options precede the script. The first token not starting with `-` is the
/// script, and every token after it belongs to the script.
fn split_script_args(args: Vec<String>) -> (Vec<String>, Option<String>, Vec<String>) {
    let mut options = Vec::new();
    let mut rest = args.into_iter();

    for arg in rest.by_ref() {
        if arg.starts_with('-') && arg.len() > 1 {
            options.push(arg);
        } else {
            return (options, Some(arg), rest.collect());
        }
    }

    (options, None, Vec::new())
}

fn describe_clap_error(err: &clap::Error) -> String {
    let context = |kind| match err.get(kind) {
        Some(ContextValue::String(s)) => Some(s.clone()),
        _ => None,
    };

    match err.kind() {
        ErrorKind::UnknownArgument => match context(ContextKind::InvalidArg) {
            Some(arg) => format!("Unknown option: {}", arg),
            None => String::from("Unknown option"),
        },
        ErrorKind::InvalidValue | ErrorKind::ValueValidation => {
            match (context(ContextKind::InvalidArg), context(ContextKind::InvalidValue)) {
                (Some(arg), Some(value)) => format!("Invalid value '{}' for {}", value, arg),
                (Some(arg), None) => format!("Invalid value for {}", arg),
                _ => first_line(err),
            }
        }
        _ => first_line(err),
    }
}

fn first_line(err: &clap::Error) -> String {
    let rendered = err.render().to_string();
    rendered
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches("error: ")
        .to_string()
}

impl Config {
    /// Parse the process arguments, skipping the executable name.
    pub fn from_env() -> Self {
        Self::from_args(std::env::args().skip(1))
    }

    /// Parse arguments that do not include the executable name.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (options, script, script_args) =
            split_script_args(args.into_iter().map(Into::into).collect());

        let mut config = Config {
            script_file: script.map(PathBuf::from),
            script_args,
            ..Default::default()
        };

        let argv = std::iter::once(String::from("phantom")).chain(options);
        let cli = match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(err) => {
                config.unknown_option = Some(describe_clap_error(&err));
                return config;
            }
        };

        if let Some(path) = &cli.config {
            match load_config_file(path) {
                Ok(file) => config.apply_file(file),
                Err(err) => {
                    config.unknown_option = Some(err.to_string());
                    return config;
                }
            }
        }

        config.apply_cli(cli);
        config
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(debug) = file.debug {
            self.debug = debug;
        }
        if let Some(port) = file.remote_debugger_port {
            self.debug = true;
            self.remote_debug_port = port;
        }
        if let Some(v) = file.load_images {
            self.auto_load_images = v;
        }
        if let Some(v) = file.load_plugins {
            self.plugins_enabled = v;
        }
        if let Some(v) = file.local_to_remote_url_access_enabled {
            self.local_to_remote_url_access = v;
        }
        if let Some(v) = file.web_security_enabled {
            self.web_security = v;
        }
        if let Some(v) = file.output_encoding {
            self.output_encoding = v;
        }
        if let Some(v) = file.script_encoding {
            self.script_encoding = v;
        }
        if let Some(proxy) = file.proxy {
            self.set_proxy(&proxy);
        }
        if let Some(v) = file.proxy_type {
            self.proxy_type = v;
        }
    }

    fn apply_cli(&mut self, cli: Cli) {
        self.version_flag = cli.version;
        self.help_flag = cli.help;

        if let Some(debug) = cli.debug {
            self.debug = debug;
        }
        if let Some(port) = cli.remote_debugger_port {
            self.debug = true;
            self.remote_debug_port = port;
        }
        if let Some(v) = cli.load_images {
            self.auto_load_images = v;
        }
        if let Some(v) = cli.load_plugins {
            self.plugins_enabled = v;
        }
        if let Some(v) = cli.local_to_remote_url_access {
            self.local_to_remote_url_access = v;
        }
        if let Some(v) = cli.web_security {
            self.web_security = v;
        }
        if let Some(v) = cli.output_encoding {
            self.output_encoding = v;
        }
        if let Some(v) = cli.script_encoding {
            self.script_encoding = v;
        }
        if let Some(proxy) = cli.proxy {
            self.set_proxy(&proxy);
        }
        if let Some(v) = cli.proxy_type {
            self.proxy_type = v;
        }
    }

    fn set_proxy(&mut self, value: &str) {
        if value.is_empty() {
            self.proxy_host = None;
            return;
        }
        let (host, port) = split_proxy(value);
        self.proxy_host = Some(host);
        self.proxy_port = port;
    }

    pub fn has_unknown_option(&self) -> bool {
        self.configuration_error().is_some()
    }

    /// The malformed option or config file that stops the run, if any.
    pub fn configuration_error(&self) -> Option<HostError> {
        self.unknown_option
            .as_deref()
            .filter(|message| !message.is_empty())
            .map(|message| HostError::Configuration(message.to_string()))
    }
}

fn load_config_file(path: &Path) -> Result<ConfigFile, HostError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        HostError::Configuration(format!("Unable to open config '{}': {}", path.display(), e))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        HostError::Configuration(format!("Invalid config '{}': {}", path.display(), e))
    })
}

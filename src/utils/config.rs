#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use log::{info, error, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;
use serde::Deserialize;
use std::{env, fs, path::Path};
use fs_mistrust::Mistrust;
use std::os::unix::fs::PermissionsExt;
use structopt::StructOpt;

// Greeting Utilities
use crate::api::greeting::GreetingVariant;
use crate::utils::{server_utils, errors::Errors};

use super::server_utils::get_absolute_path;

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Directory and file locations. Unless otherwise noted, all files and directories
// are relative to the root directory.
const ENV_GREETING_ROOT_DIR : &str = "GREETING_ROOT_DIR";
const DEFAULT_ROOT_DIR      : &str = "~/.greeting";
const CONFIG_DIR            : &str = "/config";
const LOGS_DIR              : &str = "/logs";
const CERTS_DIR             : &str = "/certs";
const LOG4RS_CONFIG_FILE    : &str = "/log4rs.yml";   // relative to config dir
const GREETING_CONFIG_FILE  : &str = "/greeting.toml"; // relative to config dir

// Networking.
const DEFAULT_HTTP_ADDR     : &str = "http://localhost";
const DEFAULT_HTTP_PORT     : u16  = 3000;

// Used when no log4rs configuration file is installed.
const DEFAULT_LOG_PATTERN   : &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l})} {t} - {m}{n}";

// ***************************************************************************
//                             Directory Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// GreetingDirs:
// ---------------------------------------------------------------------------
#[derive(Debug)]
pub struct GreetingDirs {
    pub root_dir: String,
    pub config_dir: String,
    pub logs_dir: String,
    pub certs_dir: String,
}

// ***************************************************************************
//                               Config Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// GreetingArgs:
// ---------------------------------------------------------------------------
#[derive(Debug, StructOpt)]
#[structopt(name = "greeting_args", about = "Command line arguments for Greeting Server.")]
pub struct GreetingArgs {
    /// Specify the server's root data directory.
    ///
    /// This directory contains the config, logs and certs subdirectories.
    #[structopt(short, long)]
    pub root_dir: Option<String>,

    /// Create the data directories and then exit.
    ///
    /// The data directories will be rooted at a root directory calculated
    /// using the following priority order:
    ///
    ///   1. If set, the value of the GREETING_ROOT_DIR environment,
    ///
    ///   2. Otherwise, if set, the value of the --root-dir command line argument,
    ///
    ///   3. Otherwise, ~/.greeting
    ///
    #[structopt(short, long)]
    pub create_dirs_only: bool,

    /// Override the greeting variant set in the configuration file.
    ///
    /// Accepted values are argocd and pull_request.
    #[structopt(short, long)]
    pub variant: Option<GreetingVariant>,
}

// ---------------------------------------------------------------------------
// Parms:
// ---------------------------------------------------------------------------
#[derive(Debug)]
pub struct Parms {
    pub config_file: String,
    pub config: Config,
}

// ---------------------------------------------------------------------------
// RuntimeCtx:
// ---------------------------------------------------------------------------
/** Everything the server needs to start, assembled once in main. */
#[derive(Debug)]
pub struct RuntimeCtx {
    pub parms: Parms,
    pub greeting_args: GreetingArgs,
    pub greeting_dirs: GreetingDirs,
}

// ---------------------------------------------------------------------------
// Config:
// ---------------------------------------------------------------------------
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub title: String,
    pub http_addr: String,
    pub http_port: u16,
    pub variant: GreetingVariant,
    pub tls: Option<TlsConfig>,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    // ---------------------------------------------------------------------------
    // server_url:
    // ---------------------------------------------------------------------------
    /** The URL advertised in the OpenAPI document.  The scheme follows the
     * listener: https when a tls section is configured, otherwise http.  Any
     * scheme written in http_addr is replaced.
     */
    pub fn server_url(&self) -> String {
        let host = self.http_addr
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let scheme = if self.tls.is_some() {"https"} else {"http"};
        format!("{}://{}:{}", scheme, host, self.http_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "Greeting Server".to_string(),
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            variant: GreetingVariant::default(),
            tls: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TlsConfig:
// ---------------------------------------------------------------------------
/** Certificate and key in PEM format. Relative names are resolved against
 * the certs directory.
 */
#[derive(Debug, Deserialize)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

impl TlsConfig {
    pub fn cert_path(&self, certs_dir: &str) -> String {
        resolve_in_dir(&self.cert_file, certs_dir)
    }

    pub fn key_path(&self, certs_dir: &str) -> String {
        resolve_in_dir(&self.key_file, certs_dir)
    }
}

// ***************************************************************************
//                            Directory Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_greeting_args:
// ---------------------------------------------------------------------------
/** Get the command line arguments. */
pub fn init_greeting_args() -> GreetingArgs {
    let args = GreetingArgs::from_args();
    println!("{:?}", args);
    args
}

// ---------------------------------------------------------------------------
// init_greeting_dirs:
// ---------------------------------------------------------------------------
/** Calculate the external data directories, creating any that are missing. */
pub fn init_greeting_dirs(args: &GreetingArgs) -> Result<GreetingDirs> {
    let mistrust = get_mistrust()?;

    // Check that each path is absolute and is a directory with the
    // proper permission assign if it exists.  If it doesn't exist,
    // create it.
    let root_dir = get_root_dir(args);
    check_greeting_dir(&root_dir, "root directory", &mistrust)?;

    let config_dir = root_dir.clone() + CONFIG_DIR;
    check_greeting_dir(&config_dir, "config directory", &mistrust)?;

    let logs_dir = root_dir.clone() + LOGS_DIR;
    check_greeting_dir(&logs_dir, "logs directory", &mistrust)?;

    let certs_dir = root_dir.clone() + CERTS_DIR;
    check_greeting_dir(&certs_dir, "certs directory", &mistrust)?;

    Ok(GreetingDirs { root_dir, config_dir, logs_dir, certs_dir })
}

// ---------------------------------------------------------------------------
// check_greeting_dir:
// ---------------------------------------------------------------------------
/** Check that the path is absolute and, if it exists, that is has the proper
 * permissions assigned.  If it doesn't exist, create it.  The mistrust package
 * creates directories with 0o700 permissions.
 */
fn check_greeting_dir(dir: &str, msgname: &str, mistrust: &Mistrust) -> Result<()> {
    let dir_err = |reason: &str| {
        anyhow!(Errors::DirectoryError(msgname.to_string(), dir.to_string(), reason.to_string()))
    };

    let path = Path::new(dir);
    if !path.is_absolute() {
        return Err(dir_err("path must be absolute"));
    }
    if path.exists() {
        if !path.is_dir() {
            return Err(dir_err("path must be a directory"));
        }

        // Make sure the directory has rwx for owner only.
        let meta = path.metadata().map_err(|e| dir_err(&e.to_string()))?;
        if meta.permissions().mode() & 0o777 != 0o700 {
            return Err(dir_err("path must have 0o700 permissions"));
        }
    } else {
        mistrust.make_directory(path).map_err(|e| dir_err(&e.to_string()))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// get_mistrust:
// ---------------------------------------------------------------------------
/** Configure a new mistrust object for initial directory processing. */
fn get_mistrust() -> Result<Mistrust> {
    Mistrust::builder()
        .ignore_prefix(get_absolute_path("~"))
        .trust_group(0)
        .build()
        .map_err(|e| anyhow!("Mistrust configuration error: {}", e))
}

// ---------------------------------------------------------------------------
// get_root_dir:
// ---------------------------------------------------------------------------
fn get_root_dir(args: &GreetingArgs) -> String {
    // Order of precedence:
    //  1. Environment variable
    //  2. Command line --root-dir argument
    //  3. Default location
    //
    let root_dir = env::var(ENV_GREETING_ROOT_DIR).unwrap_or_else(
        |_| {
            match args.root_dir.clone() {
                Some(r) => r,
                None => DEFAULT_ROOT_DIR.to_string(),
            }
        });

    get_absolute_path(&root_dir)
}

// ---------------------------------------------------------------------------
// resolve_in_dir:
// ---------------------------------------------------------------------------
fn resolve_in_dir(file: &str, dir: &str) -> String {
    let expanded = shellexpand::tilde(file);
    if Path::new(expanded.as_ref()).is_absolute() {
        expanded.into_owned()
    } else {
        format!("{}/{}", dir, file)
    }
}

// ***************************************************************************
//                               Log Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_log:
// ---------------------------------------------------------------------------
/** Initialize log4rs from the configuration directory.  When no log4rs.yml
 * has been installed, log info and above to the console.
 */
pub fn init_log(dirs: &GreetingDirs) -> Result<()> {
    let logconfig = init_log_config(dirs);
    if Path::new(&logconfig).exists() {
        if let Err(e) = log4rs::init_file(&logconfig, Default::default()) {
            println!("{}", e);
            return Err(anyhow!(Errors::Log4rsInitialization(logconfig)));
        }
        info!("Log4rs initialized using: {}", logconfig);
    } else {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(DEFAULT_LOG_PATTERN)))
            .build();
        let config = LogConfig::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Info))?;
        log4rs::init_config(config)?;
        info!("Log4rs configuration not found at {}, logging to console.", logconfig);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// init_log_config:
// ---------------------------------------------------------------------------
fn init_log_config(dirs: &GreetingDirs) -> String {
    dirs.config_dir.clone() + LOG4RS_CONFIG_FILE
}

// ***************************************************************************
//                             Parms Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// get_parms:
// ---------------------------------------------------------------------------
/** Retrieve the application parameters from the configuration file in the
 * config directory.  If the file cannot be read, default values are used.
 * A command line variant takes precedence over the file's variant.
 */
fn get_parms(args: &GreetingArgs, dirs: &GreetingDirs) -> Result<Parms> {
    let config_file = dirs.config_dir.clone() + GREETING_CONFIG_FILE;

    // Read the configuration file.
    let config_file_abs = server_utils::get_absolute_path(&config_file);
    info!("{}", Errors::ReadingConfigFile(config_file_abs.clone()));
    let mut parms = match fs::read_to_string(&config_file_abs) {
        Ok(contents) => Parms { config: parse_config(&contents, &config_file_abs)?,
                                config_file: config_file_abs },
        Err(_) => {
            info!("Unable to read configuration at {}. Using default values.", config_file);
            Parms { config_file: Default::default(), config: Config::new() }
        }
    };

    if let Some(variant) = args.variant {
        parms.config.variant = variant;
    }
    Ok(parms)
}

// ---------------------------------------------------------------------------
// parse_config:
// ---------------------------------------------------------------------------
fn parse_config(contents: &str, config_file: &str) -> Result<Config> {
    match toml::from_str(contents) {
        Ok(c)  => Ok(c),
        Err(e) => {
            let msg = format!("{}\n   {}", Errors::TOMLParseError(config_file.to_string()), e);
            error!("{}", msg);
            Err(anyhow!(msg))
        }
    }
}

// ***************************************************************************
//                             Config Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_runtime_context:
// ---------------------------------------------------------------------------
pub fn init_runtime_context(greeting_args: GreetingArgs, greeting_dirs: GreetingDirs) -> Result<RuntimeCtx> {
    let parms = get_parms(&greeting_args, &greeting_dirs)?;
    Ok(RuntimeCtx {parms, greeting_args, greeting_dirs})
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;

    fn test_dirs(root: &str) -> GreetingDirs {
        GreetingDirs {
            root_dir: root.to_string(),
            config_dir: root.to_string() + CONFIG_DIR,
            logs_dir: root.to_string() + LOGS_DIR,
            certs_dir: root.to_string() + CERTS_DIR,
        }
    }

    fn no_args() -> GreetingArgs {
        GreetingArgs { root_dir: None, create_dirs_only: false, variant: None }
    }

    #[test]
    fn default_config() {
        let config = Config::new();
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.http_addr, DEFAULT_HTTP_ADDR);
        assert_eq!(config.variant, GreetingVariant::ArgoCd);
        assert!(config.tls.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = parse_config("http_port = 8080\nvariant = \"pull_request\"\n", "test.toml").unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.title, "Greeting Server");
        assert_eq!(config.variant, GreetingVariant::PullRequest);
    }

    #[test]
    fn tls_section_parses() {
        let toml = "[tls]\ncert_file = \"cert.pem\"\nkey_file = \"/etc/greeting/key.pem\"\n";
        let config = parse_config(toml, "test.toml").unwrap();
        let tls = config.tls.unwrap();
        assert_eq!(tls.cert_path("/srv/certs"), "/srv/certs/cert.pem");
        assert_eq!(tls.key_path("/srv/certs"), "/etc/greeting/key.pem");
    }

    #[test]
    fn server_url_scheme_follows_tls() {
        let mut config = Config::new();
        assert_eq!(config.server_url(), "http://localhost:3000");

        config.tls = Some(TlsConfig { cert_file: "cert.pem".to_string(), key_file: "key.pem".to_string() });
        assert_eq!(config.server_url(), "https://localhost:3000");

        config.http_addr = "greeting.example.org".to_string();
        config.http_port = 8443;
        assert_eq!(config.server_url(), "https://greeting.example.org:8443");
    }

    #[test]
    fn unknown_variant_is_rejected() {
        assert!(parse_config("variant = \"jenkins\"\n", "test.toml").is_err());
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(parse_config("http_port = \"not a port\"\n", "test.toml").is_err());
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let dirs = test_dirs("/nonexistent/greeting-root");
        let parms = get_parms(&no_args(), &dirs).unwrap();
        assert!(parms.config_file.is_empty());
        assert_eq!(parms.config.variant, GreetingVariant::ArgoCd);
    }

    #[test]
    fn command_line_variant_overrides_config() {
        let dirs = test_dirs("/nonexistent/greeting-root");
        let args = GreetingArgs { variant: Some(GreetingVariant::PullRequest), ..no_args() };
        let ctx = init_runtime_context(args, dirs).unwrap();
        assert_eq!(ctx.parms.config.variant, GreetingVariant::PullRequest);
    }

    #[test]
    fn relative_data_dir_is_rejected() {
        let mistrust = get_mistrust().unwrap();
        assert!(check_greeting_dir("relative/greeting", "root directory", &mistrust).is_err());
    }

    #[test]
    fn file_is_not_a_data_dir() {
        let mistrust = get_mistrust().unwrap();
        let file = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
        let err = check_greeting_dir(file, "config directory", &mistrust).unwrap_err();
        assert!(err.to_string().contains("must be a directory"));
    }

    #[test]
    fn command_line_arguments_parse() {
        let args = GreetingArgs::from_iter(["greeting_server", "--root-dir", "/tmp/g", "--variant", "pull_request"]);
        assert_eq!(args.root_dir.as_deref(), Some("/tmp/g"));
        assert_eq!(args.variant, Some(GreetingVariant::PullRequest));
        assert!(!args.create_dirs_only);
    }
}

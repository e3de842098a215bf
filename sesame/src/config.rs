use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use image::Rgba;

use crate::commands::parse_hex_color;

pub const DEFAULT_PORT: u16 = 8052;
pub const DEFAULT_SKYBOX_SIZE: u32 = 6000;
pub const DEFAULT_SKYBOX_COLOR: Rgba<u8> = Rgba([128, 128, 128, 255]);
pub const DEFAULT_MAX_SKYBOX_SIZE: u32 = 16384;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_TICK_MS: u64 = 16;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 64;

/// sesame.kdl, as written by the user:
///
/// ```kdl
/// listen "0.0.0.0"
/// port 8052
/// skybox-size 6000
/// skybox-color "#808080FF"
/// snapshot "~/.cache/sesame/skybox.png"
/// ```
#[derive(Clone, Debug, knuffel::Decode)]
pub struct ConfigFile {
    #[knuffel(child, unwrap(argument), default = "0.0.0.0".to_string())]
    pub listen: String,
    #[knuffel(child, unwrap(argument), default = DEFAULT_PORT)]
    pub port: u16,
    #[knuffel(child, unwrap(argument), default = DEFAULT_SKYBOX_SIZE)]
    pub skybox_size: u32,
    #[knuffel(child, unwrap(argument), default = "#808080FF".to_string())]
    pub skybox_color: String,
    #[knuffel(child, unwrap(argument), default = DEFAULT_MAX_SKYBOX_SIZE)]
    pub max_skybox_size: u32,
    // 0 disables the timeout
    #[knuffel(child, unwrap(argument), default = DEFAULT_READ_TIMEOUT_MS)]
    pub read_timeout_ms: u64,
    #[knuffel(child, unwrap(argument), default = DEFAULT_MAX_PAYLOAD_BYTES)]
    pub max_payload_bytes: u64,
    #[knuffel(child, unwrap(argument), default = DEFAULT_TICK_MS)]
    pub tick_ms: u64,
    #[knuffel(child, unwrap(argument), default = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,
    #[knuffel(child, unwrap(argument))]
    pub snapshot: Option<String>,
}

/// Resolved daemon settings.
#[derive(Clone, Debug, PartialEq)]
pub struct DaemonConfig {
    pub listen: IpAddr,
    pub port: u16,
    pub skybox_size: u32,
    pub skybox_color: Rgba<u8>,
    pub max_skybox_size: u32,
    pub read_timeout: Option<Duration>,
    pub max_payload_bytes: u64,
    pub tick: Duration,
    pub max_connections: usize,
    pub snapshot: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> DaemonConfig {
        DaemonConfig {
            listen: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            skybox_size: DEFAULT_SKYBOX_SIZE,
            skybox_color: DEFAULT_SKYBOX_COLOR,
            max_skybox_size: DEFAULT_MAX_SKYBOX_SIZE,
            read_timeout: Some(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS)),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            max_connections: DEFAULT_MAX_CONNECTIONS as usize,
            snapshot: None,
        }
    }
}

impl DaemonConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen, self.port)
    }
}

impl TryFrom<ConfigFile> for DaemonConfig {
    type Error = miette::Report;

    fn try_from(file: ConfigFile) -> miette::Result<DaemonConfig> {
        let listen = file
            .listen
            .parse::<IpAddr>()
            .map_err(|e| miette::miette!("listen {:?} is not an ip address: {e}", file.listen))?;
        let skybox_color = parse_hex_color(&file.skybox_color).map_err(|e| miette::miette!("skybox-color: {e}"))?;
        if file.max_skybox_size == 0 {
            return Err(miette::miette!("max-skybox-size must be positive"));
        }
        if file.skybox_size == 0 || file.skybox_size > file.max_skybox_size {
            return Err(miette::miette!(
                "skybox-size must be between 1 and {} (got {})",
                file.max_skybox_size,
                file.skybox_size
            ));
        }
        if file.tick_ms == 0 {
            return Err(miette::miette!("tick-ms must be positive"));
        }
        if file.max_connections == 0 {
            return Err(miette::miette!("max-connections must be positive"));
        }
        let snapshot = match file.snapshot {
            Some(path) => Some(PathBuf::from(expand(&path)?)),
            None => None,
        };

        Ok(DaemonConfig {
            listen,
            port: file.port,
            skybox_size: file.skybox_size,
            skybox_color,
            max_skybox_size: file.max_skybox_size,
            read_timeout: (file.read_timeout_ms > 0).then(|| Duration::from_millis(file.read_timeout_ms)),
            max_payload_bytes: file.max_payload_bytes,
            tick: Duration::from_millis(file.tick_ms),
            max_connections: file.max_connections as usize,
            snapshot,
        })
    }
}

fn expand(path: &str) -> miette::Result<String> {
    shellexpand::full(path)
        .map(|s| s.into_owned())
        .map_err(|e| miette::miette!("could not expand {path:?}: {e}"))
}

pub fn get_config_dir() -> miette::Result<PathBuf> {
    let base_dir = match env::var("XDG_CONFIG_HOME") {
        Ok(s) => expand(&s)?,
        Err(_) => expand("~/.config")?,
    };
    Ok(Path::new(&base_dir).join("sesame"))
}

pub fn parse_config(name: &str, text: &str) -> miette::Result<DaemonConfig> {
    let file = knuffel::parse::<ConfigFile>(name, text)?;
    DaemonConfig::try_from(file)
}

/// Loads `path`, or `$XDG_CONFIG_HOME/sesame/sesame.kdl` when no path is given.
/// Only the implicit location is allowed to be missing; that yields the defaults.
pub fn load_config(path: Option<&Path>) -> miette::Result<DaemonConfig> {
    let (config_path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (get_config_dir()?.join("sesame.kdl"), false),
    };
    if !required && !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "no config file, using defaults");
        return Ok(DaemonConfig::default());
    }
    let contents = fs::read_to_string(&config_path)
        .map_err(|e| miette::miette!("could not read {}: {e}", config_path.display()))?;
    parse_config(&config_path.to_string_lossy(), &contents)
}

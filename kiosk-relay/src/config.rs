//! Relay settings.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `KIOSK_RELAY_*` environment variables, then command-line flags.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::{cli::ServeArgs, hub::HubConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub listen: SocketAddr,
    pub ws_listen: SocketAddr,
    pub input_device: Option<PathBuf>,
    pub knob_debounce_ms: u64,
    pub vote_confirmation_ms: u64,
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3001)),
            ws_listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            input_device: None,
            knob_debounce_ms: 150,
            vote_confirmation_ms: 2000,
            event_buffer: 128,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    listen: Option<SocketAddr>,
    ws_listen: Option<SocketAddr>,
    input_device: Option<PathBuf>,
    knob_debounce_ms: Option<u64>,
    vote_confirmation_ms: Option<u64>,
    event_buffer: Option<usize>,
}

impl Settings {
    /// Resolves settings from the process environment.
    pub async fn load(args: &ServeArgs) -> Result<Self> {
        Self::resolve(args, |key| std::env::var(key).ok()).await
    }

    /// Resolves settings with an explicit environment lookup.
    pub async fn resolve<F>(args: &ServeArgs, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();
        if let Some(path) = &args.config {
            settings.apply_file(path).await?;
        }
        settings.apply_env(&env)?;
        settings.apply_args(args);
        Ok(settings)
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            knob_debounce: Duration::from_millis(self.knob_debounce_ms),
            vote_confirmation: Duration::from_millis(self.vote_confirmation_ms),
            event_buffer: self.event_buffer,
        }
    }

    async fn apply_file(&mut self, path: &Path) -> Result<()> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), "loaded relay config");

        if let Some(v) = file.listen {
            self.listen = v;
        }
        if let Some(v) = file.ws_listen {
            self.ws_listen = v;
        }
        if let Some(v) = file.input_device {
            self.input_device = Some(v);
        }
        if let Some(v) = file.knob_debounce_ms {
            self.knob_debounce_ms = v;
        }
        if let Some(v) = file.vote_confirmation_ms {
            self.vote_confirmation_ms = v;
        }
        if let Some(v) = file.event_buffer {
            self.event_buffer = v;
        }
        Ok(())
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env_value(env, "KIOSK_RELAY_LISTEN")? {
            self.listen = v;
        }
        if let Some(v) = env_value(env, "KIOSK_RELAY_WS_LISTEN")? {
            self.ws_listen = v;
        }
        if let Some(v) = env_value(env, "KIOSK_RELAY_INPUT_DEVICE")? {
            self.input_device = Some(v);
        }
        if let Some(v) = env_value(env, "KIOSK_RELAY_KNOB_DEBOUNCE_MS")? {
            self.knob_debounce_ms = v;
        }
        if let Some(v) = env_value(env, "KIOSK_RELAY_VOTE_CONFIRMATION_MS")? {
            self.vote_confirmation_ms = v;
        }
        if let Some(v) = env_value(env, "KIOSK_RELAY_EVENT_BUFFER")? {
            self.event_buffer = v;
        }
        Ok(())
    }

    fn apply_args(&mut self, args: &ServeArgs) {
        if let Some(v) = args.listen {
            self.listen = v;
        }
        if let Some(v) = args.ws_listen {
            self.ws_listen = v;
        }
        if let Some(v) = &args.input_device {
            self.input_device = Some(v.clone());
        }
    }
}

fn env_value<T, F>(env: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: '{raw}'"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[tokio::test]
    async fn defaults_match_the_installation() {
        let settings = Settings::resolve(&ServeArgs::default(), no_env)
            .await
            .unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.ws_listen.port(), 3000);
        assert_eq!(settings.listen.port(), 3001);

        let hub = settings.hub_config();
        assert_eq!(hub.knob_debounce, Duration::from_millis(150));
        assert_eq!(hub.vote_confirmation, Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn layers_apply_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
listen = "127.0.0.1:4001"
ws_listen = "127.0.0.1:4000"
knob_debounce_ms = 200
input_device = "/dev/ttyUSB0"
"#
        )
        .unwrap();

        let env: HashMap<&str, &str> = HashMap::from([
            ("KIOSK_RELAY_KNOB_DEBOUNCE_MS", "250"),
            ("KIOSK_RELAY_WS_LISTEN", "127.0.0.1:5000"),
        ]);
        let args = ServeArgs {
            config: Some(file.path().to_path_buf()),
            ws_listen: Some("127.0.0.1:6000".parse().unwrap()),
            ..ServeArgs::default()
        };

        let settings = Settings::resolve(&args, |key| env.get(key).map(|v| v.to_string()))
            .await
            .unwrap();
        assert_eq!(settings.listen, "127.0.0.1:4001".parse().unwrap());
        assert_eq!(settings.ws_listen, "127.0.0.1:6000".parse().unwrap());
        assert_eq!(settings.knob_debounce_ms, 250);
        assert_eq!(settings.vote_confirmation_ms, 2000);
        assert_eq!(settings.input_device, Some(PathBuf::from("/dev/ttyUSB0")));
    }

    #[tokio::test]
    async fn invalid_env_value_is_reported() {
        let err = Settings::resolve(&ServeArgs::default(), |key| {
            (key == "KIOSK_RELAY_EVENT_BUFFER").then(|| "lots".to_string())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("KIOSK_RELAY_EVENT_BUFFER"));
    }

    #[tokio::test]
    async fn unknown_file_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 3000").unwrap();
        let args = ServeArgs {
            config: Some(file.path().to_path_buf()),
            ..ServeArgs::default()
        };
        assert!(Settings::resolve(&args, no_env).await.is_err());
    }

    #[tokio::test]
    async fn missing_config_file_is_an_error() {
        let args = ServeArgs {
            config: Some(PathBuf::from("/definitely/not/here.toml")),
            ..ServeArgs::default()
        };
        let err = Settings::resolve(&args, no_env).await.unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}

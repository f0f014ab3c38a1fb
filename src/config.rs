use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::Error;
use crate::twilio::TwilioConfig;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub twilio: TwilioConfig,
    /// Known recipients by name, e.g. "my-phone" => "+14071111111".
    #[serde(default)]
    pub phone_numbers: BTreeMap<String, String>,
    /// Name of the recipient used when none is given.
    #[serde(default)]
    pub default: Option<String>,
    /// Port of the temporary web server that the tunnel exposes.
    #[serde(default)]
    pub port: Option<u16>,
    /// Name of or path to the ngrok executable.
    #[serde(default)]
    pub ngrok_binary: Option<String>,
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("send-to-phone").join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("failed to read {}: {err}", path.display())))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Turn a recipient name, a phone number or nothing (the default) into a phone number.
    pub fn resolve_recipient(&self, to: Option<&str>) -> Result<String, Error> {
        let name = match to {
            Some(number) if number.starts_with('+') => return Ok(number.to_string()),
            Some(name) => name,
            None => self
                .default
                .as_deref()
                .ok_or_else(|| Error::Config("no recipient given and no default configured".into()))?,
        };

        self.phone_numbers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownRecipient(name.to_string()))
    }
}

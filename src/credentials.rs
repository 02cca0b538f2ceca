//! Where login answers come from.

use crate::error::Result;
use crate::vdf;
use dialoguer::{Input, Password};
use std::fs;
use std::path::{Path, PathBuf};

/// Answers to the prompts steamcmd raises during `login`.
pub trait Credentials {
    fn username(&mut self) -> Result<String>;
    fn password(&mut self) -> Result<String>;
    /// Code mailed by Steam Guard.
    fn guard_code(&mut self) -> Result<String>;
    /// Code from the mobile authenticator.
    fn two_factor_code(&mut self) -> Result<String>;
}

/// Prompts on the controlling terminal. The password is never echoed.
pub struct TerminalCredentials {
    username: Option<String>,
    steam_dir: PathBuf,
}

impl TerminalCredentials {
    /// `username` wins over the account remembered by the local Steam client.
    pub fn new(username: Option<String>, steam_dir: impl Into<PathBuf>) -> Self {
        Self {
            username,
            steam_dir: steam_dir.into(),
        }
    }
}

impl Credentials for TerminalCredentials {
    fn username(&mut self) -> Result<String> {
        if let Some(name) = &self.username {
            return Ok(name.clone());
        }
        if let Some(name) = remembered_account(&self.steam_dir)? {
            tracing::debug!(account = %name, "using account from Steam config");
            self.username = Some(name.clone());
            return Ok(name);
        }
        let name: String = Input::new().with_prompt("Username").interact_text()?;
        self.username = Some(name.clone());
        Ok(name)
    }

    fn password(&mut self) -> Result<String> {
        Ok(Password::new().with_prompt("Password").interact()?)
    }

    fn guard_code(&mut self) -> Result<String> {
        Ok(Input::<String>::new().with_prompt("Email code").interact_text()?)
    }

    fn two_factor_code(&mut self) -> Result<String> {
        Ok(Input::<String>::new().with_prompt("Two-factor code").interact_text()?)
    }
}

/// Fixed answers, for scripted use.
#[derive(Debug, Clone, Default)]
pub struct FixedCredentials {
    pub username: String,
    pub password: String,
    pub guard_code: String,
    pub two_factor_code: String,
}

impl Credentials for FixedCredentials {
    fn username(&mut self) -> Result<String> {
        Ok(self.username.clone())
    }

    fn password(&mut self) -> Result<String> {
        Ok(self.password.clone())
    }

    fn guard_code(&mut self) -> Result<String> {
        Ok(self.guard_code.clone())
    }

    fn two_factor_code(&mut self) -> Result<String> {
        Ok(self.two_factor_code.clone())
    }
}

/// First account the local Steam client remembers, from `config/config.vdf`.
pub fn remembered_account(steam_dir: &Path) -> Result<Option<String>> {
    let candidates = [
        steam_dir.join("config").join("config.vdf"),
        steam_dir.join("steam").join("config").join("config.vdf"),
    ];
    let Some(path) = candidates.iter().find(|p| p.is_file()) else {
        return Ok(None);
    };

    let record = vdf::decode(&fs::read(path)?)?;
    let accounts = vdf::lookup(
        &record,
        &["InstallConfigStore", "Software", "Valve", "Steam", "Accounts"],
    );
    Ok(accounts
        .and_then(|a| a.as_object())
        .and_then(|a| a.keys().next().cloned()))
}

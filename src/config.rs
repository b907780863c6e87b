//! External interfaces (spec.md §6): the YAML application configuration
//! (banks/accounts/cards/notifications/scheduler), the categories tree
//! file, and the metadata (last-updated) file. Grounded in the teacher's
//! `ImporterConfig::path`/`load` pattern and in
//! `original_source/src/bank/{io,runtime}.py`'s `load_config`/`decode_*`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::error::{BankingError, Result};
use crate::model::{Category, CategoryTree};

/// `banking.yaml`: the top-level application configuration (spec.md §6).
#[derive(Debug, Deserialize, PartialEq)]
pub struct AppConfig {
    pub banks: Vec<BankConfig>,
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub cards: Vec<CardConfig>,
    pub notifications: NotificationsConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct BankConfig {
    pub id: String,
    pub name: String,
    pub credentials: Credentials,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    BankAccount,
    LocalAccount,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct AccountConfig {
    #[serde(rename = "type")]
    pub kind: AccountKind,
    pub id: String,
    pub name: String,
    /// Absent for `local_account`.
    pub bank_id: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct CardConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    /// May contain `*` wildcards (spec.md §4, "Supplemented features").
    pub number: String,
    pub owner: String,
    pub active: bool,
    pub account: String,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct NotificationsConfig {
    pub telegram_api_key: String,
    pub telegram_chat_id: String,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    pub scrapping_hours: Vec<u32>,
    pub update_timeout_seconds: u64,
}

impl AppConfig {
    /// Resolves the configuration file path: `BANKING_CONFIG_FILE` if set,
    /// else `~/.config/banking-reconciler/config.yaml`.
    pub fn path() -> Result<PathBuf> {
        match std::env::var("BANKING_CONFIG_FILE") {
            Ok(env) => PathBuf::from_str(&env).map_err(|_| BankingError::ConfigPath),
            Err(_) => match my_home() {
                Ok(Some(home)) => {
                    let mut path = home.into_os_string();
                    path.push("/.config/banking-reconciler/config.yaml");
                    Ok(path.into())
                }
                _ => Err(BankingError::ConfigPath),
            },
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|_| BankingError::ConfigRead(path.to_owned()))?;
        serde_yaml::from_str(&raw).map_err(|e| BankingError::ConfigParse(e.to_string()))
    }

    /// Finds the configured card whose (possibly masked) number matches
    /// `number`, per the `*`-wildcard rule (spec.md §4, supplemented
    /// feature).
    pub fn find_card_by_number<'a>(&'a self, number: &str) -> Option<&'a CardConfig> {
        self.cards.iter().find(|c| mask_matches(&c.number, number))
    }

    pub fn find_account_by_id<'a>(&'a self, id: &str) -> Option<&'a AccountConfig> {
        self.accounts.iter().find(|a| a.id == id)
    }

    pub fn find_bank_by_id<'a>(&'a self, id: &str) -> Option<&'a BankConfig> {
        self.banks.iter().find(|b| b.id == id)
    }
}

/// `*` in `masked` matches any single digit of `actual`; every other
/// character must match exactly. Lengths must be equal.
pub fn mask_matches(masked: &str, actual: &str) -> bool {
    if masked.len() != actual.len() {
        return false;
    }
    masked
        .chars()
        .zip(actual.chars())
        .all(|(m, a)| m == '*' || m == a)
}

/// `categories.yaml`: a flat list of `{id, name, parent_id}` nodes.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CategoryRecord {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

pub fn load_categories(path: &std::path::Path) -> Result<CategoryTree> {
    let raw = std::fs::read_to_string(path)
        .map_err(|_| BankingError::ConfigRead(path.to_owned()))?;
    let records: Vec<CategoryRecord> =
        serde_yaml::from_str(&raw).map_err(|e| BankingError::ConfigParse(e.to_string()))?;
    let categories = records
        .into_iter()
        .map(|r| Category {
            id: r.id,
            name: r.name,
            parent_id: r.parent_id,
        })
        .collect();
    CategoryTree::new(categories).map_err(BankingError::CategoryCycle)
}

pub fn categories_path() -> Result<PathBuf> {
    env_or_home_fallback("BANKING_CATEGORIES_FILE", "categories.yaml")
}

/// `metadata.yaml`: last-updated timestamps keyed
/// `{bank_id}.{account|card}.{identifier}.updated` (spec.md §5/§6).
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct Metadata {
    #[serde(flatten)]
    pub updated: HashMap<String, DateTime<Utc>>,
}

impl Metadata {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|_| BankingError::ConfigRead(path.to_owned()))?;
        serde_yaml::from_str(&raw).map_err(|e| BankingError::ConfigParse(e.to_string()))
    }

    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let raw = serde_yaml::to_string(self).map_err(|e| BankingError::ConfigParse(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn key(bank_id: &str, kind: &str, identifier: &str) -> String {
        format!("{bank_id}.{kind}.{identifier}.updated")
    }

    pub fn last_updated(&self, bank_id: &str, kind: &str, identifier: &str) -> Option<DateTime<Utc>> {
        self.updated.get(&Self::key(bank_id, kind, identifier)).copied()
    }

    pub fn set_updated(&mut self, bank_id: &str, kind: &str, identifier: &str, at: DateTime<Utc>) {
        self.updated.insert(Self::key(bank_id, kind, identifier), at);
    }
}

pub fn metadata_path() -> Result<PathBuf> {
    env_or_home_fallback("BANKING_METADATA_FILE", "metadata.yaml")
}

pub fn database_folder() -> Result<PathBuf> {
    match std::env::var("BANKING_DATABASE_FOLDER") {
        Ok(env) => PathBuf::from_str(&env).map_err(|_| BankingError::ConfigPath),
        Err(_) => match my_home() {
            Ok(Some(home)) => {
                let mut path = home.into_os_string();
                path.push("/.local/share/banking-reconciler");
                Ok(path.into())
            }
            _ => Err(BankingError::ConfigPath),
        },
    }
}

fn env_or_home_fallback(env_var: &str, file_name: &str) -> Result<PathBuf> {
    match std::env::var(env_var) {
        Ok(env) => PathBuf::from_str(&env).map_err(|_| BankingError::ConfigPath),
        Err(_) => match my_home() {
            Ok(Some(home)) => {
                let mut path = home.into_os_string();
                path.push("/.config/banking-reconciler/");
                path.push(file_name);
                Ok(path.into())
            }
            _ => Err(BankingError::ConfigPath),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
banks:
  - id: bbva
    name: BBVA
    credentials:
      username: user
      password: pass
accounts:
  - type: bank_account
    id: acc-1
    name: Main account
    bank_id: bbva
  - type: local_account
    id: local-1
    name: Cash
cards:
  - type: credit
    name: Visa
    number: "1234********"
    owner: user
    active: true
    account: acc-1
notifications:
  telegram_api_key: key
  telegram_chat_id: chat
scheduler:
  scrapping_hours: [6, 18]
  update_timeout_seconds: 300
"#;

    #[test]
    fn parses_a_complete_configuration() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).expect("valid config");
        assert_eq!(config.banks.len(), 1);
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.cards.len(), 1);
        assert_eq!(config.accounts[1].kind, AccountKind::LocalAccount);
        assert_eq!(config.accounts[1].bank_id, None);
        assert_eq!(config.scheduler.update_timeout_seconds, 300);
    }

    #[test]
    fn mask_matches_wildcards_any_digit() {
        assert!(mask_matches("1234********", "123456789012"));
        assert!(!mask_matches("1234********", "999956789012"));
        assert!(!mask_matches("1234", "12345"));
    }

    #[test]
    fn find_card_by_number_resolves_through_mask() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).expect("valid config");
        let card = config.find_card_by_number("123456789012").expect("card found");
        assert_eq!(card.name, "Visa");
    }

    #[test]
    fn category_tree_rejects_cycles() {
        let categories = vec![
            Category { id: "a".into(), name: "A".into(), parent_id: Some("b".into()) },
            Category { id: "b".into(), name: "B".into(), parent_id: Some("a".into()) },
        ];
        assert!(CategoryTree::new(categories).is_err());
    }

    #[test]
    fn category_tree_walks_parent_chain() {
        let categories = vec![
            Category { id: "root".into(), name: "Root".into(), parent_id: None },
            Category { id: "child".into(), name: "Child".into(), parent_id: Some("root".into()) },
        ];
        let tree = CategoryTree::new(categories).expect("no cycle");
        let path = tree.full_path("child").expect("resolvable");
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].id, "child");
        assert_eq!(path[1].id, "root");
    }

    #[test]
    fn metadata_round_trips_through_yaml() {
        let mut metadata = Metadata::default();
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        metadata.set_updated("bbva", "account", "acc-1", now);

        let raw = serde_yaml::to_string(&metadata).unwrap();
        let reloaded: Metadata = serde_yaml::from_str(&raw).unwrap();
        assert_eq!(reloaded.last_updated("bbva", "account", "acc-1"), Some(now));
    }
}

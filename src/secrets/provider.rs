//! Secret providers
//!
//! A provider turns a vault configuration into a map of target variable
//! names to secret values. Providers are looked up by the vault kind named
//! in the manifest.

use crate::error::{SecretError, SecretResult};
use crate::manifest::VaultConfig;
use crate::runner::TaskContext;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::Path;

/// Supplies secrets for one vault kind
pub trait SecretProvider {
    /// Vault kind handled, as written under `vaults`
    fn kind(&self) -> &str;

    /// Fetch every secret listed in `vault`
    fn get_secrets(
        &self,
        vault: &VaultConfig,
        ctx: &TaskContext,
    ) -> SecretResult<BTreeMap<String, String>>;
}

/// Reads secrets from the process environment. Remote names are variable names.
pub struct EnvProvider;

impl SecretProvider for EnvProvider {
    fn kind(&self) -> &str {
        "env"
    }

    fn get_secrets(
        &self,
        vault: &VaultConfig,
        _ctx: &TaskContext,
    ) -> SecretResult<BTreeMap<String, String>> {
        vault
            .secrets
            .iter()
            .map(|(target, remote)| {
                env::var(remote)
                    .map(|value| (target.clone(), value))
                    .map_err(|_| SecretError::Fetch {
                        provider: self.kind().to_string(),
                        vault: vault.vault.clone(),
                        reason: format!("variable '{}' is not set", remote),
                    })
            })
            .collect()
    }
}

/// Reads secrets from a dotenv file. The vault identifier is the file path,
/// relative to the task's working directory.
pub struct DotenvProvider;

impl SecretProvider for DotenvProvider {
    fn kind(&self) -> &str {
        "dotenv"
    }

    fn get_secrets(
        &self,
        vault: &VaultConfig,
        ctx: &TaskContext,
    ) -> SecretResult<BTreeMap<String, String>> {
        let fetch_error = |reason: String| SecretError::Fetch {
            provider: self.kind().to_string(),
            vault: vault.vault.clone(),
            reason,
        };

        let path = ctx.working_dir.join(Path::new(&vault.vault));
        let entries = dotenvy::from_path_iter(&path).map_err(|e| fetch_error(e.to_string()))?;

        let mut file = HashMap::new();
        for entry in entries {
            let (key, value) = entry.map_err(|e| fetch_error(e.to_string()))?;
            file.insert(key, value);
        }

        vault
            .secrets
            .iter()
            .map(|(target, remote)| match file.get(remote) {
                Some(value) => Ok((target.clone(), value.clone())),
                None => Err(fetch_error(format!("secret '{}' is not defined", remote))),
            })
            .collect()
    }
}

/// Maps vault kinds to providers
pub struct SecretRegistry {
    providers: HashMap<String, Box<dyn SecretProvider>>,
}

impl SecretRegistry {
    /// An empty registry
    pub fn new() -> Self {
        SecretRegistry {
            providers: HashMap::new(),
        }
    }

    /// A registry with the `env` and `dotenv` providers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(EnvProvider));
        registry.register(Box::new(DotenvProvider));
        registry
    }

    /// Register a provider, replacing any provider of the same kind
    pub fn register(&mut self, provider: Box<dyn SecretProvider>) {
        self.providers.insert(provider.kind().to_string(), provider);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.providers.contains_key(kind)
    }

    /// Fetch every vault in declaration order. Later vaults win on collisions.
    ///
    /// Any failure aborts the whole fetch.
    pub fn fetch_all(
        &self,
        vaults: &[VaultConfig],
        ctx: &TaskContext,
    ) -> SecretResult<BTreeMap<String, String>> {
        let mut secrets = BTreeMap::new();
        for vault in vaults {
            let provider = self
                .providers
                .get(&vault.provider)
                .ok_or_else(|| SecretError::UnknownProvider(vault.provider.clone()))?;

            let fetched = provider.get_secrets(vault, ctx)?;
            tracing::info!(
                provider = %vault.provider,
                vault = %vault.vault,
                count = fetched.len(),
                "fetched secrets"
            );
            secrets.extend(fetched);
        }
        Ok(secrets)
    }
}

impl Default for SecretRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn vault(provider: &str, id: &str, secrets: &[(&str, &str)]) -> VaultConfig {
        VaultConfig {
            provider: provider.to_string(),
            vault: id.to_string(),
            secrets: secrets
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    struct Fixed(&'static str, &'static [(&'static str, &'static str)]);

    impl SecretProvider for Fixed {
        fn kind(&self) -> &str {
            self.0
        }

        fn get_secrets(
            &self,
            _vault: &VaultConfig,
            _ctx: &TaskContext,
        ) -> SecretResult<BTreeMap<String, String>> {
            Ok(self
                .1
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect())
        }
    }

    #[test]
    fn test_later_vault_wins() {
        let mut registry = SecretRegistry::new();
        registry.register(Box::new(Fixed("first", &[("TOKEN", "one"), ("A", "a")])));
        registry.register(Box::new(Fixed("second", &[("TOKEN", "two")])));

        let ctx = TaskContext::new("deploy");
        let secrets = registry
            .fetch_all(&[vault("first", "v1", &[]), vault("second", "v2", &[])], &ctx)
            .unwrap();
        assert_eq!(secrets["TOKEN"], "two");
        assert_eq!(secrets["A"], "a");

        let secrets = registry
            .fetch_all(&[vault("second", "v2", &[]), vault("first", "v1", &[])], &ctx)
            .unwrap();
        assert_eq!(secrets["TOKEN"], "one");
    }

    #[test]
    fn test_unknown_provider() {
        let registry = SecretRegistry::with_builtins();
        let result = registry.fetch_all(
            &[vault("azure", "kv", &[("X", "y")])],
            &TaskContext::new("t"),
        );
        assert!(matches!(result, Err(SecretError::UnknownProvider(kind)) if kind == "azure"));
    }

    #[test]
    fn test_dotenv_provider() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("secrets.env"),
            "REMOTE_TOKEN=abc123\nOTHER=ignored\n",
        )
        .unwrap();

        let ctx = TaskContext::new("t").with_working_dir(temp_dir.path().to_path_buf());
        let secrets = DotenvProvider
            .get_secrets(&vault("dotenv", "secrets.env", &[("TOKEN", "REMOTE_TOKEN")]), &ctx)
            .unwrap();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets["TOKEN"], "abc123");

        let result = DotenvProvider
            .get_secrets(&vault("dotenv", "secrets.env", &[("X", "MISSING")]), &ctx);
        assert!(matches!(result, Err(SecretError::Fetch { .. })));
    }

    #[test]
    fn test_env_provider_missing_variable() {
        let result = EnvProvider.get_secrets(
            &vault("env", "process", &[("X", "RUNBOOK_TEST_SURELY_UNSET_VARIABLE")]),
            &TaskContext::new("t"),
        );
        assert!(matches!(result, Err(SecretError::Fetch { .. })));
    }
}

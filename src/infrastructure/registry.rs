//! App registry: who owns which app and what it looks like
//!
//! [`AppRegistry`] is the seam to the app/team store. [`YamlRegistry`] keeps
//! everything in one YAML document, optionally persisted on every save.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::app::{App, User};
use crate::error::AppError;

#[async_trait]
pub trait AppRegistry: Send + Sync {
    async fn get(&self, app_name: &str) -> Result<App, AppError>;

    async fn has_permission(&self, user: &User, app_name: &str) -> Result<bool, AppError>;

    /// Fetch the app if `user` may operate on it.
    ///
    /// A missing app is `NotFound`; an app of another team is `PermissionDenied`.
    async fn check_perm_and_get(&self, user: &User, app_name: &str) -> Result<App, AppError> {
        let app = self.get(app_name).await?;
        if !self.has_permission(user, app_name).await? {
            return Err(AppError::PermissionDenied);
        }
        Ok(app)
    }

    async fn save_app(&self, app: &App, last_user: &str) -> Result<(), AppError>;

    async fn team_name(&self, app_name: &str) -> Result<String, AppError>;

    /// Apps visible to `user`
    async fn list(&self, user: &User) -> Result<Vec<App>, AppError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Team {
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub teams: BTreeMap<String, Team>,
    #[serde(default)]
    pub apps: BTreeMap<String, App>,
    /// app name -> email of the last user who changed it
    #[serde(default)]
    pub last_editors: BTreeMap<String, String>,
}

impl RegistryDocument {
    fn is_member(&self, user: &User, team: &str) -> bool {
        self.admins.contains(&user.email)
            || self
                .teams
                .get(team)
                .is_some_and(|t| t.members.contains(&user.email))
    }
}

pub struct YamlRegistry {
    doc: RwLock<RegistryDocument>,
    path: Option<PathBuf>,
}

impl YamlRegistry {
    pub fn new(doc: RegistryDocument) -> Self {
        Self {
            doc: RwLock::new(doc),
            path: None,
        }
    }

    /// Load from `path`; a missing file starts an empty registry persisted there
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let doc = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read registry {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse registry {}", path.display()))?
        } else {
            info!(path = %path.display(), "registry file not found, starting empty");
            RegistryDocument::default()
        };
        Ok(Self {
            doc: RwLock::new(doc),
            path: Some(path.to_path_buf()),
        })
    }

    pub async fn snapshot(&self) -> RegistryDocument {
        self.doc.read().await.clone()
    }

    async fn persist(&self, doc: &RegistryDocument) -> Result<(), AppError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_yaml::to_string(doc)
            .context("Failed to serialize registry")
            .map_err(AppError::Registry)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write registry {}", path.display()))
            .map_err(AppError::Registry)?;
        debug!(path = %path.display(), "registry persisted");
        Ok(())
    }
}

#[async_trait]
impl AppRegistry for YamlRegistry {
    async fn get(&self, app_name: &str) -> Result<App, AppError> {
        self.doc
            .read()
            .await
            .apps
            .get(app_name)
            .cloned()
            .ok_or_else(|| AppError::NotFound {
                name: app_name.to_string(),
            })
    }

    async fn has_permission(&self, user: &User, app_name: &str) -> Result<bool, AppError> {
        let doc = self.doc.read().await;
        let app = doc.apps.get(app_name).ok_or_else(|| AppError::NotFound {
            name: app_name.to_string(),
        })?;
        Ok(doc.is_member(user, &app.team))
    }

    async fn save_app(&self, app: &App, last_user: &str) -> Result<(), AppError> {
        let mut doc = self.doc.write().await;
        doc.apps.insert(app.name.clone(), app.clone());
        doc.last_editors
            .insert(app.name.clone(), last_user.to_string());
        self.persist(&doc).await
    }

    async fn team_name(&self, app_name: &str) -> Result<String, AppError> {
        self.get(app_name).await.map(|app| app.team)
    }

    async fn list(&self, user: &User) -> Result<Vec<App>, AppError> {
        let doc = self.doc.read().await;
        Ok(doc
            .apps
            .values()
            .filter(|app| doc.is_member(user, &app.team))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> RegistryDocument {
        let mut doc = RegistryDocument::default();
        doc.teams.insert(
            "luizalabs".to_string(),
            Team {
                members: vec!["gopher@luizalabs.com".to_string()],
            },
        );
        doc.apps
            .insert("myapp".to_string(), App::new("myapp", "luizalabs"));
        doc.apps
            .insert("secret".to_string(), App::new("secret", "other"));
        doc
    }

    fn member() -> User {
        User::new("gopher", "gopher@luizalabs.com")
    }

    #[tokio::test]
    async fn test_check_perm_and_get() {
        let reg = YamlRegistry::new(doc());
        let app = reg.check_perm_and_get(&member(), "myapp").await.unwrap();
        assert_eq!(app.team, "luizalabs");

        let err = reg.check_perm_and_get(&member(), "secret").await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));

        let err = reg.check_perm_and_get(&member(), "missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn test_admin_sees_everything() {
        let mut d = doc();
        d.admins.push("root@luizalabs.com".to_string());
        let reg = YamlRegistry::new(d);
        let admin = User::new("root", "root@luizalabs.com");
        assert!(tokio_test::block_on(reg.has_permission(&admin, "secret")).unwrap());
        assert_eq!(tokio_test::block_on(reg.list(&admin)).unwrap().len(), 2);
        assert_eq!(tokio_test::block_on(reg.list(&member())).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.yaml");

        let reg = YamlRegistry::load(&path).unwrap();
        let app = App::new("fresh", "luizalabs").with_env_var("A", "1");
        reg.save_app(&app, "gopher@luizalabs.com").await.unwrap();

        let reloaded = YamlRegistry::load(&path).unwrap();
        assert_eq!(reloaded.get("fresh").await.unwrap(), app);
        assert_eq!(reloaded.team_name("fresh").await.unwrap(), "luizalabs");
        assert_eq!(
            reloaded.snapshot().await.last_editors["fresh"],
            "gopher@luizalabs.com"
        );
    }
}

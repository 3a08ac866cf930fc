use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};

const MIGRATION_0001: &str = include_str!("../migrations/0001_vault_club.sql");

#[derive(Clone)]
pub struct VaultDb {
    client: Arc<Mutex<Client>>,
}

impl VaultDb {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .context("connect to postgres")?;

        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::error!(reason = %error, "vault postgres connection error");
            }
        });

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
        })
    }

    pub fn client(&self) -> Arc<Mutex<Client>> {
        self.client.clone()
    }

    /// Applies the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> Result<()> {
        let client = self.client.lock().await;
        client
            .batch_execute(MIGRATION_0001)
            .await
            .context("apply migration 0001_vault_club")?;
        tracing::info!(migration = "0001_vault_club", "vault schema migrated");
        Ok(())
    }
}

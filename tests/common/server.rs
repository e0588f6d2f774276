//! In-process test bouncer.
//!
//! Builds a bouncer on an ephemeral port with its account database in a
//! temporary directory.

use slbnc::account::{Account, AccountStore, ServerEntry};
use slbnc::config::Config;
use slbnc::network::Gateway;
use slbnc::Bouncer;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestBouncer {
    pub bouncer: Arc<Bouncer>,
    address: String,
    _data_dir: TempDir,
}

impl TestBouncer {
    /// Start a bouncer with the default test configuration.
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(|_| {}).await
    }

    /// Start a bouncer, letting `configure` adjust the test configuration.
    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> anyhow::Result<Self> {
        let data_dir = tempfile::tempdir()?;
        let db_path = data_dir.path().join("accounts.redb");
        let mut config = Config::parse(&format!(
            r#"
[bouncer]
name = "bnc.test"
registration_timeout = 5
max_auth_attempts = 2

[listen]
address = "127.0.0.1:0"

[storage]
path = "{}"

[upstream]
connect_timeout = 2
away_message = "detached"

[upstream.reconnect]
initial_delay = 1
max_delay = 1
max_attempts = 3
"#,
            db_path.display()
        ))?;
        configure(&mut config);

        let store = AccountStore::open(&config.storage.path)?;
        let bouncer = Bouncer::builder(config).store(store).build();
        let gateway = Gateway::bind(Arc::clone(&bouncer)).await?;
        let address = gateway.local_addr()?.to_string();
        tokio::spawn(gateway.run());

        Ok(Self {
            bouncer,
            address,
            _data_dir: data_dir,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Create an account, optionally pointing it at a plaintext upstream.
    pub fn add_account(
        &self,
        name: &str,
        password: &str,
        upstream_port: Option<u16>,
    ) -> anyhow::Result<Arc<Account>> {
        let account = self.bouncer.accounts().create_account(name, Some(password))?;
        if let Some(port) = upstream_port {
            account.add_server(ServerEntry {
                host: "127.0.0.1".to_string(),
                port,
                tls: false,
                password: None,
            });
            self.bouncer.accounts().save_account(&account)?;
        }
        Ok(account)
    }

    /// Connect a client without logging in.
    pub async fn connect(&self) -> anyhow::Result<super::client::TestClient> {
        super::client::TestClient::connect(&self.address).await
    }

    /// Connect a client and log in as `user` (which may name a sub-client).
    pub async fn login(
        &self,
        user: &str,
        password: &str,
        nick: &str,
    ) -> anyhow::Result<super::client::TestClient> {
        let mut client = self.connect().await?;
        client.login(user, password, nick).await?;
        Ok(client)
    }

    pub async fn shutdown(&self, reason: &str) {
        self.bouncer.shutdown(reason).await;
    }
}

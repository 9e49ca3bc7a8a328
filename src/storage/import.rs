//! Bulk import of proxies and accounts from plain-text line formats.
//!
//! Proxies: `address:port[:username:password]` per line.
//! Accounts: `identifier token` per line.
//!
//! Re-importing a known proxy updates its credentials without touching
//! `is_valid`; new entries start invalid and unchecked so the validator
//! decides their fate.

use tracing::{info, warn};

use crate::errors::CoreError;
use crate::models::{Account, ProxyServer};
use crate::storage::Storage;

/// Summary of a bulk import run.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Parse and upsert proxies from line-oriented text.
pub async fn parse_proxies(storage: &dyn Storage, text: &str) -> Result<ImportReport, CoreError> {
    let existing = storage.load_proxies().await?;
    let mut report = ImportReport::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split(&[':', ' '][..]).filter(|p| !p.is_empty());
        let (address, port) = match (parts.next(), parts.next().and_then(|p| p.parse::<u16>().ok())) {
            (Some(addr), Some(port)) => (addr.to_string(), port),
            _ => {
                warn!("Skipping malformed proxy line: {}", line);
                report.skipped += 1;
                continue;
            }
        };
        let username = parts.next().map(str::to_string);
        let password = parts.next().map(str::to_string);

        match existing
            .iter()
            .find(|p| p.address == address && p.port == port)
        {
            Some(known) => {
                if known.username != username || known.password != password {
                    let mut updated = known.clone();
                    updated.username = username;
                    updated.password = password;
                    storage.update_proxy(&updated).await?;
                    info!("Updated proxy credentials for {}", updated.endpoint());
                    report.updated += 1;
                } else {
                    report.skipped += 1;
                }
            }
            None => {
                let mut proxy = ProxyServer::new(address, port);
                proxy.username = username;
                proxy.password = password;
                info!("Added new proxy: {}", proxy.endpoint());
                storage.insert_proxy(proxy).await?;
                report.added += 1;
            }
        }
    }

    Ok(report)
}

/// Parse and upsert accounts from line-oriented text.
pub async fn parse_accounts(storage: &dyn Storage, text: &str) -> Result<ImportReport, CoreError> {
    let existing = storage.load_accounts().await?;
    let mut report = ImportReport::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let (username, token) = match (parts.next(), parts.next()) {
            (Some(u), Some(t)) => (u.to_string(), t.to_string()),
            _ => {
                warn!("Skipping malformed account line: {}", line);
                report.skipped += 1;
                continue;
            }
        };

        match existing.iter().find(|a| a.username == username) {
            Some(known) => {
                if known.auth_token != token {
                    let mut updated = known.clone();
                    updated.auth_token = token;
                    // New token invalidates cached cookies
                    updated.cookies = None;
                    updated.cookies_expire_at = None;
                    storage.update_account(&updated).await?;
                    report.updated += 1;
                } else {
                    report.skipped += 1;
                }
            }
            None => {
                storage.insert_account(Account::new(username, token)).await?;
                report.added += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn proxy_import_with_and_without_credentials() {
        let store = MemoryStore::new();
        let text = "10.0.0.1:1080\n10.0.0.2:1080:user:pass\n\nnot-a-proxy\n";
        let report = parse_proxies(&store, text).await.unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.skipped, 1);

        let proxies = store.load_proxies().await.unwrap();
        let with_creds = proxies.iter().find(|p| p.address == "10.0.0.2").unwrap();
        assert!(with_creds.has_credentials());
        assert!(!with_creds.is_valid);
    }

    #[tokio::test]
    async fn reimport_updates_credentials_but_not_validity() {
        let store = MemoryStore::new();
        parse_proxies(&store, "10.0.0.1:1080:old:secret").await.unwrap();

        // Mark valid, as the validator would
        let mut proxy = store.load_proxies().await.unwrap().remove(0);
        proxy.is_valid = true;
        store.update_proxy(&proxy).await.unwrap();

        let report = parse_proxies(&store, "10.0.0.1:1080:new:secret").await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.added, 0);

        let proxy = store.load_proxies().await.unwrap().remove(0);
        assert_eq!(proxy.username.as_deref(), Some("new"));
        assert!(proxy.is_valid, "re-import must not reset validity");
    }

    #[tokio::test]
    async fn account_import_replaces_token_and_drops_cookies() {
        let store = MemoryStore::new();
        parse_accounts(&store, "alice tok1\nbob tok2").await.unwrap();

        let mut alice = store
            .load_accounts()
            .await
            .unwrap()
            .into_iter()
            .find(|a| a.username == "alice")
            .unwrap();
        alice.cookies = Some("{}".into());
        store.update_account(&alice).await.unwrap();

        parse_accounts(&store, "alice tok9").await.unwrap();
        let alice = store
            .load_accounts()
            .await
            .unwrap()
            .into_iter()
            .find(|a| a.username == "alice")
            .unwrap();
        assert_eq!(alice.auth_token, "tok9");
        assert!(alice.cookies.is_none());
    }
}

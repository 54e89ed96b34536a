//! Subcommand implementations

use anyhow::{Context, Result};
use tracing::info;

use dnsfilter::config::{AuditTarget, ServerConfig, UpstreamProtocol};
use dnsfilter::manage::{Devices, RequestLog, Sites, current_user};
use dnsfilter::proxy;
use dnsfilter::storage::StorePool;
use dnsfilter::whitelist;

use crate::args::{Args, Command, DevicesAction, ServeArgs, SitesAction, Toggle};

pub async fn run(args: Args) -> Result<()> {
    let storage = args.storage().to_string();
    match args.command {
        Command::Serve(serve) => {
            let config = server_config(&serve, args.storage_url.as_deref())?;
            proxy::run(config).await.context("DNS server failed")
        }
        Command::Sites { action } => sites(action, &storage).await,
        Command::Devices { action } => devices(action, &storage).await,
        Command::Logs { device } => logs(device.as_deref(), &storage).await,
    }
}

/// Merge the optional config file with command line flags; flags win.
fn server_config(serve: &ServeArgs, storage_url: Option<&str>) -> Result<ServerConfig> {
    let mut config = match &serve.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => ServerConfig::default(),
    };

    if let Some(storage) = storage_url {
        config.storage = storage.to_string();
    }
    if let Some(addr) = serve.addr {
        config.addr = addr;
    }
    if let Some(port) = serve.port {
        config.port = port;
    }
    if let Some(upstream) = &serve.upstream {
        config.upstream = Some(upstream.clone());
    }
    if serve.upstream_tcp {
        config.upstream_protocol = UpstreamProtocol::Tcp;
    }
    if let Some(whitelist) = &serve.whitelist {
        config.whitelist = Some(whitelist.clone());
    }
    if serve.device_acl {
        config.device_acl = true;
    }
    if let Some(target) = &serve.audit_log {
        config.audit_log = target.parse::<AuditTarget>()?;
    }
    if let Some(secs) = serve.timeout {
        config.timeout_secs = Some(secs);
    }
    if let Some(secs) = serve.stats_interval {
        config.stats_interval_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

async fn sites(action: SitesAction, storage: &str) -> Result<()> {
    let pool = StorePool::new();

    match action {
        SitesAction::Add { sites, target } => {
            let sites_admin = open_sites(&pool, target.whitelist.as_deref(), storage).await?;
            for site in &sites {
                sites_admin.add(site).await?;
            }
        }
        SitesAction::Delete { sites, target } => {
            let sites_admin = open_sites(&pool, target.whitelist.as_deref(), storage).await?;
            for site in &sites {
                sites_admin.remove(site).await?;
            }
        }
        SitesAction::Get { sites, target } => {
            let sites_admin = open_sites(&pool, target.whitelist.as_deref(), storage).await?;
            for site in sites_admin.get(&sites).await? {
                println!("{}", site);
            }
        }
        SitesAction::Copy { from, to } => {
            let src = whitelist::load(&from, &pool)
                .await
                .with_context(|| format!("Failed to open whitelist {}", from))?;
            let dst = whitelist::load(&to, &pool)
                .await
                .with_context(|| format!("Failed to open whitelist {}", to))?;
            let copied = whitelist::copy_entries(src.as_ref(), dst.as_ref()).await?;
            info!(copied, from = %from, to = %to, "copied whitelist");
        }
    }

    Ok(())
}

async fn open_sites(pool: &StorePool, whitelist: Option<&str>, storage: &str) -> Result<Sites> {
    let descriptor = whitelist.unwrap_or(storage);
    let list = whitelist::load(descriptor, pool)
        .await
        .with_context(|| format!("Failed to open whitelist {}", descriptor))?;
    Ok(Sites::new(list))
}

async fn devices(action: DevicesAction, storage: &str) -> Result<()> {
    let pool = StorePool::new();
    let devices = Devices::open(&pool, storage)
        .await
        .with_context(|| format!("Failed to open device store {}", storage))?;

    match action {
        DevicesAction::Add { addrs } => {
            let added_by = current_user();
            for addr in &addrs {
                devices.add(addr, &added_by).await?;
            }
        }
        DevicesAction::Delete { addrs } => {
            for addr in &addrs {
                devices.remove(addr).await?;
            }
        }
        DevicesAction::Get { addrs, filtered } => {
            let mut found = match filtered {
                Some(state) => devices.filtered(state == Toggle::On).await?,
                None => devices.get(&addrs).await?,
            };
            if filtered.is_some() && !addrs.is_empty() {
                found.retain(|d| addrs.contains(&d.device_addr));
            }
            for device in found {
                println!(
                    "{} filtered={} name=\"{}\" added={} by={}",
                    device.device_addr,
                    device.is_filtered,
                    device.display_name,
                    device.date_added.to_rfc3339(),
                    device.added_by
                );
            }
        }
        DevicesAction::Rename { addr, name } => {
            devices.rename(&addr, &name).await?;
        }
        DevicesAction::Filter { addr, state } => {
            devices.set_filtered(&addr, state == Toggle::On).await?;
        }
    }

    Ok(())
}

async fn logs(device: Option<&str>, storage: &str) -> Result<()> {
    let pool = StorePool::new();
    let log = RequestLog::open(&pool, storage)
        .await
        .with_context(|| format!("Failed to open request log {}", storage))?;

    for record in log.find(device).await? {
        println!(
            "[{}] {} {}",
            record.timestamp.to_rfc3339(),
            record.device_addr,
            record.query_name
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnsfilter::whitelist::Whitelist;
    use std::io::Write;

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 5353\ndevice_acl = true\naudit_log = \"store\"").unwrap();
        let serve = ServeArgs {
            config: Some(file.path().to_path_buf()),
            port: Some(6000),
            audit_log: Some("off".into()),
            ..ServeArgs::default()
        };

        let config = server_config(&serve, Some("memory:cli")).unwrap();

        assert_eq!(config.port, 6000);
        assert!(config.device_acl);
        assert_eq!(config.audit_log, AuditTarget::Off);
        assert_eq!(config.storage, "memory:cli");
    }

    #[test]
    fn bad_audit_flag_is_an_error() {
        let serve = ServeArgs {
            audit_log: Some("syslog".into()),
            ..ServeArgs::default()
        };

        assert!(server_config(&serve, None).is_err());
    }

    #[tokio::test]
    async fn site_commands_against_file_storage() {
        // Each command opens its own pool; memory tables would not outlive it.
        let tmp = tempfile::tempdir().unwrap();
        let storage = format!("files:{}", tmp.path().display());
        let target = || crate::args::WhitelistTarget { whitelist: None };

        sites(
            SitesAction::Add {
                sites: vec!["ok.com".into(), "ok.com".into()],
                target: target(),
            },
            &storage,
        )
        .await
        .unwrap();

        let pool = StorePool::new();
        let list = whitelist::load(&storage, &pool).await.unwrap();
        assert_eq!(list.get_all().await.unwrap(), vec!["ok.com"]);

        sites(
            SitesAction::Delete {
                sites: vec!["ok.com".into(), "missing.org".into()],
                target: target(),
            },
            &storage,
        )
        .await
        .unwrap();
        assert!(list.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn device_commands_recover_from_missing_devices() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = format!("files:{}", tmp.path().display());

        devices(DevicesAction::Add { addrs: vec!["10.0.0.1".into()] }, &storage)
            .await
            .unwrap();
        devices(
            DevicesAction::Filter {
                addr: "10.0.0.1".into(),
                state: Toggle::On,
            },
            &storage,
        )
        .await
        .unwrap();
        devices(
            DevicesAction::Rename {
                addr: "10.9.9.9".into(),
                name: "ghost".into(),
            },
            &storage,
        )
        .await
        .unwrap();
        devices(DevicesAction::Delete { addrs: vec!["10.9.9.9".into()] }, &storage)
            .await
            .unwrap();

        let pool = StorePool::new();
        let found = Devices::open(&pool, &storage).await.unwrap().get(&[]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].is_filtered);
    }
}

mod cli;
mod config;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use cli::{CliArgs, Command, CredentialsCommand};
use config::RuntimeConfig;
use kubenav_store::{
    AuthProviderKind, ClusterRepository, FileStore, GeneratedKubeconfig, KeyValueStore,
    MigrationOutcome, TemporaryCredentials, finalize_rancher, from_provider_response,
    read_temporary_credentials, remove_temporary_credentials, save_temporary_credentials,
};
use serde_json::Value;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config =
        RuntimeConfig::discover()?.with_overrides(args.store.clone(), args.log_filter.clone());
    init_tracing(&config.log_filter)?;
    if let Some(source) = &config.source {
        debug!("runtime config loaded from {}", source.display());
    }

    let store = FileStore::open(&config.store_path)
        .with_context(|| format!("failed to open store {}", config.store_path.display()))?;
    let repository = ClusterRepository::new(store);
    run(&repository, args.command).await
}

fn init_tracing(level_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .try_init();

    Ok(())
}

async fn run<S: KeyValueStore>(repository: &ClusterRepository<S>, command: Command) -> Result<()> {
    match command {
        Command::Import { file } => {
            let raw = read_input(&file).await?;
            let ids = repository
                .import_kubeconfig(&raw)
                .context("kubeconfig import failed")?;
            for id in ids {
                println!("{id}");
            }
        }
        Command::List => list_clusters(repository)?,
        Command::Use { id } => {
            let clusters = repository.read_clusters()?.unwrap_or_default();
            if !clusters.contains_key(&id) {
                bail!("cluster '{id}' was not found");
            }
            repository.save_active_cluster(&id)?;
            println!("active cluster: {id}");
        }
        Command::Remove { id } => {
            let removed = repository.delete_cluster(&id)?;
            println!("removed {} ({})", removed.id, removed.name);
        }
        Command::Namespace { id, namespace } => {
            repository.set_namespace(&id, &namespace)?;
            println!("{id}: namespace {namespace}");
        }
        Command::Migrate => match repository.ensure_migrated()? {
            Some(MigrationOutcome::Migrated(report)) => {
                println!("migrated {} cluster(s)", report.clusters);
                for id in report.unresolved {
                    println!("credentials not recovered: {id}");
                }
            }
            Some(MigrationOutcome::NoClusters) => println!("nothing to migrate"),
            Some(MigrationOutcome::AlreadyMigrated) | None => println!("already migrated"),
        },
        Command::Settings => {
            let settings = repository.read_settings()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Credentials { action } => run_credentials(repository.store(), action)?,
        Command::ProviderList { provider, file } => {
            let payload = read_json(&file).await?;
            for cluster in from_provider_response(provider, payload)? {
                println!("{}  {}", cluster.id, cluster.name);
            }
        }
        Command::RancherImport { listing, dir, ids } => {
            rancher_import(repository, &listing, &dir, &ids).await?;
        }
    }
    Ok(())
}

fn list_clusters<S: KeyValueStore>(repository: &ClusterRepository<S>) -> Result<()> {
    let clusters = repository.read_clusters()?.unwrap_or_default();
    if clusters.is_empty() {
        println!("no clusters stored");
        return Ok(());
    }
    let active = repository.read_active_cluster()?;
    for (id, cluster) in &clusters {
        let marker = if active.as_deref() == Some(id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {id}  {}  {}  {}  {}",
            cluster.name,
            cluster.url,
            cluster.auth_provider.kind(),
            cluster.namespace
        );
    }
    Ok(())
}

fn run_credentials<S: KeyValueStore>(store: &S, action: CredentialsCommand) -> Result<()> {
    match action {
        CredentialsCommand::Save { provider, json } => {
            let credentials = TemporaryCredentials::decode(provider, &json)?
                .ok_or_else(|| anyhow!("{provider} does not use temporary credentials"))?;
            save_temporary_credentials(store, &credentials)?;
            println!("stored {provider} credentials");
        }
        CredentialsCommand::Show { provider } => {
            match read_temporary_credentials(store, provider)? {
                Some(credentials) => println!("{}", credentials.encode()?),
                None => println!("no {provider} credentials stored"),
            }
        }
        CredentialsCommand::Clear => {
            remove_temporary_credentials(store)?;
            println!("credentials cleared");
        }
    }
    Ok(())
}

async fn rancher_import<S: KeyValueStore>(
    repository: &ClusterRepository<S>,
    listing: &Path,
    dir: &Path,
    ids: &[String],
) -> Result<()> {
    let Some(TemporaryCredentials::Rancher(credentials)) =
        read_temporary_credentials(repository.store(), AuthProviderKind::Rancher)?
    else {
        bail!("no rancher credentials stored, run `credentials save rancher` first");
    };

    let payload = read_json(listing).await?;
    let mut selected = from_provider_response(AuthProviderKind::Rancher, payload)?;
    if !ids.is_empty() {
        selected.retain(|cluster| ids.contains(&cluster.id));
        if let Some(missing) = ids
            .iter()
            .find(|id| !selected.iter().any(|cluster| &cluster.id == *id))
        {
            bail!("cluster '{missing}' is not part of the listing");
        }
    }
    if selected.is_empty() {
        bail!("no rancher clusters selected");
    }

    let clusters = finalize_rancher(&credentials, &selected, |_, id| {
        let path = dir.join(format!("{id}.json"));
        async move {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str::<GeneratedKubeconfig>(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))
        }
    })
    .await?;

    for id in repository.add_clusters(clusters)? {
        println!("{id}");
    }
    Ok(())
}

async fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        let mut raw = String::new();
        tokio::io::stdin()
            .read_to_string(&mut raw)
            .await
            .context("failed to read kubeconfig from stdin")?;
        return Ok(raw);
    }
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {file}"))
}

async fn read_json(path: &Path) -> Result<Value> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    config::normalize_storage_url, load_configuration, Application, BindingContext, BusMessage,
    LoggingNavigator, Topic, ViewModel,
};
use shared::domain::SessionId;
use storage::{MemoryStorage, SqliteStorage, Storage};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Runs a session client without a user interface and traces its model.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    session_id: String,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    base_uri: Option<String>,
    #[arg(long)]
    submit_lock: bool,
    #[arg(long)]
    storage_url: Option<String>,
    /// List cached offline tasks instead of connecting.
    #[arg(long)]
    offline: bool,
    #[arg(long)]
    flow: Option<String>,
    /// Drop cached offline tasks older than this many days before starting.
    #[arg(long)]
    clear_expired_days: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut configuration = load_configuration(args.config.as_deref())?;
    if let Some(base_uri) = args.base_uri {
        configuration.base_uri = base_uri;
    }
    if args.submit_lock {
        configuration.submit_lock = true;
    }
    if let Some(storage_url) = args.storage_url {
        configuration.storage_url = storage_url;
    }

    let default_level = if configuration.development_mode {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let storage = open_storage(&configuration.storage_url).await?;
    let app = Application::new(
        SessionId::new(args.session_id),
        configuration,
        storage,
        Arc::new(LoggingNavigator),
    )?;

    if let Some(days) = args.clear_expired_days {
        let removed = app.clear_expired_tasks(days).await?;
        info!(removed, days, "cleared expired offline tasks");
    }

    if args.offline {
        for task in app.start_offline().await? {
            println!("{}", serde_json::to_string(&task)?);
        }
        return Ok(());
    }

    let errors = app.context().bus.subscribe(Topic::Error, |message| {
        if let BusMessage::Error(notification) = message {
            warn!(title = %notification.title, message = %notification.message, "notification");
        }
    });
    let app_model = app.start().await.context("failed to start session")?;
    let session = app_model.session.session().clone();
    let changes = session.subscribe(|kind, key, model| {
        let model_type = model.map(|model| model.kind.as_str()).unwrap_or("-");
        info!(kind = kind.as_str(), key, model_type, "model changed");
    });

    if let Some(page) = app_model.session.page() {
        match app
            .context()
            .template_factory
            .get_template(&page, &BindingContext::default())
        {
            Ok(template) => info!(key = page.key(), %template, "page ready"),
            Err(err) => warn!(key = page.key(), error = %err, "no template for page"),
        }
    }

    if let Some(flow) = args.flow {
        let accepted = session.start_flow(&flow).await?;
        info!(%flow, accepted, "flow requested");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    changes.dispose();
    errors.dispose();
    app.exit();
    Ok(())
}

async fn open_storage(raw_url: &str) -> Result<Arc<dyn Storage>> {
    let url = normalize_storage_url(raw_url);
    if url == "memory" {
        return Ok(Arc::new(MemoryStorage::new()));
    }
    let storage = SqliteStorage::new(&url)
        .await
        .with_context(|| format!("failed to open offline storage at '{url}'"))?;
    Ok(Arc::new(storage))
}

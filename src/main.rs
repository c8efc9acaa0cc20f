mod config;
mod deposit;
mod propfile;

use std::{env, fs, sync::Arc};

use anyhow::Context;
use axum::Router;
use config::Config;
use deposit::bagit::ManifestBagValidator;
use deposit::extractor::ZipExtractor;
use deposit::http::DepositService;
use deposit::orchestrator::{FinalizationQueue, Pipeline};
use deposit::versioning::{GitVersioning, Identity, NoopVersioning, VersioningAdapter};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn load_config() -> anyhow::Result<Config> {
    match env::args().len() {
        0 | 1 => Ok(Default::default()),
        2 => {
            let arg = env::args().nth(1).expect("should have arg 1");
            let contents = fs::read_to_string(&arg)
                .context("could not read configuration file")
                .context(arg)?;
            let cfg = Config::parse(&contents).context("failed to parse configuration")?;

            Ok(cfg)
        }
        _ => Err(anyhow::anyhow!(
            "expected at most one command arg, pointing to a config file"
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config().context("could not load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| (&cfg.log).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    debug!(?cfg, "loaded configuration");

    fs::create_dir_all(&cfg.tempdir).context("could not create staging root")?;
    fs::create_dir_all(&cfg.deposits_root).context("could not create deposits root")?;

    let versioning: Arc<dyn VersioningAdapter> = if cfg.git_enabled {
        Arc::new(GitVersioning::new(Identity {
            user: cfg.git_user.clone(),
            email: cfg.git_email.clone(),
        }))
    } else {
        Arc::new(NoopVersioning)
    };

    let pipeline = Arc::new(Pipeline {
        extractor: Arc::new(ZipExtractor),
        validator: Arc::new(ManifestBagValidator),
        versioning,
        temp_root: cfg.tempdir.clone(),
        deposits_root: cfg.deposits_root.clone(),
    });

    let queue = FinalizationQueue::spawn(cfg.queue_capacity, pipeline);

    let service = DepositService::new(
        cfg.tempdir.clone(),
        cfg.deposits_root.clone(),
        cfg.base_url.clone(),
        queue,
    );

    let app = Router::new()
        .merge(service.into_router())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(cfg.http_bind)
        .await
        .context("failed to bind listener")?;
    info!(addr = %cfg.http_bind, "deposit finalizer listening");
    axum::serve(listener, app)
        .await
        .context("http server exited with error")?;

    Ok(())
}

use anyhow::{Context, Result};
use cflocal::cli::{Args, ExecutionMode, ExtractConfig, InjectConfig, RunConfig};
use cflocal::container::{Container, ContainerClient, ContainerConfig, DataStream};
use cflocal::{EngineConfig, env};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries the relayed container output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cflocal=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let result = match mode {
        ExecutionMode::Run(config) => run_mode(config).await,
        ExecutionMode::Inject(config) => inject_mode(config).await.map(|_| 0),
        ExecutionMode::Extract(config) => extract_mode(config).await.map(|_| 0),
        ExecutionMode::ShowConfig => show_config().map(|_| 0),
    };

    match result {
        Ok(status) => std::process::exit(status.clamp(0, 255) as i32),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration override from: {:?}", path);
            Ok(EngineConfig::from_toml_file(path)?)
        }
        None => Ok(EngineConfig::discover()?),
    }
}

async fn connect(engine: &EngineConfig) -> Result<Arc<ContainerClient>> {
    let client = ContainerClient::with_config(engine.client_config())
        .await
        .context("Failed to connect to container runtime")?;
    info!("Connected to {}", client.runtime_type().await?);
    Ok(Arc::new(client))
}

async fn ensure_image(client: &ContainerClient, image: &str) -> Result<()> {
    if !client.image_exists(image).await? {
        anyhow::bail!("Image '{}' is not available locally", image);
    }
    Ok(())
}

async fn run_mode(config: RunConfig) -> Result<i64> {
    let engine = load_config(config.config_override.as_deref())?;
    let client = connect(&engine).await?;
    ensure_image(&client, &config.image).await?;

    let mut builder = ContainerConfig::builder()
        .image(&config.image)
        .envs(config.env.clone());
    if let Some(hostname) = &config.hostname {
        builder = builder.hostname(hostname);
    }
    if let Some(user) = &config.user {
        builder = builder.user(user);
    }
    if let Some(dir) = &config.working_dir {
        builder = builder.working_dir(dir);
    }
    for volume in &config.volumes {
        builder = builder.bind(volume);
    }
    for port in &config.ports {
        builder = builder.port_binding(format!("{}/tcp", port.container), port.host);
    }
    if let Some(mb) = config.memory_mb {
        let bytes = mb.saturating_mul(1024 * 1024).min(i64::MAX as u64) as i64;
        builder = builder.memory_limit(bytes);
    }
    if let Some(network) = &config.network {
        builder = builder.network_mode(network);
    }
    if !config.command.is_empty() {
        builder = builder.cmd(config.command.clone());
    }
    let spec = builder.build()?;
    let prefix = engine.log_prefix_for(spec.config.name_prefix());

    let exit = CancellationToken::new();
    let container = Container::create(client, spec.config, spec.host_config)
        .await?
        .with_exit_signal(exit.clone())
        .with_restart_policy(engine.restart)
        .with_bold_stderr(engine.bold_stderr);

    tokio::spawn(cancel_on_ctrl_c(exit.clone()));
    let restart = config
        .restart_every
        .map(|secs| restart_ticker(Duration::from_secs(secs), exit.clone()));

    let started = container.start(&prefix, tokio::io::stdout(), restart).await;

    let committed = match (&started, &config.commit) {
        (Ok(_), Some(reference)) => container.commit(reference).await.map(Some),
        _ => Ok(None),
    };
    if let Err(e) = container.close().await {
        warn!("Failed to remove container: {}", e);
    }

    let status = started?;
    if let Some(image_id) = committed? {
        info!("Committed image {}", image_id);
    }
    Ok(status)
}

async fn inject_mode(config: InjectConfig) -> Result<()> {
    let engine = load_config(config.config_override.as_deref())?;
    let client = connect(&engine).await?;
    ensure_image(&client, &config.image).await?;

    let file = tokio::fs::File::open(&config.file)
        .await
        .with_context(|| format!("Failed to open {:?}", config.file))?;
    let size = file.metadata().await?.len();
    let stream = DataStream::new(file, size);

    let spec = ContainerConfig::builder().image(&config.image).build()?;
    let container = Container::create(client, spec.config, spec.host_config).await?;

    let result = async {
        container.copy_to(stream, &config.path).await?;
        container.commit(&config.tag).await
    }
    .await;
    container.close().await?;

    let image_id = result?;
    println!("{}", image_id);
    Ok(())
}

async fn extract_mode(config: ExtractConfig) -> Result<()> {
    let engine = load_config(config.config_override.as_deref())?;
    let client = connect(&engine).await?;
    ensure_image(&client, &config.image).await?;

    let spec = ContainerConfig::builder().image(&config.image).build()?;
    let container = Container::create(client, spec.config, spec.host_config).await?;

    let stream = match container.copy_from(&config.path).await {
        Ok(stream) => stream,
        Err(e) => {
            container.close().await?;
            return Err(e.into());
        }
    };
    let Some(mut stream) = container.close_after_stream(Some(stream)).await? else {
        anyhow::bail!("No stream returned for {}", config.path);
    };

    let copied = async {
        let mut output = tokio::fs::File::create(&config.output).await?;
        tokio::io::copy(&mut stream, &mut output).await
    }
    .await;
    stream.close().await?;

    let bytes = copied.with_context(|| format!("Failed to write {:?}", config.output))?;
    info!("Extracted {} bytes from {} to {:?}", bytes, config.path, config.output);
    Ok(())
}

fn show_config() -> Result<()> {
    println!("Configuration lookup order:");
    if let Ok(current_dir) = std::env::current_dir() {
        println!("  1. {:?}", env::local_config_file_path(&current_dir));
    }
    if let Ok(home) = std::env::var("HOME") {
        println!("  2. {:?}", env::user_config_file_path(Path::new(&home)));
    }
    match EngineConfig::find_config_file() {
        Some(path) => println!("Using: {:?}", path),
        None => println!("Using: built-in defaults"),
    }

    let engine = EngineConfig::discover()?;
    println!("\n{}", toml::to_string_pretty(&engine)?);
    Ok(())
}

async fn cancel_on_ctrl_c(exit: CancellationToken) {
    tokio::select! {
        _ = exit.cancelled() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for interrupt: {}", e);
                return;
            }
            info!("Interrupt received, stopping container");
            exit.cancel();
        }
    }
}

/// Trigger a restart every `period` until `exit` fires.
fn restart_ticker(period: Duration, exit: CancellationToken) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = exit.cancelled() => break,
                _ = interval.tick() => {
                    if tx.send(()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

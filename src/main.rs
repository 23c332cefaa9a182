use ragbus::cli::{Cli, Commands, ConfigAction};
use ragbus::config::{Config, ConfigValidator};
use ragbus::embedding::{EmbeddingProvider, FastEmbedProvider};
use ragbus::error::{RagbusError, Result};
use ragbus::generation::{LlamaServerGenerator, SamplingParams};
use ragbus::index::{QdrantIndex, VectorIndex};
use ragbus::indexer::Indexer;
use ragbus::protocol::{
    QuizRequest, RagFilters, RagResponse, RecommendRequest, SearchRequest,
};
use ragbus::rpc::{BrokerConnection, RpcClient, RpcHandler, RpcServer};
use ragbus::service::{QuizHandler, RagService, RecommendHandler, SearchHandler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Serve => {
            cmd_serve(cli.config).await?;
        }
        Commands::Index { input } => {
            cmd_index(cli.config, input).await?;
        }
        Commands::Search {
            query,
            author,
            date,
            topic,
        } => {
            let request = SearchRequest {
                query,
                filters: RagFilters {
                    author,
                    date,
                    topic,
                },
            };
            cmd_call(cli.config, |c| c.broker.search_routing_key.clone(), request).await?;
        }
        Commands::Recommend { url, top_k } => {
            let request = RecommendRequest { url, top_k };
            cmd_call(cli.config, |c| c.broker.recommend_routing_key.clone(), request).await?;
        }
        Commands::Quiz { urls, n_questions } => {
            let request = QuizRequest { urls, n_questions };
            cmd_call(cli.config, |c| c.broker.quiz_routing_key.clone(), request).await?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "ragbus=debug" } else { "ragbus=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn config_path(cli_path: Option<PathBuf>) -> Result<PathBuf> {
    match cli_path {
        Some(path) => Ok(path),
        None => Config::default_path(),
    }
}

fn load_config(cli_path: Option<PathBuf>) -> Result<Config> {
    Config::load(&config_path(cli_path)?)
}

/// Run the query service until interrupted
async fn cmd_serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    tracing::info!("Configuration loaded successfully");

    // Model load is blocking and slow on first run; do it before touching
    // the broker so a failed download never leaves half-bound queues.
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FastEmbedProvider::new(
        &config.embedding.model,
        config.embedding.batch_size,
    )?);

    let index: Arc<dyn VectorIndex> =
        Arc::new(QdrantIndex::new(&config.index.url, &config.index.collection));
    index.ensure_collection(embedder.dimension()).await?;

    let generator = Arc::new(LlamaServerGenerator::new(
        &config.llm.url,
        SamplingParams {
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
            top_p: config.llm.top_p,
        },
    ));

    let service = Arc::new(RagService::new(embedder, index, generator));
    let api_key = non_empty(&config.broker.api_key);

    let conn = BrokerConnection::connect(&config.broker.amqp_url).await?;

    let servers = [
        (
            &config.broker.search_routing_key,
            Arc::new(SearchHandler {
                service: Arc::clone(&service),
            }) as Arc<dyn RpcHandler>,
        ),
        (
            &config.broker.recommend_routing_key,
            Arc::new(RecommendHandler {
                service: Arc::clone(&service),
            }),
        ),
        (
            &config.broker.quiz_routing_key,
            Arc::new(QuizHandler {
                service: Arc::clone(&service),
            }),
        ),
    ];

    for (routing_key, handler) in servers {
        let queue_name = format!("{routing_key}.q");
        let server = Arc::new(RpcServer::new(
            Arc::clone(&conn),
            &config.broker.exchange,
            &queue_name,
            routing_key,
            handler,
            config.broker.prefetch,
            api_key.clone(),
        ));
        server.spawn();
        tracing::info!("Serving '{}' from queue '{}'", routing_key, queue_name);
    }

    tracing::info!("Service is up; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.map_err(|e| RagbusError::Io {
        source: e,
        context: "Failed to wait for Ctrl-C".to_string(),
    })?;

    tracing::info!("Shutting down");
    conn.close().await?;
    Ok(())
}

/// Index CSV article dumps into the vector collection
async fn cmd_index(config_path: Option<PathBuf>, input: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let input = input.unwrap_or_else(|| config.indexer.input_dir.clone());

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FastEmbedProvider::new(
        &config.embedding.model,
        config.embedding.batch_size,
    )?);
    let index: Arc<dyn VectorIndex> =
        Arc::new(QdrantIndex::new(&config.index.url, &config.index.collection));

    let indexer = Indexer::new(
        embedder,
        index,
        config.indexer.chunk_size,
        config.indexer.chunk_overlap,
        config.indexer.upsert_batch_size,
    );

    let stats = indexer.run(&input).await?;
    println!(
        "Indexed {} articles ({} chunks, {} rows skipped)",
        stats.articles, stats.chunks, stats.skipped
    );
    Ok(())
}

/// Send one RPC request to a running service and print the response
async fn cmd_call<T: serde::Serialize>(
    config_path: Option<PathBuf>,
    routing_key: impl FnOnce(&Config) -> String,
    request: T,
) -> Result<()> {
    let config = load_config(config_path)?;
    let routing_key = routing_key(&config);

    let conn = BrokerConnection::connect(&config.broker.amqp_url).await?;
    let client = RpcClient::new(conn, &config.broker.exchange, non_empty(&config.broker.api_key));

    let timeout = Duration::from_secs(config.broker.rpc_timeout_secs);
    let response: RagResponse = client.call(&routing_key, &request, timeout, None).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&response).map_err(|e| RagbusError::Json {
            source: e,
            context: "Failed to render response".to_string(),
        })?
    );
    Ok(())
}

fn cmd_config(cli_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(cli_path)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate { file } => {
            let path = config_path(file.or(cli_path))?;
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid: {}", path.display());
        }
        ConfigAction::Init { force } => {
            let path = config_path(cli_path)?;
            if path.exists() && !force {
                return Err(RagbusError::Config(format!(
                    "Config already exists at {} (use --force to overwrite)",
                    path.display()
                )));
            }
            Config::default().save(&path)?;
            println!("✓ Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

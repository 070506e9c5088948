//! derivq CLI — operator interface to the derivation queue.

use clap::{Parser, Subcommand};
use derivq::collab::ollama::OllamaGenerator;
use derivq::collab::{ArtifactGenerator, ContentFetcher, FsFetcher};
use derivq::config::Config;
use derivq::db::Db;
use derivq::identity;
use derivq::model::{NewRequest, RequestId, RequestKind, State};
use derivq::query;
use derivq::telemetry::{TelemetryConfig, init_telemetry};
use derivq::worker::{Worker, WorkerConfig};
use secrecy::ExposeSecret;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "derivq", about = "Work queue for deriving captions and embeddings")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run fulfillment workers
    Serve {
        /// Number of concurrent workers
        #[arg(long, default_value_t = 1)]
        workers: usize,
        /// Disable LISTEN/NOTIFY wake-ups and rely on polling alone
        #[arg(long)]
        no_push: bool,
    },
    /// Submit a derivation request
    Submit {
        /// Path to the content item
        content_ref: String,
        /// Artifact kind: caption or embedding
        kind: RequestKind,
        /// Model hint; empty means the default model for the kind
        #[arg(long, default_value = "")]
        model: String,
        /// Skip submission when an artifact for this content already exists
        #[arg(long)]
        if_missing: bool,
    },
    /// List requests
    List {
        /// Filter by state
        #[arg(long)]
        state: Option<String>,
        /// Filter by kind
        #[arg(long)]
        kind: Option<String>,
        /// Maximum rows to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a request
    Show {
        /// Request id
        id: i64,
    },
    /// Search stored embeddings by text
    Search {
        /// Query text
        text: String,
        /// Number of results
        #[arg(short, default_value_t = 10)]
        k: i64,
        /// Embedding model hint for the query vector
        #[arg(long, default_value = "")]
        model: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve { workers, no_push } => cmd_serve(config, workers, no_push).await,
        Command::Submit {
            content_ref,
            kind,
            model,
            if_missing,
        } => {
            let db = connect(&config).await?;
            cmd_submit(&db, content_ref, kind, model, if_missing).await
        }
        Command::List { state, kind, limit } => {
            let db = connect(&config).await?;
            cmd_list(&db, state, kind, limit).await
        }
        Command::Show { id } => {
            let db = connect(&config).await?;
            cmd_show(&db, id).await
        }
        Command::Search { text, k, model } => {
            let db = connect(&config).await?;
            let generator = OllamaGenerator::new(
                &config.ollama_url,
                &config.default_caption_model,
                &config.default_embedding_model,
            );
            cmd_search(&db, &generator, text, model, k).await
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<Db> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    Ok(db)
}

async fn cmd_serve(config: Config, workers: usize, no_push: bool) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "derivq".to_string(),
    })?;

    let db = Arc::new(connect(&config).await?);
    let fetcher: Arc<dyn ContentFetcher> = Arc::new(FsFetcher);
    let generator = Arc::new(OllamaGenerator::new(
        &config.ollama_url,
        &config.default_caption_model,
        &config.default_embedding_model,
    ));

    let worker_config = WorkerConfig {
        poll_interval: config.poll_interval,
        push_enabled: !no_push,
    };

    let pool: Vec<Worker> = (0..workers.max(1))
        .map(|_| {
            Worker::new(
                Arc::clone(&db),
                Arc::clone(&fetcher),
                Arc::clone(&generator) as Arc<dyn ArtifactGenerator>,
                worker_config.clone(),
            )
        })
        .collect();

    let handles: Vec<_> = pool
        .iter()
        .map(|w| {
            let w = w.clone();
            tokio::spawn(async move { w.run().await })
        })
        .collect();

    tokio::signal::ctrl_c().await.ok();
    for w in &pool {
        w.shutdown();
    }
    for handle in handles {
        handle.await??;
    }
    Ok(())
}

async fn cmd_submit(
    db: &Db,
    content_ref: String,
    kind: RequestKind,
    model: String,
    if_missing: bool,
) -> anyhow::Result<()> {
    let new = NewRequest::new(&content_ref, kind).model(model);

    if if_missing {
        // Hash locally to check the artifact store before ledgering.
        let bytes = FsFetcher.fetch(&content_ref).await?;
        let hash = identity::hash_reader(&bytes[..])?;
        match db.submit_if_missing(new, &hash).await? {
            Some(request) => println!("Created: {} (state: {})", request.id, request.state),
            None => println!("Skipped: {kind} for {hash} already stored"),
        }
        return Ok(());
    }

    let request = db.submit(new).await?;
    println!("Created: {} (state: {})", request.id, request.state);
    Ok(())
}

async fn cmd_list(
    db: &Db,
    state: Option<String>,
    kind: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let state_filter: Option<State> = match state {
        Some(s) => Some(s.parse().map_err(|_| anyhow::anyhow!("invalid state: {s}"))?),
        None => None,
    };
    let kind_filter: Option<RequestKind> = match kind {
        Some(k) => Some(k.parse().map_err(|_| anyhow::anyhow!("invalid kind: {k}"))?),
        None => None,
    };

    let requests = db.list_requests(state_filter, kind_filter, limit).await?;

    if requests.is_empty() {
        println!("No requests found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<10}  {:<10}  {:<40}  CREATED",
        "ID", "KIND", "STATE", "CONTENT_REF"
    );
    println!("{}", "-".repeat(92));

    for request in &requests {
        let ref_display = truncate_chars(&request.content_ref, 40);
        println!(
            "{:<8}  {:<10}  {:<10}  {:<40}  {}",
            request.id.0,
            request.kind.to_string(),
            request.state.to_string(),
            ref_display,
            request.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} request(s)", requests.len());
    Ok(())
}

/// Truncate to at most `max` characters. Refs are arbitrary user paths,
/// so cutting must land on a char boundary, not a byte offset.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

async fn cmd_show(db: &Db, id: i64) -> anyhow::Result<()> {
    let request = db.get_request(RequestId(id)).await?;

    println!("ID:          {}", request.id);
    println!("Ref:         {}", request.content_ref);
    println!("Kind:        {}", request.kind);
    println!(
        "Model:       {}",
        if request.model.is_empty() {
            "(default)"
        } else {
            &request.model
        }
    );
    println!("State:       {}", request.state);
    println!("Created:     {}", request.created_at);
    if let Some(claimed) = request.claimed_at {
        println!("Claimed:     {claimed}");
    }
    if let Some(completed) = request.completed_at {
        println!("Completed:   {completed}");
    }
    if let Some(ref err) = request.error_message {
        println!("Error:       {err}");
    }
    Ok(())
}

async fn cmd_search(
    db: &Db,
    generator: &OllamaGenerator,
    text: String,
    model: String,
    k: i64,
) -> anyhow::Result<()> {
    let hits = query::search_text(db, generator, &text, &model, k).await?;

    if hits.is_empty() {
        println!("No embeddings stored.");
        return Ok(());
    }

    println!("{:<14}  {:<10}  MODEL", "CONTENT_HASH", "DISTANCE");
    println!("{}", "-".repeat(60));
    for hit in &hits {
        println!(
            "{:<14}  {:<10.6}  {}",
            hit.content_hash.to_string(),
            hit.distance,
            hit.model
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_refs_whole() {
        assert_eq!(truncate_chars("img1.png", 40), "img1.png");
    }

    #[test]
    fn truncate_cuts_long_refs_to_max_chars() {
        let long = "a".repeat(50);
        assert_eq!(truncate_chars(&long, 40).len(), 40);
    }

    #[test]
    fn truncate_handles_multibyte_refs() {
        // 'é' is two bytes; byte 40 falls inside it here. A byte slice
        // would panic, a char cut must not.
        let content_ref = format!("/photos/{}é.png", "a".repeat(31));
        let cut = truncate_chars(&content_ref, 40);
        assert_eq!(cut.chars().count(), 40);
        assert!(cut.ends_with('é'));

        let all_multibyte = "é".repeat(45);
        assert_eq!(truncate_chars(&all_multibyte, 40).chars().count(), 40);
    }
}

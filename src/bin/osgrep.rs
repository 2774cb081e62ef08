//! `osgrep` CLI (§6): `search`, `index`, `trace`, `serve`, `setup`, `doctor`.
//! Grounded in the teacher's `clap`-derive/`tracing_subscriber` CLI shape
//! (see `src/bin/osgrep.rs.teacher-ref`), rewired onto this crate's own
//! syncer/retriever/graph/server modules instead of `codex_retrieval`.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use clap::Parser;
use clap::Subcommand;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use osgrep::config::OsgrepConfig;
use osgrep::embeddings::EmbeddingAdapter;
use osgrep::embeddings::HttpEmbeddingModel;
use osgrep::format;
use osgrep::format::OutputFormat;
use osgrep::graph;
use osgrep::graph::TraceOptions;
use osgrep::ignore_rules::find_project_root;
use osgrep::indexing::Syncer;
use osgrep::indexing::WatchEventKind;
use osgrep::indexing::WatchEventQueue;
use osgrep::indexing::watcher;
use osgrep::lock::StoreLock;
use osgrep::registry;
use osgrep::registry::RegistryEntry;
use osgrep::server;
use osgrep::server::AppState;
use osgrep::storage::LanceDbStore;
use osgrep::storage::MetaCache;
use osgrep::types::SearchQuery;

#[derive(Parser)]
#[command(name = "osgrep", version, about = "Semantic code search over a local git-tracked project")]
struct Cli {
    /// Overrides `OSGREP_PROJECT_ROOT` and ancestor-marker detection.
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hybrid search over the indexed project.
    Search {
        pattern: String,
        path: Option<String>,
        #[arg(short = 'm', long = "max-count", default_value_t = 10)]
        max_count: usize,
        #[arg(short = 'c', long)]
        content: bool,
        #[arg(long = "per-file")]
        per_file: Option<usize>,
        #[arg(long)]
        scores: bool,
        #[arg(long)]
        compact: bool,
        #[arg(long)]
        plain: bool,
        #[arg(short = 's', long)]
        sync: bool,
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
    /// Force a full re-index of the project root.
    Index {
        #[arg(long)]
        reset: bool,
    },
    /// Trace callers/callees of a symbol (§4.11).
    Trace {
        symbol: String,
        #[arg(short = 'd', long, default_value_t = 1)]
        depth: usize,
        #[arg(long)]
        callers: bool,
        #[arg(long)]
        callees: bool,
        #[arg(short = 'p', long)]
        path: Option<String>,
        #[arg(long)]
        pretty: bool,
        #[arg(long)]
        plain: bool,
        #[arg(long)]
        json: bool,
    },
    /// Start (or inspect/stop) the HTTP server for this project root.
    Serve {
        #[arg(short = 'p', long)]
        port: Option<u16>,
        #[arg(short = 'b', long)]
        background: bool,
        #[command(subcommand)]
        action: Option<ServeAction>,
    },
    /// One-time local setup (global dirs, config scaffold).
    Setup,
    /// Sanity-check the environment and the project's store.
    Doctor,
}

#[derive(Subcommand)]
enum ServeAction {
    Status,
    Stop {
        #[arg(long)]
        all: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("osgrep=info")))
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("osgrep: failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(run());
    std::process::exit(code);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    tokio::select! {
        result = dispatch(cli) => {
            match result {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("{} {e}", "error:".red().bold());
                    1
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{}", "interrupted".yellow());
            130
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let project_root = resolve_project_root(cli.project_root.as_deref())?;

    match cli.command {
        Command::Search {
            pattern,
            path,
            max_count,
            content,
            per_file,
            scores,
            compact,
            plain,
            sync,
            dry_run,
        } => {
            cmd_search(
                &project_root,
                pattern,
                path,
                max_count,
                content,
                per_file,
                scores,
                compact,
                plain,
                sync,
                dry_run,
            )
            .await
        }
        Command::Index { reset } => cmd_index(&project_root, reset).await,
        Command::Trace { symbol, depth, callers, callees, path, pretty, plain, json } => {
            cmd_trace(&project_root, symbol, depth, callers, callees, path, pretty, plain, json).await
        }
        Command::Serve { port, background, action: None } => cmd_serve_start(&project_root, port, background).await,
        Command::Serve { action: Some(ServeAction::Status), .. } => cmd_serve_status(&project_root).await,
        Command::Serve { action: Some(ServeAction::Stop { all }), .. } => cmd_serve_stop(&project_root, all).await,
        Command::Setup => cmd_setup(&project_root).await,
        Command::Doctor => cmd_doctor(&project_root).await,
    }
}

/// Resolves the project root: `--project-root` > `OSGREP_PROJECT_ROOT` >
/// nearest ancestor marker from the current directory (§4.1, §6).
fn resolve_project_root(arg: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = arg {
        return Ok(p.to_path_buf());
    }
    if let Ok(p) = std::env::var("OSGREP_PROJECT_ROOT") {
        return Ok(PathBuf::from(p));
    }
    Ok(find_project_root(&std::env::current_dir()?))
}

fn use_color() -> bool {
    use std::io::IsTerminal;
    std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
}

/// Builds the embedding adapter from `OPENAI_API_KEY` (§4.4's external
/// module boundary has no in-repo model, so the HTTP adapter is the only
/// implementation this CLI can wire up — same discovery convention as the
/// teacher's own `OPENAI_API_KEY`-based auth probing).
fn build_embeddings(config: &OsgrepConfig) -> anyhow::Result<Arc<EmbeddingAdapter<HttpEmbeddingModel>>> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("missing OPENAI_API_KEY environment variable (required for embeddings)"))?;
    let model = HttpEmbeddingModel::new(api_key, config.embedding.dense_dimension, config.embedding.late_dimension);
    Ok(Arc::new(EmbeddingAdapter::new(model)))
}

async fn open_store(project_root: &Path, config: &OsgrepConfig, reset: bool) -> anyhow::Result<(Arc<LanceDbStore>, Arc<MetaCache>)> {
    let store_dir = osgrep::config::store_dir(project_root);
    if reset && store_dir.exists() {
        std::fs::remove_dir_all(&store_dir)?;
    }
    std::fs::create_dir_all(&store_dir)?;
    let store = LanceDbStore::open(&store_dir, config.embedding.dense_dimension as i32).await?;
    let meta = MetaCache::open(&store_dir.join("meta.db"))?;
    Ok((Arc::new(store), Arc::new(meta)))
}

async fn cmd_search(
    project_root: &Path,
    pattern: String,
    path: Option<String>,
    max_count: usize,
    content: bool,
    per_file: Option<usize>,
    scores: bool,
    compact: bool,
    plain: bool,
    sync: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    let config = OsgrepConfig::load(project_root)?;
    config.validate()?;
    let embeddings = build_embeddings(&config)?;
    let (store, meta) = open_store(project_root, &config, false).await?;

    if sync {
        let _lock = StoreLock::acquire(&osgrep::config::store_dir(project_root))?;
        let syncer = Syncer::new(store.clone(), meta.clone(), embeddings.clone(), config.chunking.clone(), config.worker_threads());
        let cancel = CancellationToken::new();
        let stats = syncer.initial_sync(project_root, dry_run, |_| {}, &cancel).await?;
        eprintln!(
            "synced {}/{} files ({} indexed, {} failed)",
            stats.processed, stats.total, stats.indexed, stats.failed
        );
    }

    let query = SearchQuery {
        text: pattern,
        top_k: max_count,
        rerank: true,
        path_prefix: path,
        def_filter: None,
        ref_filter: None,
    };

    let retriever = osgrep::Retriever::new(store, embeddings);
    let cancel = CancellationToken::new();
    let mut results = retriever.search(&query, &cancel).await?;

    if let Some(limit) = per_file {
        results = cap_per_file(results, limit);
    }

    let colorize = !plain && use_color();
    if compact {
        for r in &results {
            let line = format!("{}:{}-{}", r.chunk.path, r.chunk.start_line, r.chunk.end_line);
            if scores {
                println!("{line}  {:.3}", r.score_out);
            } else {
                println!("{line}");
            }
        }
        return Ok(());
    }

    if content {
        for r in &results {
            println!("{}:{}-{}  [{:?}, {:.2}]", r.chunk.path, r.chunk.start_line, r.chunk.end_line, r.confidence, r.score_out);
            println!("{}", r.chunk.content);
            println!();
        }
        return Ok(());
    }

    let rendered = format::render_search_results(&results, OutputFormat::Text);
    if colorize {
        for line in rendered.lines() {
            if line.contains("[High") {
                println!("{}", line.green());
            } else if line.contains("[Medium") {
                println!("{}", line.yellow());
            } else {
                println!("{line}");
            }
        }
    } else {
        println!("{rendered}");
    }
    Ok(())
}

/// Caps results to at most `limit` per file, preserving rank order —
/// `--per-file` tightens the server default (`SearchConfig::max_per_file`)
/// for one invocation without touching the retriever's own diversification
/// pass (§4.10 step 8).
fn cap_per_file(results: Vec<osgrep::SearchResult>, limit: usize) -> Vec<osgrep::SearchResult> {
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    results
        .into_iter()
        .filter(|r| {
            let count = counts.entry(r.chunk.path.clone()).or_insert(0);
            *count += 1;
            *count <= limit.max(1)
        })
        .collect()
}

async fn cmd_index(project_root: &Path, reset: bool) -> anyhow::Result<()> {
    let config = OsgrepConfig::load(project_root)?;
    config.validate()?;
    let embeddings = build_embeddings(&config)?;
    let (store, meta) = open_store(project_root, &config, reset).await?;
    let _lock = StoreLock::acquire(&osgrep::config::store_dir(project_root))?;

    let syncer = Syncer::new(store, meta, embeddings, config.chunking.clone(), config.worker_threads());
    let cancel = CancellationToken::new();
    let stats = syncer
        .initial_sync(
            project_root,
            false,
            |p| {
                if let Some(file) = &p.current_file {
                    eprint!("\rindexing {}/{}: {file}          ", p.processed, p.total);
                }
            },
            &cancel,
        )
        .await?;
    eprintln!();
    println!("indexed {}/{} files ({} updated, {} failed)", stats.processed, stats.total, stats.indexed, stats.failed);
    Ok(())
}

async fn cmd_trace(
    project_root: &Path,
    symbol: String,
    depth: usize,
    callers: bool,
    callees: bool,
    path: Option<String>,
    pretty: bool,
    plain: bool,
    json: bool,
) -> anyhow::Result<()> {
    let config = OsgrepConfig::load(project_root)?;
    let (store, _meta) = open_store(project_root, &config, false).await?;

    let opts = TraceOptions {
        depth: depth.max(1),
        callers_only: callers && !callees,
        callees_only: callees && !callers,
        path_prefix: path,
    };
    let result = graph::trace(&store, &symbol, &opts).await?;

    let format = if json { OutputFormat::Json } else { OutputFormat::Text };
    let rendered = format::render_trace(&result, format);
    if format == OutputFormat::Text && !plain && use_color() {
        for line in rendered.lines() {
            if line.starts_with("callers:") || line.starts_with("callees:") {
                println!("{}", line.bold());
            } else {
                println!("{line}");
            }
        }
    } else {
        println!("{rendered}");
    }
    let _ = pretty;
    Ok(())
}

async fn cmd_serve_start(project_root: &Path, port_arg: Option<u16>, background: bool) -> anyhow::Result<()> {
    let registry_path = registry::registry_path();
    if let Some(existing) = registry::find_for_root(&registry_path, project_root)? {
        println!("server already running for this project root: pid {} on port {}", existing.pid, existing.port);
        return Ok(());
    }

    let config = OsgrepConfig::load(project_root)?;
    config.validate()?;
    let port = port_arg
        .or_else(|| std::env::var("OSGREP_PORT").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(0);
    let embeddings = build_embeddings(&config)?;
    let (store, meta) = open_store(project_root, &config, false).await?;
    let _lock = StoreLock::acquire(&osgrep::config::store_dir(project_root))?;

    let watch_enabled = std::env::var("OSGREP_WATCH").map(|v| v == "1").unwrap_or(config.watch.enabled);
    let state = AppState::new(project_root.to_path_buf(), store.clone(), embeddings.clone(), watch_enabled);

    let cancel = CancellationToken::new();

    {
        let status = state.sync_status.clone();
        let project_root = project_root.to_path_buf();
        let syncer = Syncer::new(store.clone(), meta.clone(), embeddings.clone(), config.chunking.clone(), config.worker_threads());
        let cancel = cancel.clone();
        tokio::spawn(async move {
            {
                let mut s = status.write().await;
                s.running = true;
            }
            let status_for_progress = status.clone();
            let stats = syncer
                .initial_sync(
                    &project_root,
                    false,
                    move |p| {
                        if let Ok(mut s) = status_for_progress.try_write() {
                            s.processed = p.processed;
                            s.total = p.total;
                            s.current_file = p.current_file;
                        }
                    },
                    &cancel,
                )
                .await;
            let mut s = status.write().await;
            s.running = false;
            if let Err(e) = stats {
                tracing::warn!(error = %e, "initial sync failed");
            }
        });
    }

    if watch_enabled {
        let queue = Arc::new(WatchEventQueue::new(256));
        let debounce = Duration::from_millis(
            std::env::var("OSGREP_WATCH_DEBOUNCE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(config.watch.debounce_ms),
        );
        let root_for_watch = project_root.to_path_buf();
        let watch_cancel = cancel.clone();
        let queue_for_watch = queue.clone();
        tokio::spawn(async move {
            watcher::watch(root_for_watch, queue_for_watch, debounce, watch_cancel).await;
        });

        let syncer = Syncer::new(store.clone(), meta.clone(), embeddings.clone(), config.chunking.clone(), config.worker_threads());
        let root_for_apply = project_root.to_path_buf();
        let apply_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                if apply_cancel.is_cancelled() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
                let events = queue.drain().await;
                if events.is_empty() {
                    continue;
                }
                let mut upserts = Vec::new();
                let mut unlinks = Vec::new();
                for (path, kind) in events {
                    match kind {
                        WatchEventKind::Deleted => unlinks.push(path),
                        WatchEventKind::Created | WatchEventKind::Modified => upserts.push(path),
                    }
                }
                if let Err(e) = syncer.apply_live(&root_for_apply, &upserts, &unlinks).await {
                    tracing::warn!(error = %e, "live apply failed");
                }
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    let bound_port = listener.local_addr()?.port();

    registry::register(
        &registry_path,
        RegistryEntry {
            pid: std::process::id(),
            port: bound_port,
            project_root: project_root.to_path_buf(),
            start_time: now_unix(),
        },
    )?;

    println!("osgrep server listening on 127.0.0.1:{bound_port}");
    if background {
        println!("(run with --background ignored under this harness: serving in foreground)");
    }

    let pid = std::process::id();
    let app = server::router(state);
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;
    registry::unregister(&registry_path, pid).ok();
    serve_result.map_err(anyhow::Error::from)
}

async fn cmd_serve_status(project_root: &Path) -> anyhow::Result<()> {
    let registry_path = registry::registry_path();
    match registry::find_for_root(&registry_path, project_root)? {
        Some(entry) => {
            println!("running: pid {} on port {} (started {})", entry.pid, entry.port, entry.start_time);
        }
        None => println!("not running"),
    }
    Ok(())
}

async fn cmd_serve_stop(project_root: &Path, all: bool) -> anyhow::Result<()> {
    let registry_path = registry::registry_path();
    let entries = registry::read_live(&registry_path)?;
    let targets: Vec<RegistryEntry> = if all {
        entries
    } else {
        entries.into_iter().filter(|e| e.project_root == project_root).collect()
    };
    if targets.is_empty() {
        println!("no running server{}", if all { "s" } else { "" });
        return Ok(());
    }
    for entry in &targets {
        #[cfg(unix)]
        unsafe {
            libc::kill(entry.pid as i32, libc::SIGTERM);
        }
        registry::unregister(&registry_path, entry.pid)?;
        println!("stopped pid {} (port {})", entry.pid, entry.port);
    }
    Ok(())
}

async fn cmd_setup(project_root: &Path) -> anyhow::Result<()> {
    let global_dir = osgrep::config::global_dir();
    std::fs::create_dir_all(&global_dir)?;
    let store_dir = osgrep::config::store_dir(project_root);
    std::fs::create_dir_all(&store_dir)?;

    let config_path = store_dir.join("config.json");
    if !config_path.exists() {
        let config = OsgrepConfig::default();
        std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;
        println!("wrote default config to {}", config_path.display());
    } else {
        println!("config already exists at {}", config_path.display());
    }
    println!("global directory: {}", global_dir.display());
    Ok(())
}

async fn cmd_doctor(project_root: &Path) -> anyhow::Result<()> {
    let mut ok = true;

    println!("project root: {}", project_root.display());
    if !project_root.exists() {
        println!("{} project root does not exist", "✗".red());
        ok = false;
    } else {
        println!("{} project root exists", "✓".green());
    }

    let config = match OsgrepConfig::load(project_root).and_then(|c| c.validate().map(|_| c)) {
        Ok(c) => {
            println!("{} config is valid", "✓".green());
            c
        }
        Err(e) => {
            println!("{} config error: {e}", "✗".red());
            ok = false;
            OsgrepConfig::default()
        }
    };

    match std::env::var("OPENAI_API_KEY") {
        Ok(_) => println!("{} OPENAI_API_KEY is set", "✓".green()),
        Err(_) => {
            println!("{} OPENAI_API_KEY is not set (search/index will fail)", "✗".red());
            ok = false;
        }
    }

    let store_dir = osgrep::config::store_dir(project_root);
    if store_dir.exists() {
        match LanceDbStore::open(&store_dir, config.embedding.dense_dimension as i32).await {
            Ok(store) => match store.count().await {
                Ok(n) => println!("{} store opens, {n} chunks indexed", "✓".green()),
                Err(e) => {
                    println!("{} store count failed: {e}", "✗".red());
                    ok = false;
                }
            },
            Err(e) => {
                println!("{} store failed to open: {e}", "✗".red());
                ok = false;
            }
        }
    } else {
        println!("{} no store yet (run `osgrep index`)", "i".blue());
    }

    let registry_path = registry::registry_path();
    match registry::find_for_root(&registry_path, project_root) {
        Ok(Some(e)) => println!("{} server running: pid {} on port {}", "i".blue(), e.pid, e.port),
        Ok(None) => println!("{} no server running", "i".blue()),
        Err(e) => println!("{} registry read failed: {e}", "✗".red()),
    }

    if !ok {
        return Err(anyhow::anyhow!("doctor found problems"));
    }
    Ok(())
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use folio_core::config::Config;
use folio_core::{Attachment, ChatEvent, ChatPipeline, ChatbotResponse, RunOptions, StageProviders};
use folio_knowledge::{
    EmbeddingProvider, KnowledgeBase, KnowledgeRetrieval, LlmEmbeddings, ProjectQuery,
    ResumeQuery, Scored,
};
use folio_llm::openai::OpenAiProvider;
use folio_llm::{LlmProvider, Message};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Ask questions about a portfolio")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(
        long,
        global = true,
        env = "FOLIO_CONFIG",
        default_value = "config/default.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer one question, streaming the reply.
    Ask {
        question: String,
        /// Print the full response as JSON instead of streaming text.
        #[arg(long)]
        json: bool,
    },
    /// Rank knowledge records directly, without the chat model.
    Search {
        #[arg(value_enum)]
        target: SearchTarget,
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SearchTarget {
    Projects,
    Resume,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    init_subscriber(config.logging.file.as_deref());

    match cli.command {
        Command::Ask { question, json } => {
            let provider = create_provider(&config)?;
            let driver = build_retrieval(&config, Some(&provider)).await?;
            ask(config, driver, &provider, question, json).await
        }
        Command::Search {
            target,
            query,
            limit,
        } => {
            let provider = match create_provider(&config) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!("semantic ranking unavailable: {e:#}");
                    None
                }
            };
            let driver = build_retrieval(&config, provider.as_ref()).await?;
            search(&driver, target, query, limit).await
        }
    }
}

fn init_subscriber(log_file: Option<&Path>) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries the answer
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file_layer = log_file.and_then(|path| {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            ),
            Err(e) => {
                eprintln!("failed to open log file {}: {e}", path.display());
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .init();
}

fn create_provider(config: &Config) -> anyhow::Result<OpenAiProvider> {
    let api_key = config
        .secrets
        .llm_api_key
        .clone()
        .context("FOLIO_LLM_API_KEY is not set")?;
    let embedding_model = config
        .knowledge
        .semantic
        .then(|| config.llm.embedding_model.clone());
    Ok(OpenAiProvider::new(
        api_key,
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        config.llm.max_tokens,
        embedding_model,
    )
    .with_max_retries(config.llm.max_retries))
}

async fn build_retrieval(
    config: &Config,
    provider: Option<&OpenAiProvider>,
) -> anyhow::Result<KnowledgeRetrieval> {
    let dir = &config.knowledge.data_dir;
    let kb = KnowledgeBase::load(dir)
        .await
        .with_context(|| format!("failed to load knowledge base from {}", dir.display()))?;
    tracing::info!(
        projects = kb.projects().len(),
        resume = kb.resume().len(),
        profile = kb.profile().is_some(),
        "knowledge base loaded"
    );

    let embedder: Option<Arc<dyn EmbeddingProvider>> = match provider {
        Some(p) if config.knowledge.semantic && p.supports_embeddings() => {
            Some(Arc::new(LlmEmbeddings::new(Arc::new(p.clone()))))
        }
        _ => None,
    };

    KnowledgeRetrieval::from_knowledge_base(kb, embedder, config.search.searcher_options())
        .await
        .context("failed to build retrieval driver")
}

async fn ask(
    config: Config,
    driver: KnowledgeRetrieval,
    provider: &OpenAiProvider,
    question: String,
    json: bool,
) -> anyhow::Result<()> {
    let planner = provider.with_model(config.llm.planner_model());
    let evidence = provider.with_model(config.llm.evidence_model());
    let answer = provider.with_model(config.llm.answer_model());
    let pipeline = ChatPipeline::new(config, Arc::new(driver));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received interrupt, cancelling turn");
        interrupt.cancel();
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let mut streamed = false;
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            if json {
                continue;
            }
            if let ChatEvent::Token { delta } = event {
                streamed = true;
                let _ = write!(stdout, "{delta}");
                let _ = stdout.flush();
            }
        }
        streamed
    });

    let response = pipeline
        .run_staged(
            StageProviders {
                planner: &planner,
                evidence: &evidence,
                answer: &answer,
            },
            &[Message::user(question)],
            RunOptions {
                events: Some(tx),
                cancel: Some(cancel),
                soft_timeout_ms: None,
            },
        )
        .await;
    let streamed = printer.await.context("event printer task failed")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).context("failed to serialize response")?
        );
        return Ok(());
    }

    if streamed {
        println!();
    } else {
        println!("{}", response.message);
    }
    print_cards(&response);

    if let Some(error) = response.error {
        anyhow::bail!("{}: {}", error.code, error.message);
    }
    Ok(())
}

fn print_cards(response: &ChatbotResponse) {
    if let Some(banner) = &response.ui.banner {
        println!("\n{banner}");
    }
    for attachment in &response.attachments {
        match attachment {
            Attachment::Project(card) => println!("  [project] {}: {}", card.name, card.summary),
            Attachment::Experience(card) => {
                let when = card.timeframe.as_deref().unwrap_or("");
                println!("  [experience] {} at {} {when}", card.title, card.company);
            }
        }
    }
}

async fn search(
    driver: &KnowledgeRetrieval,
    target: SearchTarget,
    query: String,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    match target {
        SearchTarget::Projects => {
            let query = ProjectQuery {
                limit,
                ..ProjectQuery::text(query)
            };
            let hits = driver.project_searcher().search(&query).await;
            for hit in &hits {
                print_hit(&hit.record.id, &hit.record.name, hit);
            }
        }
        SearchTarget::Resume => {
            let query = ResumeQuery {
                limit,
                ..ResumeQuery::text(query)
            };
            let hits = driver.resume_searcher().search(&query).await;
            for hit in &hits {
                let label = format!("{} {}", hit.record.kind(), hit.record.title_like());
                print_hit(hit.record.id(), &label, hit);
            }
        }
    }
    Ok(())
}

fn print_hit<T>(id: &str, label: &str, hit: &Scored<T>) {
    let b = &hit.breakdown;
    let recency = b.recency.map_or_else(|| "-".to_owned(), |r| format!("{r:.3}"));
    println!(
        "{:.3}  {id:<24} {label}\n       structured={:.3} text={:.3} semantic={:.3} recency={recency}",
        hit.score, b.structured, b.text, b.semantic
    );
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ask_with_json() {
        let cli = Cli::try_parse_from(["folio", "ask", "What is Ada working on?", "--json"]).unwrap();
        match cli.command {
            Command::Ask { question, json } => {
                assert_eq!(question, "What is Ada working on?");
                assert!(json);
            }
            Command::Search { .. } => panic!("expected ask"),
        }
    }

    #[test]
    fn parses_search_with_limit_and_config() {
        let cli = Cli::try_parse_from([
            "folio",
            "--config",
            "/tmp/folio.toml",
            "search",
            "resume",
            "rust",
            "--limit",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/folio.toml"));
        match cli.command {
            Command::Search {
                target,
                query,
                limit,
            } => {
                assert_eq!(target, SearchTarget::Resume);
                assert_eq!(query, "rust");
                assert_eq!(limit, Some(3));
            }
            Command::Ask { .. } => panic!("expected search"),
        }
    }

    #[test]
    fn provider_requires_api_key() {
        let config = Config::default();
        let err = create_provider(&config).unwrap_err();
        assert!(err.to_string().contains("FOLIO_LLM_API_KEY"));
    }

    #[test]
    fn provider_embeddings_follow_semantic_flag() {
        let mut config = Config::default();
        config.secrets.llm_api_key = Some("key".into());
        assert!(create_provider(&config).unwrap().supports_embeddings());
        config.knowledge.semantic = false;
        assert!(!create_provider(&config).unwrap().supports_embeddings());
    }
}

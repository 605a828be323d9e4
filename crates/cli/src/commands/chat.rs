//! `lorekeep chat`: Interactive or single-message knowledge gathering.
//!
//! Everything lives in the in-memory store for the length of the process.

use lorekeep_agent::{ClaimValidator, PipelineDeps, RetrievalSettings, SessionManager, StructuredLlm};
use lorekeep_config::{AppConfig, DomainFile};
use lorekeep_core::evolution::{EvolutionProposal, ProposalStatus};
use lorekeep_core::knowledge::KnowledgeEntry;
use lorekeep_evolution::{EvolutionEngine, EvolutionSettings};
use lorekeep_providers::{ModelWebSearch, build_from_config};
use lorekeep_store::Repositories;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use super::{domain_path, load_config};

/// One line typed at the prompt.
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Say(&'a str),
    Entry,
    Evolve,
    Proposals,
    Approve(&'a str),
    Reject(&'a str),
    Quit,
    Help,
    Empty,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Say(line);
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("entry", _) => Input::Entry,
        ("evolve", _) => Input::Evolve,
        ("proposals", _) => Input::Proposals,
        ("approve", id) if !id.is_empty() => Input::Approve(id),
        ("reject", id) if !id.is_empty() => Input::Reject(id),
        ("quit" | "exit", _) => Input::Quit,
        ("help", _) => Input::Help,
        _ => Input::Unknown(line),
    }
}

struct Chat {
    manager: SessionManager,
    engine: EvolutionEngine,
    domain_name: String,
    session_id: String,
}

pub async fn run(
    config_path: Option<&Path>,
    domain: Option<PathBuf>,
    message: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    // No key means no provider; say how to set one up
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    LOREKEEP_API_KEY     (generic)");
        eprintln!("    OPENROUTER_API_KEY   (recommended)");
        eprintln!("    OPENAI_API_KEY       (for OpenAI direct)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let domain_file = DomainFile::load(&domain_path(&config, domain)?)?;
    let chat = Chat::build(&config, domain_file).await?;

    if let Some(msg) = message {
        chat.say(&msg).await?;
        chat.manager.end_session(&chat.session_id).await?;
        return Ok(());
    }

    println!();
    println!("  lorekeep — {}", chat.domain_name);
    println!();
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.default_model);
    println!("  Session:   {}", chat.session_id);
    println!();
    println!("  Tell me what you know. Type /help for commands, /quit to leave.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Quit => break,
            Input::Empty => {}
            input => {
                if let Err(e) = chat.handle(input).await {
                    eprintln!("  [Error] {e}");
                }
            }
        }
        prompt()?;
    }

    let session = chat.manager.end_session(&chat.session_id).await?;
    println!();
    println!("  Session closed after {} turns. Goodbye!", session.turn_count);
    println!();
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

impl Chat {
    async fn build(config: &AppConfig, domain_file: DomainFile) -> Result<Self, Box<dyn std::error::Error>> {
        let (domain, persona) = domain_file.into_schemas();
        let domain_name = domain.name.clone();
        let voice = persona.voice.clone();

        let repos = Repositories::in_memory();
        repos.schemas.create_domain(domain).await?;
        repos.schemas.create_persona(persona).await?;

        let router = build_from_config(config);
        let provider = router.default().ok_or("No default provider configured")?;
        let llm = StructuredLlm::from_config(provider.clone(), config);

        let deps = PipelineDeps {
            llm: llm.clone(),
            embedder: router.embedder(config),
            knowledge: Some(repos.knowledge.clone()),
            retrieval: RetrievalSettings::from(&config.pipeline),
        };
        let mut manager = SessionManager::new(repos.clone(), deps).with_default_voice(voice);
        if config.pipeline.turn_timeout_secs > 0 {
            manager = manager.with_turn_timeout(Duration::from_secs(config.pipeline.turn_timeout_secs));
        }
        if config.pipeline.enrichment {
            let search = ModelWebSearch::new(provider, &config.pipeline.search_model);
            let validator = ClaimValidator::new(llm.clone(), Arc::new(search), repos.knowledge.clone())
                .with_cache(repos.search_cache.clone(), chrono::Duration::days(config.search_cache.ttl_days));
            manager = manager.with_enrichment(validator);
        }

        let engine = EvolutionEngine::new(llm, &repos, EvolutionSettings::from(&config.evolution));
        let session = manager.start_session(&domain_name).await?;
        info!(
            domain = %domain_name,
            session_id = %session.id,
            enrichment = config.pipeline.enrichment,
            "Chat ready"
        );
        Ok(Self {
            manager,
            engine,
            domain_name,
            session_id: session.id,
        })
    }

    async fn handle(&self, input: Input<'_>) -> Result<(), Box<dyn std::error::Error>> {
        match input {
            Input::Say(text) => self.say(text).await?,
            Input::Entry => match self.manager.current_entry(&self.session_id).await? {
                Some(entry) => print!("{}", describe_entry(&entry)),
                None => println!("  No entry in progress."),
            },
            Input::Evolve => {
                let proposals = self.engine.analyze(&self.domain_name).await?;
                if proposals.is_empty() {
                    println!("  Nothing to propose yet.");
                }
                for proposal in &proposals {
                    println!("{}", describe_proposal(proposal));
                }
            }
            Input::Proposals => {
                let pending = self
                    .engine
                    .list_proposals(&self.domain_name, Some(ProposalStatus::Pending))
                    .await?;
                if pending.is_empty() {
                    println!("  No pending proposals.");
                }
                for proposal in &pending {
                    println!("{}", describe_proposal(proposal));
                }
            }
            Input::Approve(id) => {
                let schema_id = self.engine.approve(id).await?;
                println!("  Approved. Active schema is now {schema_id}.");
            }
            Input::Reject(id) => {
                self.engine.reject(id).await?;
                println!("  Rejected.");
            }
            Input::Help => print_help(),
            Input::Unknown(line) => println!("  Unknown command: {line} (try /help)"),
            Input::Quit | Input::Empty => {}
        }
        Ok(())
    }

    async fn say(&self, text: &str) -> Result<(), Box<dyn std::error::Error>> {
        eprint!("  ...");
        let result = self.manager.process_turn(&self.session_id, text).await;
        eprint!("\r     \r");
        let outcome = result?;

        println!();
        for line in outcome.response().lines() {
            println!("  Assistant > {line}");
        }
        if let Some(entry) = &outcome.entry {
            let state = match outcome.is_complete() {
                Some(true) => "complete",
                _ => "in progress",
            };
            println!();
            println!("  [{}: {} ({state})]", entry.category_id, entry.title);
        }
        println!();
        Ok(())
    }
}

fn print_help() {
    println!("  /entry          show the entry in progress");
    println!("  /evolve         analyze collected knowledge for schema changes");
    println!("  /proposals      list pending schema proposals");
    println!("  /approve <id>   apply a proposal");
    println!("  /reject <id>    discard a proposal");
    println!("  /quit           end the session");
}

fn describe_entry(entry: &KnowledgeEntry) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  {} [{}]", entry.title, entry.category_id);
    let _ = writeln!(out, "  {}", entry.content);
    for (field, value) in &entry.structured_data {
        let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
        let _ = writeln!(out, "    {field}: {value}");
    }
    if !entry.tags.is_empty() {
        let _ = writeln!(out, "    tags: {}", entry.tags.join(", "));
    }
    if let Some(follow_up) = &entry.follow_up {
        let _ = writeln!(out, "    still open: {}", follow_up.gaps.join(", "));
    }
    if let Some(enrichment) = &entry.enrichment {
        let _ = writeln!(
            out,
            "    claims: {} checked, {} verified, {} contradicted",
            enrichment.claims.len(),
            enrichment.verified_count(),
            enrichment.contradicted().count()
        );
    }
    out
}

fn describe_proposal(proposal: &EvolutionProposal) -> String {
    format!(
        "  {}  {:?}  {:.2}  {}",
        proposal.id, proposal.status, proposal.confidence, proposal.description
    )
}
